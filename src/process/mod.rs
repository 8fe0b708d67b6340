/*!
 * Process Module
 * Entering the sandbox, dropping privileges and running commands
 *
 * Components:
 * - Confiner: private mount namespace pivoted onto the merged view
 * - Executor: environment setup and execve
 * - Command runner: the ordered run sequence
 * - Restricted shell: session guard plus forked shell with signal forwarding
 */

pub mod confine;
pub mod exec;
pub mod runner;
pub mod shell;
pub mod signals;
pub mod simulation;

// Re-export for convenience
pub use confine::{Confiner, LinuxConfiner};
pub use exec::{build_environment, is_safe_variable, EnvIdentity, ExecRequest, Executor, LinuxExecutor};
pub use runner::{inner_shell, CommandRunner, CommandSpec};
pub use shell::{wait_for, ForkLauncher, Launcher, RestrictedShell, ShellSession};
pub use signals::SignalForwarder;
pub use simulation::{FnLauncher, RecordingConfiner, RecordingExecutor};
