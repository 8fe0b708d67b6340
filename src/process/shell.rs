/*!
 * Restricted Shell
 * prepare + run + destroy as one session with guaranteed teardown
 *
 * The session is a guard: whatever ends the shell (normal exit, an error,
 * a panic, a forwarded signal), dropping the session destroys the sandbox.
 */

use super::runner::{CommandRunner, CommandSpec};
use super::signals::SignalForwarder;
use crate::core::errors::{exit, VelenError, VelenResult};
use crate::core::guard::{Guard, GuardDrop, GuardError, GuardMetadata, GuardResult};
use crate::sandbox::{LifecycleController, PrepareRequest, SandboxState};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Owns the sandbox for the length of one shell invocation
pub struct ShellSession {
    lifecycle: Arc<LifecycleController>,
    metadata: GuardMetadata,
    active: bool,
}

impl ShellSession {
    /// Arm the session, preparing the sandbox if none exists
    ///
    /// The guard is armed before prepare so even a partially failed prepare
    /// is cleaned up.
    pub fn open(lifecycle: Arc<LifecycleController>, request: &PrepareRequest) -> VelenResult<Self> {
        let label = lifecycle.layout().root.display().to_string();
        let session = Self {
            lifecycle,
            metadata: GuardMetadata::new("shell_session").with_label(label),
            active: true,
        };

        if session.lifecycle.state() == SandboxState::Absent {
            match session.lifecycle.prepare(request) {
                Ok(_) => {}
                // Lost a race with another prepare; the sandbox exists either way
                Err(VelenError::AlreadyActive(_)) => debug!("Sandbox prepared concurrently"),
                Err(e) => return Err(e),
            }
        }
        Ok(session)
    }

    /// Destroy now and report the outcome
    pub fn close(mut self) -> VelenResult<()> {
        self.active = false;
        destroy_quietly(&self.lifecycle)
    }
}

/// Destroy, treating an already absent sandbox as done
fn destroy_quietly(lifecycle: &LifecycleController) -> VelenResult<()> {
    match lifecycle.destroy() {
        Ok(()) | Err(VelenError::NotActive(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

impl Guard for ShellSession {
    fn resource_type(&self) -> &'static str {
        self.metadata.resource_type
    }

    fn metadata(&self) -> &GuardMetadata {
        &self.metadata
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn release(&mut self) -> GuardResult<()> {
        if !self.active {
            return Err(GuardError::AlreadyReleased);
        }
        self.active = false;
        destroy_quietly(&self.lifecycle).map_err(|e| GuardError::ReleaseFailed {
            resource: format!("shell_session {}", self.metadata.label),
            reason: e.to_string(),
        })
    }

    fn disarm(&mut self) {
        self.active = false;
    }
}

impl GuardDrop for ShellSession {
    fn on_drop(&mut self) {
        if self.active {
            warn!(root = %self.metadata.label, "Session ended abnormally, destroying sandbox");
            if let Err(e) = self.release() {
                error!(error = %e, "Sandbox teardown failed");
            }
        }
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        self.on_drop();
    }
}

/// Runs a command in a separate process and reports its exit status
pub trait Launcher: Send + Sync {
    fn launch(&self, spec: CommandSpec) -> VelenResult<i32>;

    /// Signal handling held for the whole session, prepare through destroy
    fn forward_signals(&self) -> VelenResult<Option<SignalForwarder>> {
        Ok(None)
    }
}

/// Forks; the child runs the command runner, the parent waits
pub struct ForkLauncher {
    runner: Arc<CommandRunner>,
}

impl ForkLauncher {
    pub fn new(runner: Arc<CommandRunner>) -> Self {
        Self { runner }
    }
}

impl Launcher for ForkLauncher {
    fn launch(&self, spec: CommandSpec) -> VelenResult<i32> {
        if let Some(signal) = SignalForwarder::take_pending() {
            info!(signal = %signal, "Session interrupted before the shell started");
            return Ok(exit::SIGNAL_BASE + signal as i32);
        }

        // SAFETY: the process is single threaded; the child only runs the
        // runner and exits through exec or _exit
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                SignalForwarder::reset_for_child();
                let code = match self.runner.run(spec) {
                    Ok(never) => match never {},
                    Err(e) => {
                        eprintln!("{:?}", miette::Report::new(e.clone()));
                        e.exit_code()
                    }
                };
                // SAFETY: skips atexit handlers and destructors inherited from the parent
                unsafe { nix::libc::_exit(code) }
            }
            Ok(ForkResult::Parent { child }) => {
                SignalForwarder::attach(child);
                debug!(child = child.as_raw(), "Shell started");
                let status = wait_for(child);
                SignalForwarder::detach();
                status
            }
            Err(errno) => Err(launch_failure(errno)),
        }
    }

    fn forward_signals(&self) -> VelenResult<Option<SignalForwarder>> {
        SignalForwarder::install().map(Some)
    }
}

/// Wait for `child`, mapping death by signal n to 128+n
pub fn wait_for(child: Pid) -> VelenResult<i32> {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                info!(signal = %signal, "Shell killed by signal");
                return Ok(exit::SIGNAL_BASE + signal as i32);
            }
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(launch_failure(errno)),
        }
    }
}

fn launch_failure(errno: Errno) -> VelenError {
    VelenError::ExecFailure {
        program: "shell".to_string(),
        reason: errno.desc().to_string(),
        not_found: false,
    }
}

/// The `shell` operation
pub struct RestrictedShell {
    lifecycle: Arc<LifecycleController>,
    request: PrepareRequest,
    launcher: Arc<dyn Launcher>,
}

impl RestrictedShell {
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        request: PrepareRequest,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            lifecycle,
            request,
            launcher,
        }
    }

    /// Run the account's shell (or `shell -c command`) in a fresh sandbox
    ///
    /// Returns the inner exit status. A failed destroy takes precedence over a
    /// successful inner run, so a leaked sandbox is never reported as success.
    ///
    /// Hangups and terminations are held off until destroy has finished.
    pub fn run(&self, command: Option<String>) -> VelenResult<i32> {
        let _signals = self.launcher.forward_signals()?;
        let session = ShellSession::open(self.lifecycle.clone(), &self.request)?;
        let status = self.launcher.launch(CommandSpec::LoginShell { command });
        let closed = session.close();
        if let Some(signal) = SignalForwarder::take_pending() {
            info!(signal = %signal, "Signal received during teardown");
        }

        match (status, closed) {
            (Ok(code), Ok(())) => Ok(code),
            (Ok(code), Err(e)) => {
                warn!(inner = code, "Shell finished but teardown failed");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown)) => {
                error!(error = %teardown, "Sandbox teardown failed");
                Err(e)
            }
        }
    }
}
