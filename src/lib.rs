/*!
 * velen Library
 * Ephemeral overlay sandbox exposed as a library
 */

pub mod cli;
pub mod core;
pub mod monitoring;
pub mod process;
pub mod sandbox;
pub mod security;

// Re-exports
pub use crate::core::errors::*;
pub use crate::core::{is_setuid_invocation, VelenConfig};
pub use monitoring::init_tracing;
pub use process::{CommandRunner, CommandSpec, RestrictedShell};
pub use sandbox::{LifecycleController, PassthroughPath, PrepareRequest, SandboxLayout, SandboxState};
pub use security::{Credential, PrivilegeDropper};
