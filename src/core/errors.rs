/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for every sandbox operation
///
/// # Must Use
/// Sandbox operations mutate mounts and credentials and must be handled
#[must_use = "sandbox operations can fail and must be handled"]
pub type VelenResult<T> = Result<T, VelenError>;

/// Exit statuses shared by the command surface
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const ALREADY_ACTIVE: i32 = 1;
    pub const NOT_ACTIVE: i32 = 2;
    pub const MOUNT_FAILURE: i32 = 10;
    pub const UNMOUNT_BUSY: i32 = 11;
    pub const UNMOUNT_FAILURE: i32 = 12;
    pub const PRIVILEGE_DROP_FAILURE: i32 = 13;
    pub const CONFINEMENT_FAILURE: i32 = 14;
    /// sysexits.h EX_USAGE
    pub const USAGE: i32 = 64;
    /// sysexits.h EX_IOERR
    pub const IO: i32 = 74;
    /// sysexits.h EX_CONFIG
    pub const CONFIG: i32 = 78;
    pub const NOT_EXECUTABLE: i32 = 126;
    pub const NOT_FOUND: i32 = 127;
    /// Added to a signal number when a child is killed by that signal
    pub const SIGNAL_BASE: i32 = 128;
}

/// Sandbox errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum VelenError {
    #[error("sandbox already exists at {0}")]
    #[diagnostic(
        code(velen::already_active),
        help("Run `velen destroy` first. Only one sandbox may exist per host.")
    )]
    AlreadyActive(PathBuf),

    #[error("no active sandbox at {0}")]
    #[diagnostic(
        code(velen::not_active),
        help("Run `velen prepare` to create the sandbox.")
    )]
    NotActive(PathBuf),

    #[error("failed to mount {target}: {reason}")]
    #[diagnostic(
        code(velen::mount_failure),
        help("Mounting requires root. Partially created mounts were rolled back.")
    )]
    MountFailure { target: PathBuf, reason: String },

    #[error("{target} still busy after {attempts} unmount attempts")]
    #[diagnostic(
        code(velen::unmount_busy),
        help("A process is still using the sandbox. Stop it (see `fuser -m`) and run `velen destroy` again.")
    )]
    UnmountBusy { target: PathBuf, attempts: u32 },

    #[error("failed to tear down {target}: {reason}")]
    #[diagnostic(
        code(velen::unmount_failure),
        help("The sandbox root was left in place so `velen destroy` can be retried.")
    )]
    UnmountFailure { target: PathBuf, reason: String },

    #[error("privilege drop failed at {step}: {reason}")]
    #[diagnostic(
        code(velen::privilege_drop_failure),
        help("Nothing was executed. Check that the target account exists and velen runs as root.")
    )]
    PrivilegeDropFailure { step: String, reason: String },

    #[error("failed to enter sandbox at {step}: {reason}")]
    #[diagnostic(
        code(velen::confinement_failure),
        help("Nothing was executed. Entering the sandbox requires CAP_SYS_ADMIN.")
    )]
    ConfinementFailure { step: String, reason: String },

    #[error("failed to execute {program}: {reason}")]
    #[diagnostic(code(velen::exec_failure))]
    ExecFailure {
        program: String,
        reason: String,
        not_found: bool,
    },

    #[error("invalid configuration: {0}")]
    #[diagnostic(code(velen::invalid_config))]
    InvalidConfig(String),

    #[error("I/O error on {path}: {reason}")]
    #[diagnostic(code(velen::io))]
    Io { path: PathBuf, reason: String },
}

impl VelenError {
    /// Exit status reported by the command surface for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            VelenError::AlreadyActive(_) => exit::ALREADY_ACTIVE,
            VelenError::NotActive(_) => exit::NOT_ACTIVE,
            VelenError::MountFailure { .. } => exit::MOUNT_FAILURE,
            VelenError::UnmountBusy { .. } => exit::UNMOUNT_BUSY,
            VelenError::UnmountFailure { .. } => exit::UNMOUNT_FAILURE,
            VelenError::PrivilegeDropFailure { .. } => exit::PRIVILEGE_DROP_FAILURE,
            VelenError::ConfinementFailure { .. } => exit::CONFINEMENT_FAILURE,
            VelenError::ExecFailure { not_found: true, .. } => exit::NOT_FOUND,
            VelenError::ExecFailure { .. } => exit::NOT_EXECUTABLE,
            VelenError::InvalidConfig(_) => exit::CONFIG,
            VelenError::Io { .. } => exit::IO,
        }
    }

    /// Expected conflicts callers may branch on, as opposed to failures
    pub fn is_conflict(&self) -> bool {
        matches!(self, VelenError::AlreadyActive(_) | VelenError::NotActive(_))
    }

    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        VelenError::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    pub fn mount(target: impl Into<PathBuf>, reason: impl ToString) -> Self {
        VelenError::MountFailure {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn privilege(step: &str, reason: impl ToString) -> Self {
        VelenError::PrivilegeDropFailure {
            step: step.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn confinement(step: &str, reason: impl ToString) -> Self {
        VelenError::ConfinementFailure {
            step: step.to_string(),
            reason: reason.to_string(),
        }
    }
}
