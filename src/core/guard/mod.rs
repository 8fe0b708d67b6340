/*!
 * RAII Resource Guards
 *
 * Scoped guards with automatic cleanup, used wherever a partially built
 * sandbox must be unwound.
 *
 * ## Guard Types
 *
 * - **ScopedGuard**: One resource with a release closure (a mount, a directory)
 * - **CompositeGuard**: Multiple guards released together in LIFO order
 * - **TransactionGuard**: A composite that rolls back on drop unless committed
 *
 * ## Example
 *
 * ```ignore
 * let mut tx = TransactionGuard::begin("prepare");
 * tx.push(ScopedGuard::new("mount", "/tmp/velen/top", move || unmount()));
 * tx.push(ScopedGuard::new("mount", "/tmp/velen/overlay", move || unmount()));
 * tx.commit(); // Or auto-rollback on drop, overlay first
 * ```
 */

mod composite;
mod scoped;
mod traits;
mod transaction;

pub use composite::CompositeGuard;
pub use scoped::ScopedGuard;
pub use traits::{Guard, GuardDrop};
pub use transaction::{TransactionGuard, TransactionState};

/// Result type for guard operations
pub type GuardResult<T> = Result<T, GuardError>;

/// Errors that can occur during guard operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    #[error("Resource already released")]
    AlreadyReleased,

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Release of {resource} failed: {reason}")]
    ReleaseFailed { resource: String, reason: String },
}

/// Guard metadata for observability
#[derive(Debug, Clone)]
pub struct GuardMetadata {
    pub resource_type: &'static str,
    pub label: String,
}

impl GuardMetadata {
    #[inline]
    pub fn new(resource_type: &'static str) -> Self {
        Self {
            resource_type,
            label: String::new(),
        }
    }

    #[inline]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}
