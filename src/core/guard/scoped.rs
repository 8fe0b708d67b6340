/*!
 * Scoped Guards
 *
 * A single resource paired with the closure that releases it
 */

use super::traits::{Guard, GuardDrop};
use super::{GuardError, GuardMetadata, GuardResult};
use tracing::{error, trace};

type ReleaseFn = Box<dyn FnMut() -> Result<(), String> + Send>;

/// Guard that runs its release closure exactly once
///
/// # Example
///
/// ```ignore
/// let target = merged.clone();
/// let guard = ScopedGuard::new("mount", target.display().to_string(), move || {
///     umount2(&target, MntFlags::MNT_DETACH).map_err(|e| e.to_string())
/// });
/// // Unmounted on drop unless disarmed
/// ```
pub struct ScopedGuard {
    release_fn: ReleaseFn,
    metadata: GuardMetadata,
    active: bool,
}

impl ScopedGuard {
    pub fn new<F>(resource_type: &'static str, label: impl Into<String>, release_fn: F) -> Self
    where
        F: FnMut() -> Result<(), String> + Send + 'static,
    {
        let metadata = GuardMetadata::new(resource_type).with_label(label);
        trace!(resource = resource_type, label = %metadata.label, "Guard armed");
        Self {
            release_fn: Box::new(release_fn),
            metadata,
            active: true,
        }
    }

    /// Label given at creation, usually a path
    pub fn label(&self) -> &str {
        &self.metadata.label
    }
}

impl Guard for ScopedGuard {
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
        // One shot even when the closure fails; the caller decides on retries
        self.active = false;
        (self.release_fn)().map_err(|reason| GuardError::ReleaseFailed {
            resource: format!("{} {}", self.metadata.resource_type, self.metadata.label),
            reason,
        })
    }

    fn disarm(&mut self) {
        self.active = false;
    }
}

impl GuardDrop for ScopedGuard {
    fn on_drop(&mut self) {
        if self.active {
            if let Err(e) = self.release() {
                error!(error = %e, "Scoped guard release on drop failed");
            }
        }
    }
}

impl Drop for ScopedGuard {
    fn drop(&mut self) {
        self.on_drop();
    }
}
