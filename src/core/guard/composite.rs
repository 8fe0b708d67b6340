/*!
 * Composite Guards
 *
 * Combine multiple guards into a single guard with unified lifecycle
 */

use super::traits::{Guard, GuardDrop};
use super::{GuardError, GuardMetadata, GuardResult};
use tracing::error;

/// Composite guard that manages multiple guards as one
///
/// Guards are released in reverse order of addition, so a mount stacked on
/// top of another is removed before the one beneath it.
pub struct CompositeGuard {
    guards: Vec<Box<dyn Guard>>,
    metadata: GuardMetadata,
    active: bool,
}

impl CompositeGuard {
    /// Create a new empty composite guard
    pub fn new() -> Self {
        Self {
            guards: Vec::new(),
            metadata: GuardMetadata::new("composite"),
            active: true,
        }
    }

    /// Add a guard to the composite
    pub fn add<G: Guard + 'static>(mut self, guard: G) -> Self {
        self.push(guard);
        self
    }

    /// Add a guard in place
    pub fn push<G: Guard + 'static>(&mut self, guard: G) {
        self.guards.push(Box::new(guard));
    }

    /// Get number of guards in the composite
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Check if composite is empty
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Labels of the held guards, in addition order
    pub fn labels(&self) -> Vec<String> {
        self.guards
            .iter()
            .map(|g| g.metadata().label.clone())
            .collect()
    }

    /// Release all guards in reverse order (LIFO)
    ///
    /// Continues even if some guards fail, collecting all errors
    pub fn release_all(&mut self) -> Vec<GuardError> {
        let mut errors = Vec::new();

        for guard in self.guards.iter_mut().rev() {
            if !guard.is_active() {
                continue;
            }
            if let Err(e) = guard.release() {
                errors.push(e);
            }
        }

        self.active = false;
        errors
    }
}

impl Default for CompositeGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Guard for CompositeGuard {
    fn resource_type(&self) -> &'static str {
        "composite"
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

        let mut errors = self.release_all().into_iter();
        match errors.next() {
            None => Ok(()),
            Some(first) => {
                // Return first error, log others
                for (i, err) in errors.enumerate() {
                    error!(index = i + 1, error = %err, "Composite guard error");
                }
                Err(first)
            }
        }
    }

    fn disarm(&mut self) {
        for guard in &mut self.guards {
            guard.disarm();
        }
        self.active = false;
    }
}

impl GuardDrop for CompositeGuard {
    fn on_drop(&mut self) {
        if self.active {
            let errors = self.release_all();
            if !errors.is_empty() {
                error!(count = errors.len(), errors = ?errors, "Composite guard drop had errors");
            }
        }
    }
}

impl Drop for CompositeGuard {
    fn drop(&mut self) {
        self.on_drop();
    }
}
