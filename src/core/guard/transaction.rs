/*!
 * Transaction Guards
 *
 * RAII guards for multi-step operations with automatic rollback
 */

use super::composite::CompositeGuard;
use super::traits::{Guard, GuardDrop};
use super::{GuardError, GuardMetadata, GuardResult};
use tracing::{debug, info, warn};

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Steps are being recorded
    Active,
    /// Steps now belong to the caller
    Committed,
    /// Steps were undone in reverse order
    RolledBack,
}

/// Transaction guard with automatic rollback
///
/// Each completed step pushes a guard that knows how to undo it. Dropping the
/// transaction without `commit` undoes every step, newest first.
///
/// # Example
///
/// ```ignore
/// let mut tx = TransactionGuard::begin("prepare");
/// mount_top()?;
/// tx.push(unmount_top_guard);
/// mount_overlay()?; // early return rolls back the top mount
/// tx.push(unmount_overlay_guard);
/// tx.commit()?;
/// ```
pub struct TransactionGuard {
    name: &'static str,
    state: TransactionState,
    steps: CompositeGuard,
    metadata: GuardMetadata,
}

impl TransactionGuard {
    /// Begin a new transaction
    pub fn begin(name: &'static str) -> Self {
        debug!(transaction = name, "Transaction started");
        Self {
            name,
            state: TransactionState::Active,
            steps: CompositeGuard::new(),
            metadata: GuardMetadata::new("transaction").with_label(name),
        }
    }

    /// Record an undo step
    pub fn push<G: Guard + 'static>(&mut self, guard: G) {
        self.steps.push(guard);
    }

    /// Number of recorded steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Labels of recorded steps, oldest first
    pub fn step_labels(&self) -> Vec<String> {
        self.steps.labels()
    }

    /// Keep every step; nothing is undone
    pub fn commit(mut self) -> GuardResult<()> {
        self.ensure_active("Committed")?;
        self.steps.disarm();
        self.state = TransactionState::Committed;
        debug!(transaction = self.name, "Transaction committed");
        Ok(())
    }

    /// Undo every step now, reporting the first failure
    pub fn rollback(mut self) -> GuardResult<()> {
        self.ensure_active("RolledBack")?;
        self.do_rollback()
    }

    /// Get current transaction state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn ensure_active(&self, to: &str) -> GuardResult<()> {
        if self.state != TransactionState::Active {
            return Err(GuardError::InvalidTransition {
                from: format!("{:?}", self.state),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    fn do_rollback(&mut self) -> GuardResult<()> {
        info!(
            transaction = self.name,
            steps = self.steps.len(),
            "Rolling back transaction"
        );
        self.state = TransactionState::RolledBack;
        self.steps.release()
    }
}

impl Guard for TransactionGuard {
    fn resource_type(&self) -> &'static str {
        "transaction"
    }

    fn metadata(&self) -> &GuardMetadata {
        &self.metadata
    }

    fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    fn release(&mut self) -> GuardResult<()> {
        self.ensure_active("RolledBack")
            .map_err(|_| GuardError::AlreadyReleased)?;
        self.do_rollback()
    }

    fn disarm(&mut self) {
        self.steps.disarm();
        self.state = TransactionState::Committed;
    }
}

impl GuardDrop for TransactionGuard {
    fn on_drop(&mut self) {
        if self.state == TransactionState::Active {
            if let Err(e) = self.do_rollback() {
                warn!(transaction = self.name, error = %e, "Transaction rollback failed");
            }
        }
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        self.on_drop();
    }
}
