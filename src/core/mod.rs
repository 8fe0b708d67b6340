/*!
 * Core Module
 * Configuration, limits, guards and error handling
 */

pub mod config;
pub mod errors;
pub mod guard;
pub mod limits;

// Re-export for convenience
pub use config::{is_setuid_invocation, VelenConfig};
pub use errors::*;
pub use guard::{
    CompositeGuard, Guard, GuardDrop, GuardError, GuardResult, ScopedGuard, TransactionGuard,
    TransactionState,
};
