/*!
 * Security Module
 * Account resolution and the ordered privilege drop
 *
 * Platform support:
 * - Linux: NSS lookups and set*id syscalls through nix
 * - Simulation: account table and recorded transitions for tests
 */

pub mod account;
pub mod privilege;
pub mod simulation;
pub mod traits;
pub mod types;

// Re-export for convenience
pub use account::NssAccountResolver;
pub use privilege::{LinuxCredentialOps, PrivilegeDropper};
pub use simulation::{CredentialStep, RecordingCredentialOps, TableAccountResolver};
pub use traits::*;
pub use types::*;
