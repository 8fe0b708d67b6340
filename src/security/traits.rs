/*!
 * Security Traits
 * Account lookup and credential syscalls behind swappable providers
 */

use super::types::*;
use crate::core::errors::VelenResult;
use nix::unistd::{Gid, Uid};

/// Resolves an account name to its credentials
pub trait AccountResolver: Send + Sync {
    fn resolve(&self, account: &str) -> VelenResult<Credential>;
}

/// Process credential transitions
///
/// Each call maps to one syscall so the caller controls the order.
pub trait CredentialOps: Send + Sync {
    /// Replace the supplementary group list
    fn set_groups(&self, groups: &[Gid]) -> nix::Result<()>;

    /// Set real, effective and saved gid
    fn set_gid(&self, gid: Gid) -> nix::Result<()>;

    /// Set real, effective and saved uid
    fn set_uid(&self, uid: Uid) -> nix::Result<()>;

    fn current(&self) -> nix::Result<CurrentIds>;
}
