/*!
 * Privilege Drop
 * Ordered, verified transition from root to the target account
 *
 * Order: supplementary groups, then gid, then uid. Changing the uid first
 * would leave no permission to change groups afterwards. After the last step
 * every real/effective/saved slot is checked so root cannot be regained.
 */

use super::traits::{AccountResolver, CredentialOps};
use super::types::{Credential, CurrentIds, DroppedIdentity};
use crate::core::errors::{VelenError, VelenResult};
use crate::monitoring::span_step;
use nix::unistd::{self, Gid, Uid};
use std::sync::Arc;
use tracing::{error, info};

/// Credential syscalls on the running process
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxCredentialOps;

impl LinuxCredentialOps {
    pub fn new() -> Self {
        Self
    }
}

impl CredentialOps for LinuxCredentialOps {
    fn set_groups(&self, groups: &[Gid]) -> nix::Result<()> {
        unistd::setgroups(groups)
    }

    fn set_gid(&self, gid: Gid) -> nix::Result<()> {
        unistd::setresgid(gid, gid, gid)
    }

    fn set_uid(&self, uid: Uid) -> nix::Result<()> {
        unistd::setresuid(uid, uid, uid)
    }

    fn current(&self) -> nix::Result<CurrentIds> {
        let uids = unistd::getresuid()?;
        let gids = unistd::getresgid()?;
        Ok(CurrentIds {
            uids: [uids.real, uids.effective, uids.saved],
            gids: [gids.real, gids.effective, gids.saved],
            groups: unistd::getgroups()?,
        })
    }
}

pub struct PrivilegeDropper {
    resolver: Arc<dyn AccountResolver>,
    ops: Arc<dyn CredentialOps>,
}

impl PrivilegeDropper {
    pub fn new(resolver: Arc<dyn AccountResolver>, ops: Arc<dyn CredentialOps>) -> Self {
        Self { resolver, ops }
    }

    /// Dropper for the real process
    pub fn system() -> Self {
        Self::new(
            Arc::new(super::account::NssAccountResolver::new()),
            Arc::new(LinuxCredentialOps::new()),
        )
    }

    /// Look the account up; done once, before any namespace change
    pub fn resolve(&self, account: &str) -> VelenResult<Credential> {
        self.resolver.resolve(account)
    }

    /// Switch the process to `credential`
    ///
    /// Consumes the credential: a drop is attempted once per process. Any
    /// failing step aborts and the caller must not exec.
    pub fn apply(&self, credential: Credential) -> VelenResult<DroppedIdentity> {
        let timed = span_step("drop_privileges", credential.name.clone());
        let _entered = timed.enter();

        self.ops
            .set_groups(&credential.groups)
            .map_err(|e| fail("setgroups", e))?;
        self.ops
            .set_gid(credential.gid)
            .map_err(|e| fail("setgid", e))?;
        self.ops
            .set_uid(credential.uid)
            .map_err(|e| fail("setuid", e))?;

        let ids = self.ops.current().map_err(|e| fail("verify", e))?;
        if !ids.is_exactly(credential.uid, credential.gid) {
            error!(ids = %ids, "Credential transition incomplete");
            return Err(VelenError::privilege(
                "verify",
                format!(
                    "expected uid={} gid={}, have {}",
                    credential.uid, credential.gid, ids
                ),
            ));
        }

        info!(
            account = %credential.name,
            uid = credential.uid.as_raw(),
            gid = credential.gid.as_raw(),
            "Privileges dropped"
        );
        Ok(credential.into())
    }

    /// Resolve and apply in one go
    pub fn drop_to(&self, account: &str) -> VelenResult<DroppedIdentity> {
        let credential = self.resolve(account)?;
        self.apply(credential)
    }
}

fn fail(step: &str, errno: nix::errno::Errno) -> VelenError {
    error!(step, error = %errno, "Privilege drop step failed");
    VelenError::privilege(step, errno.desc())
}
