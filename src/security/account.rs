/*!
 * Account Resolution
 * Name service lookups for the target account
 */

use super::traits::AccountResolver;
use super::types::Credential;
use crate::core::errors::{VelenError, VelenResult};
use nix::unistd::{getgrouplist, User};
use std::ffi::CString;
use tracing::debug;

/// Resolver backed by the system name service (passwd, group)
#[derive(Debug, Clone, Copy, Default)]
pub struct NssAccountResolver;

impl NssAccountResolver {
    pub fn new() -> Self {
        Self
    }
}

impl AccountResolver for NssAccountResolver {
    fn resolve(&self, account: &str) -> VelenResult<Credential> {
        let user = User::from_name(account)
            .map_err(|e| VelenError::privilege("resolve", e.desc()))?
            .ok_or_else(|| {
                VelenError::privilege("resolve", format!("unknown account {}", account))
            })?;

        let name = CString::new(user.name.as_str())
            .map_err(|e| VelenError::privilege("resolve", e))?;
        let mut groups = getgrouplist(&name, user.gid)
            .map_err(|e| VelenError::privilege("resolve", format!("group list: {}", e.desc())))?;
        if !groups.contains(&user.gid) {
            groups.insert(0, user.gid);
        }

        debug!(
            account,
            uid = user.uid.as_raw(),
            gid = user.gid.as_raw(),
            groups = groups.len(),
            "Account resolved"
        );

        Ok(Credential {
            name: user.name,
            uid: user.uid,
            gid: user.gid,
            groups,
            home: user.dir,
            shell: user.shell,
        })
    }
}
