/*!
 * Simulation Security
 * Table-backed accounts and recorded credential transitions
 */

use super::traits::*;
use super::types::*;
use crate::core::errors::{VelenError, VelenResult};
use nix::errno::Errno;
use nix::unistd::{Gid, Uid};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Accounts served from memory
#[derive(Debug, Clone, Default)]
pub struct TableAccountResolver {
    accounts: Arc<Mutex<HashMap<String, Credential>>>,
}

impl TableAccountResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, credential: Credential) {
        self.accounts
            .lock()
            .insert(credential.name.clone(), credential);
    }
}

impl AccountResolver for TableAccountResolver {
    fn resolve(&self, account: &str) -> VelenResult<Credential> {
        self.accounts
            .lock()
            .get(account)
            .cloned()
            .ok_or_else(|| VelenError::privilege("resolve", format!("unknown account {}", account)))
    }
}

/// One recorded credential syscall
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStep {
    SetGroups(Vec<Gid>),
    SetGid(Gid),
    SetUid(Uid),
}

#[derive(Debug)]
struct CredState {
    ids: CurrentIds,
    steps: Vec<CredentialStep>,
    fail_at: Option<&'static str>,
    keep_saved_uid: bool,
}

/// Records transitions instead of performing them
#[derive(Debug, Clone)]
pub struct RecordingCredentialOps {
    state: Arc<Mutex<CredState>>,
}

impl RecordingCredentialOps {
    /// Starts out as root
    pub fn root() -> Self {
        let root_uid = Uid::from_raw(0);
        let root_gid = Gid::from_raw(0);
        Self {
            state: Arc::new(Mutex::new(CredState {
                ids: CurrentIds {
                    uids: [root_uid; 3],
                    gids: [root_gid; 3],
                    groups: vec![root_gid],
                },
                steps: Vec::new(),
                fail_at: None,
                keep_saved_uid: false,
            })),
        }
    }

    /// Make the named step (`setgroups`, `setgid`, `setuid`) fail with EPERM
    pub fn fail_at(&self, step: &'static str) {
        self.state.lock().fail_at = Some(step);
    }

    /// Leave the saved uid at root, as a plain setuid by a non-root caller would
    pub fn keep_saved_uid(&self) {
        self.state.lock().keep_saved_uid = true;
    }

    pub fn steps(&self) -> Vec<CredentialStep> {
        self.state.lock().steps.clone()
    }

    fn check(state: &CredState, step: &str) -> nix::Result<()> {
        if state.fail_at == Some(step) {
            return Err(Errno::EPERM);
        }
        // Only root may change credentials
        if state.ids.uids[1].as_raw() != 0 {
            return Err(Errno::EPERM);
        }
        Ok(())
    }
}

impl CredentialOps for RecordingCredentialOps {
    fn set_groups(&self, groups: &[Gid]) -> nix::Result<()> {
        let mut state = self.state.lock();
        Self::check(&state, "setgroups")?;
        state.ids.groups = groups.to_vec();
        state.steps.push(CredentialStep::SetGroups(groups.to_vec()));
        Ok(())
    }

    fn set_gid(&self, gid: Gid) -> nix::Result<()> {
        let mut state = self.state.lock();
        Self::check(&state, "setgid")?;
        state.ids.gids = [gid; 3];
        state.steps.push(CredentialStep::SetGid(gid));
        Ok(())
    }

    fn set_uid(&self, uid: Uid) -> nix::Result<()> {
        let mut state = self.state.lock();
        Self::check(&state, "setuid")?;
        let saved = if state.keep_saved_uid {
            state.ids.uids[2]
        } else {
            uid
        };
        state.ids.uids = [uid, uid, saved];
        state.steps.push(CredentialStep::SetUid(uid));
        Ok(())
    }

    fn current(&self) -> nix::Result<CurrentIds> {
        Ok(self.state.lock().ids.clone())
    }
}
