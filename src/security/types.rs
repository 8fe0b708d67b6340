/*!
 * Security Types
 * Resolved account credentials and the identity left after a drop
 */

use nix::unistd::{Gid, Uid};
use std::path::PathBuf;

/// Account credentials, resolved once per invocation and never cached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub name: String,
    pub uid: Uid,
    pub gid: Gid,
    /// Supplementary groups, primary group included
    pub groups: Vec<Gid>,
    pub home: PathBuf,
    pub shell: PathBuf,
}

/// Identity the process runs under after a successful drop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedIdentity {
    pub name: String,
    pub uid: Uid,
    pub gid: Gid,
    pub home: PathBuf,
    pub shell: PathBuf,
}

impl From<Credential> for DroppedIdentity {
    fn from(credential: Credential) -> Self {
        Self {
            name: credential.name,
            uid: credential.uid,
            gid: credential.gid,
            home: credential.home,
            shell: credential.shell,
        }
    }
}

/// Real, effective and saved ids plus supplementary groups of this process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentIds {
    pub uids: [Uid; 3],
    pub gids: [Gid; 3],
    pub groups: Vec<Gid>,
}

impl CurrentIds {
    /// Every uid and gid slot matches, so root cannot be regained
    pub fn is_exactly(&self, uid: Uid, gid: Gid) -> bool {
        self.uids.iter().all(|u| *u == uid) && self.gids.iter().all(|g| *g == gid)
    }
}

impl std::fmt::Display for CurrentIds {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "uid={}/{}/{} gid={}/{}/{} groups={:?}",
            self.uids[0],
            self.uids[1],
            self.uids[2],
            self.gids[0],
            self.gids[1],
            self.gids[2],
            self.groups.iter().map(|g| g.as_raw()).collect::<Vec<_>>()
        )
    }
}
