/*!
 * Mount Traits
 * Platform-agnostic abstraction over the host mount table
 */

use nix::errno::Errno;
use nix::unistd::{Gid, Uid};
use std::path::{Path, PathBuf};

/// Result of a single mount table operation, keeping the raw errno so callers
/// can tell "busy" from "not mounted"
pub type MountOpResult = Result<(), Errno>;

/// Mount table operations used to build and tear down a sandbox
pub trait MountProvider: Send + Sync {
    /// Mount a fresh tmpfs named `source` on `target`
    fn mount_tmpfs(&self, source: &str, target: &Path) -> MountOpResult;

    /// Mount an overlay of `lower` (read-only) and `upper` on `target`
    fn mount_overlay(&self, lower: &Path, upper: &Path, work: &Path, target: &Path)
        -> MountOpResult;

    /// Bind `source` onto `target` (non-recursive)
    fn bind(&self, source: &Path, target: &Path) -> MountOpResult;

    /// Unmount `target`; `detach` requests a lazy unmount
    fn unmount(&self, target: &Path, detach: bool) -> MountOpResult;

    /// Mount points at or below `root`, in the order they should be unmounted
    fn mount_points_under(&self, root: &Path) -> std::io::Result<Vec<PathBuf>>;

    /// Change ownership of `path` without following a final symlink
    fn chown(&self, path: &Path, uid: Uid, gid: Gid) -> std::io::Result<()>;
}
