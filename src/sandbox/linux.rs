/*!
 * Linux Mount Implementation
 * tmpfs, overlayfs and bind mounts through mount(2)
 */

use super::mountinfo;
use super::traits::*;
use crate::monitoring::span_step;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd::{Gid, Uid};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Mount provider backed by the running kernel
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxMountProvider;

impl LinuxMountProvider {
    pub fn new() -> Self {
        Self
    }

    /// Overlay mount data; paths containing `,` `:` or `\` are rejected upstream
    pub fn overlay_options(lower: &Path, upper: &Path, work: &Path) -> String {
        format!(
            "lowerdir={},upperdir={},workdir={}",
            lower.display(),
            upper.display(),
            work.display()
        )
    }
}

impl MountProvider for LinuxMountProvider {
    fn mount_tmpfs(&self, source: &str, target: &Path) -> MountOpResult {
        let timed = span_step("mount_tmpfs", target.display().to_string());
        let _entered = timed.enter();
        mount(
            Some(source),
            target,
            Some("tmpfs"),
            MsFlags::empty(),
            None::<&str>,
        )
    }

    fn mount_overlay(
        &self,
        lower: &Path,
        upper: &Path,
        work: &Path,
        target: &Path,
    ) -> MountOpResult {
        let timed = span_step("mount_overlay", target.display().to_string());
        let _entered = timed.enter();
        let options = Self::overlay_options(lower, upper, work);
        debug!(target = %target.display(), options = %options, "Mounting overlay");
        mount(
            Some(crate::core::limits::OVERLAY_SOURCE),
            target,
            Some("overlay"),
            MsFlags::empty(),
            Some(options.as_str()),
        )
    }

    fn bind(&self, source: &Path, target: &Path) -> MountOpResult {
        let timed = span_step("bind", target.display().to_string());
        let _entered = timed.enter();
        mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
    }

    fn unmount(&self, target: &Path, detach: bool) -> MountOpResult {
        let timed = span_step("unmount", target.display().to_string());
        let _entered = timed.enter();
        let flags = if detach {
            MntFlags::MNT_DETACH
        } else {
            MntFlags::empty()
        };
        umount2(target, flags)
    }

    fn mount_points_under(&self, root: &Path) -> std::io::Result<Vec<PathBuf>> {
        mountinfo::read_mounts_under(root)
    }

    fn chown(&self, path: &Path, uid: Uid, gid: Gid) -> std::io::Result<()> {
        std::os::unix::fs::lchown(path, Some(uid.as_raw()), Some(gid.as_raw()))
    }
}
