/*!
 * Confinement
 * Private mount namespace with the merged view pivoted to `/`
 */

use crate::core::errors::{VelenError, VelenResult};
use crate::monitoring::span_step;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::unistd::{chdir, pivot_root};
use std::path::Path;
use tracing::{debug, info};

/// Moves the calling process into the sandbox root
pub trait Confiner: Send + Sync {
    /// Enter `merged` as the new `/`; nothing outside it stays reachable
    fn enter(&self, merged: &Path) -> VelenResult<()>;
}

/// Confiner using mount namespaces and pivot_root
#[derive(Debug, Clone, Copy)]
pub struct LinuxConfiner {
    /// Mount a fresh proc at /proc after the pivot
    pub mount_proc: bool,
    /// Recursively bind the host /dev before the pivot
    pub bind_dev: bool,
}

impl LinuxConfiner {
    pub fn new(mount_proc: bool, bind_dev: bool) -> Self {
        Self {
            mount_proc,
            bind_dev,
        }
    }
}

impl Default for LinuxConfiner {
    fn default() -> Self {
        Self::new(true, true)
    }
}

fn step<T>(name: &str, result: nix::Result<T>) -> VelenResult<T> {
    result.map_err(|errno| VelenError::confinement(name, errno.desc()))
}

impl Confiner for LinuxConfiner {
    fn enter(&self, merged: &Path) -> VelenResult<()> {
        let timed = span_step("confine", merged.display().to_string());
        let _entered = timed.enter();

        step("unshare", unshare(CloneFlags::CLONE_NEWNS))?;

        // Nothing below may propagate back to the host table
        step(
            "make-private",
            mount(
                None::<&str>,
                "/",
                None::<&str>,
                MsFlags::MS_REC | MsFlags::MS_PRIVATE,
                None::<&str>,
            ),
        )?;

        step(
            "bind-root",
            mount(
                Some(merged),
                merged,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REC,
                None::<&str>,
            ),
        )?;

        if self.bind_dev {
            let dev = merged.join("dev");
            step(
                "bind-dev",
                mount(
                    Some("/dev"),
                    &dev,
                    None::<&str>,
                    MsFlags::MS_BIND | MsFlags::MS_REC,
                    None::<&str>,
                ),
            )?;
        }

        step("chdir", chdir(merged))?;
        step("pivot_root", pivot_root(".", "."))?;
        // The old root now sits on top of the new one at "."
        step("detach-old-root", umount2(".", MntFlags::MNT_DETACH))?;
        step("chdir", chdir("/"))?;

        if self.mount_proc {
            step(
                "mount-proc",
                mount(
                    Some("proc"),
                    "/proc",
                    Some("proc"),
                    MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
                    None::<&str>,
                ),
            )?;
        }

        debug!(proc = self.mount_proc, dev = self.bind_dev, "Runtime mounts ready");
        info!(root = %merged.display(), "Entered sandbox");
        Ok(())
    }
}
