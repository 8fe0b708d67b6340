/*!
 * Simulation Mounts
 * In-memory mount table with failure and busy injection
 */

use super::traits::*;
use nix::errno::Errno;
use nix::unistd::{Gid, Uid};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Kind of a simulated mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimMountKind {
    Tmpfs { source: String },
    Overlay { lower: PathBuf, upper: PathBuf, work: PathBuf },
    Bind { source: PathBuf },
}

/// Operation recorded in the simulation log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOp {
    Mount(PathBuf),
    Unmount(PathBuf),
    Detach(PathBuf),
    Chown(PathBuf, Uid, Gid),
}

#[derive(Debug, Default)]
struct SimState {
    /// Mounts in creation order; later entries cover earlier ones
    table: Vec<(PathBuf, SimMountKind)>,
    log: Vec<MountOp>,
    mount_failures: HashMap<PathBuf, Errno>,
    unmount_failures: HashMap<PathBuf, Errno>,
    /// Remaining EBUSY answers per target
    busy: HashMap<PathBuf, u32>,
    chown_failures: Vec<PathBuf>,
}

/// Simulated mount table
///
/// Mount targets must exist on the real filesystem (tests use a temp
/// directory), so directory handling around mounts stays real while the
/// mounts themselves only live in memory.
#[derive(Debug, Clone, Default)]
pub struct SimulatedMounts {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedMounts {
    pub fn new() -> Self {
        info!("Mount provider initialized (simulation mode)");
        Self::default()
    }

    /// Make the next mount on `target` fail with `errno`
    pub fn fail_mount_at(&self, target: impl Into<PathBuf>, errno: Errno) {
        self.state.lock().mount_failures.insert(target.into(), errno);
    }

    /// Make every unmount of `target` fail with `errno`
    pub fn fail_unmount_at(&self, target: impl Into<PathBuf>, errno: Errno) {
        self.state.lock().unmount_failures.insert(target.into(), errno);
    }

    /// Answer EBUSY to the next `times` non-lazy unmounts of `target`
    pub fn busy_for(&self, target: impl Into<PathBuf>, times: u32) {
        self.state.lock().busy.insert(target.into(), times);
    }

    pub fn fail_chown_at(&self, path: impl Into<PathBuf>) {
        self.state.lock().chown_failures.push(path.into());
    }

    /// Current mount points, oldest first
    pub fn mount_points(&self) -> Vec<PathBuf> {
        self.state.lock().table.iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn mounts(&self) -> Vec<(PathBuf, SimMountKind)> {
        self.state.lock().table.clone()
    }

    pub fn is_mounted(&self, target: &Path) -> bool {
        self.state.lock().table.iter().any(|(p, _)| p == target)
    }

    /// Every operation performed, in order
    pub fn log(&self) -> Vec<MountOp> {
        self.state.lock().log.clone()
    }

    /// Targets of successful unmounts (lazy or not), in order
    pub fn unmounted(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .log
            .iter()
            .filter_map(|op| match op {
                MountOp::Unmount(p) | MountOp::Detach(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    /// Insert a mount directly, as if left behind by another process
    pub fn inject(&self, target: impl Into<PathBuf>, kind: SimMountKind) {
        self.state.lock().table.push((target.into(), kind));
    }

    fn add(&self, target: &Path, kind: SimMountKind) -> MountOpResult {
        let mut state = self.state.lock();
        if let Some(errno) = state.mount_failures.remove(target) {
            return Err(errno);
        }
        if !target.exists() {
            return Err(Errno::ENOENT);
        }
        state.table.push((target.to_path_buf(), kind));
        state.log.push(MountOp::Mount(target.to_path_buf()));
        Ok(())
    }
}

impl MountProvider for SimulatedMounts {
    fn mount_tmpfs(&self, source: &str, target: &Path) -> MountOpResult {
        self.add(
            target,
            SimMountKind::Tmpfs {
                source: source.to_string(),
            },
        )
    }

    fn mount_overlay(
        &self,
        lower: &Path,
        upper: &Path,
        work: &Path,
        target: &Path,
    ) -> MountOpResult {
        if !upper.exists() || !work.exists() {
            return Err(Errno::ENOENT);
        }
        self.add(
            target,
            SimMountKind::Overlay {
                lower: lower.to_path_buf(),
                upper: upper.to_path_buf(),
                work: work.to_path_buf(),
            },
        )
    }

    fn bind(&self, source: &Path, target: &Path) -> MountOpResult {
        if !source.exists() {
            return Err(Errno::ENOENT);
        }
        self.add(
            target,
            SimMountKind::Bind {
                source: source.to_path_buf(),
            },
        )
    }

    fn unmount(&self, target: &Path, detach: bool) -> MountOpResult {
        let mut state = self.state.lock();
        if let Some(errno) = state.unmount_failures.get(target) {
            return Err(*errno);
        }

        let Some(index) = state.table.iter().rposition(|(p, _)| p == target) else {
            return if target.exists() {
                Err(Errno::EINVAL)
            } else {
                Err(Errno::ENOENT)
            };
        };

        if detach {
            // Lazy unmount takes the whole subtree with it
            let mut i = state.table.len();
            while i > index {
                i -= 1;
                if state.table[i].0.starts_with(target) {
                    state.table.remove(i);
                }
            }
            state.log.push(MountOp::Detach(target.to_path_buf()));
            return Ok(());
        }

        if let Some(remaining) = state.busy.get_mut(target) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Errno::EBUSY);
            }
        }

        let covered = state.table[index + 1..]
            .iter()
            .any(|(p, _)| p.starts_with(target));
        if covered {
            return Err(Errno::EBUSY);
        }

        state.table.remove(index);
        state.log.push(MountOp::Unmount(target.to_path_buf()));
        Ok(())
    }

    fn mount_points_under(&self, root: &Path) -> std::io::Result<Vec<PathBuf>> {
        Ok(self
            .state
            .lock()
            .table
            .iter()
            .rev()
            .filter(|(p, _)| p.starts_with(root))
            .map(|(p, _)| p.clone())
            .collect())
    }

    fn chown(&self, path: &Path, uid: Uid, gid: Gid) -> std::io::Result<()> {
        let mut state = self.state.lock();
        if state.chown_failures.iter().any(|p| p == path) {
            return Err(std::io::Error::from_raw_os_error(Errno::EPERM as i32));
        }
        if std::fs::symlink_metadata(path).is_err() {
            return Err(std::io::Error::from_raw_os_error(Errno::ENOENT as i32));
        }
        state.log.push(MountOp::Chown(path.to_path_buf(), uid, gid));
        Ok(())
    }
}
