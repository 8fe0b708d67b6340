/*!
 * Overlay Mounter
 * Builds the union view of the host root and tears it down again
 *
 * Prepare runs as one transaction: every completed step records its undo,
 * and any failure unwinds the steps newest first. Destroy is best effort:
 * every step is attempted and the first failure is reported.
 */

use super::passthrough::{PassthroughBinder, PassthroughPath};
use super::path::resolve_in_root;
use super::traits::MountProvider;
use super::types::{SandboxInstance, SandboxLayout, SandboxState};
use super::unmount::{unmount_with_retry, UnmountPolicy, Unmounted};
use crate::core::errors::{VelenError, VelenResult};
use crate::core::guard::{ScopedGuard, TransactionGuard};
use crate::core::limits::{DIR_MODE, TMPFS_SOURCE};
use nix::unistd::{Gid, Uid};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Everything prepare needs besides the layout
#[derive(Debug, Clone, Default)]
pub struct PrepareRequest {
    pub passthrough: Vec<PassthroughPath>,
    /// Paths inside the merged view handed to `claim_owner`
    pub claims: Vec<PathBuf>,
    pub claim_owner: Option<(Uid, Gid)>,
}

impl PrepareRequest {
    pub fn new(passthrough: Vec<PassthroughPath>) -> Self {
        Self {
            passthrough,
            ..Default::default()
        }
    }
}

pub struct OverlayMounter {
    provider: Arc<dyn MountProvider>,
    binder: PassthroughBinder,
    policy: UnmountPolicy,
}

impl OverlayMounter {
    pub fn new(provider: Arc<dyn MountProvider>, policy: UnmountPolicy) -> Self {
        Self {
            binder: PassthroughBinder::new(provider.clone()),
            provider,
            policy,
        }
    }

    pub fn provider(&self) -> &Arc<dyn MountProvider> {
        &self.provider
    }

    /// Create the sandbox described by `layout`
    ///
    /// Fails with `AlreadyActive` before touching anything when the root exists.
    pub fn prepare(
        &self,
        layout: &SandboxLayout,
        request: &PrepareRequest,
    ) -> VelenResult<SandboxInstance> {
        check_layout(layout)?;
        let passthrough = self.binder.validate_all(&layout.root, &request.passthrough)?;

        if let Some(parent) = layout.root.parent() {
            std::fs::create_dir_all(parent).map_err(|e| VelenError::io(parent, e))?;
        }
        match make_dir(&layout.root) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(VelenError::AlreadyActive(layout.root.clone()));
            }
            Err(e) => return Err(VelenError::io(&layout.root, e)),
        }

        let mut tx = TransactionGuard::begin("prepare");
        tx.push(remove_dir_guard(&layout.root));

        let mut instance = SandboxInstance::new(layout, passthrough);
        instance.store(&layout.record)?;
        let record = layout.record.clone();
        tx.push(ScopedGuard::new(
            "record",
            record.display().to_string(),
            move || std::fs::remove_file(&record).map_err(|e| e.to_string()),
        ));

        // tmpfs for upper and work, so nothing written in the sandbox touches a real disk
        make_dir(&layout.top).map_err(|e| VelenError::io(&layout.top, e))?;
        tx.push(self.clear_dir_guard(&layout.top));
        self.provider
            .mount_tmpfs(TMPFS_SOURCE, &layout.top)
            .map_err(|errno| VelenError::mount(&layout.top, errno.desc()))?;
        tx.push(self.detach_guard(&layout.top));
        instance.mounts.push(layout.top.clone());

        make_dir(&layout.upper).map_err(|e| VelenError::io(&layout.upper, e))?;
        make_dir(&layout.work).map_err(|e| VelenError::io(&layout.work, e))?;

        make_dir(&layout.merged).map_err(|e| VelenError::io(&layout.merged, e))?;
        tx.push(self.clear_dir_guard(&layout.merged));
        self.provider
            .mount_overlay(Path::new("/"), &layout.upper, &layout.work, &layout.merged)
            .map_err(|errno| VelenError::mount(&layout.merged, errno.desc()))?;
        tx.push(self.detach_guard(&layout.merged));
        instance.mounts.push(layout.merged.clone());

        let binds = self
            .binder
            .bind_all(&layout.merged, &instance.passthrough, &mut tx)?;
        instance.mounts.extend(binds);

        instance.claimed = self.claim(&layout.merged, request);

        instance.state = SandboxState::Active;
        instance.store(&layout.record)?;
        tx.commit().map_err(|e| VelenError::Io {
            path: layout.root.clone(),
            reason: e.to_string(),
        })?;

        info!(
            root = %layout.root.display(),
            passthrough = instance.passthrough.len(),
            claimed = instance.claimed.len(),
            "Sandbox prepared"
        );
        Ok(instance)
    }

    /// Tear down the sandbox at `layout`
    ///
    /// Fails with `NotActive` when the root does not exist. On any failure the
    /// root is kept so destroy can be retried.
    pub fn destroy(&self, layout: &SandboxLayout) -> VelenResult<()> {
        if std::fs::symlink_metadata(&layout.root).is_err() {
            return Err(VelenError::NotActive(layout.root.clone()));
        }

        let record = match SandboxInstance::load(&layout.record) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable instance record");
                None
            }
        };
        if let Some(mut record) = record.clone() {
            record.state = SandboxState::Destroying;
            if let Err(e) = record.store(&layout.record) {
                warn!(error = %e, "Could not mark instance as destroying");
            }
        }

        let mut errors = Vec::new();
        let mut failed = HashSet::new();

        let recorded = record.map(|r| r.mounts).unwrap_or_default();
        let table = match self.provider.mount_points_under(&layout.root) {
            Ok(table) => table,
            Err(e) => {
                warn!(error = %e, "Could not read mount table");
                Vec::new()
            }
        };
        for target in teardown_order(&recorded, &table) {
            if failed.contains(&target) {
                continue;
            }
            if !recorded.contains(&target) {
                warn!(target = %target.display(), "Unmounting unrecorded mount");
            }
            self.unmount_one(&target, &mut errors, &mut failed);
        }

        if errors.is_empty() {
            if let Err(e) = self.remove_layout(layout) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            info!(root = %layout.root.display(), "Sandbox destroyed");
            return Ok(());
        }
        for e in errors.iter().skip(1) {
            error!(error = %e, "Additional teardown failure");
        }
        Err(errors.swap_remove(0))
    }

    fn unmount_one(
        &self,
        target: &Path,
        errors: &mut Vec<VelenError>,
        failed: &mut HashSet<PathBuf>,
    ) {
        match unmount_with_retry(self.provider.as_ref(), target, self.policy) {
            Ok(Unmounted::Done) => info!(target = %target.display(), "Unmounted"),
            Ok(Unmounted::NotMounted) => {}
            Err(e) => {
                error!(target = %target.display(), error = %e, "Unmount failed");
                failed.insert(target.to_path_buf());
                errors.push(e);
            }
        }
    }

    /// Remove the directories once nothing is mounted below the root
    fn remove_layout(&self, layout: &SandboxLayout) -> VelenResult<()> {
        let teardown = |path: &Path, result: std::io::Result<()>| match result {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(VelenError::UnmountFailure {
                target: path.to_path_buf(),
                reason: e.to_string(),
            }),
            _ => Ok(()),
        };

        let provider = self.provider.as_ref();
        teardown(&layout.merged, remove_unmounted(provider, &layout.merged))?;
        teardown(&layout.top, remove_unmounted(provider, &layout.top))?;
        teardown(&layout.record, std::fs::remove_file(&layout.record))?;
        let tmp = layout.record.with_extension("json.tmp");
        teardown(&tmp, std::fs::remove_file(&tmp))?;
        teardown(&layout.root, std::fs::remove_dir(&layout.root))?;
        debug!(root = %layout.root.display(), "Sandbox directories removed");
        Ok(())
    }

    /// Chown claimed paths inside the merged view; failures are reported, not fatal
    fn claim(&self, merged: &Path, request: &PrepareRequest) -> Vec<PathBuf> {
        let Some((uid, gid)) = request.claim_owner else {
            if !request.claims.is_empty() {
                warn!("No owner resolved, skipping claimed paths");
            }
            return Vec::new();
        };

        let mut claimed = Vec::new();
        for path in &request.claims {
            let result = resolve_in_root(merged, path)
                .and_then(|inside| self.provider.chown(&inside, uid, gid));
            match result {
                Ok(()) => {
                    debug!(path = %path.display(), uid = uid.as_raw(), "Path claimed");
                    claimed.push(path.clone());
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to claim path"),
            }
        }
        claimed
    }

    /// Undo for a mount point directory; refuses while anything is mounted below it
    fn clear_dir_guard(&self, path: &Path) -> ScopedGuard {
        let provider = self.provider.clone();
        let path = path.to_path_buf();
        ScopedGuard::new("dir", path.display().to_string(), move || {
            remove_unmounted(provider.as_ref(), &path).map_err(|e| e.to_string())
        })
    }

    fn detach_guard(&self, target: &Path) -> ScopedGuard {
        let provider = self.provider.clone();
        let target = target.to_path_buf();
        ScopedGuard::new("mount", target.display().to_string(), move || {
            provider.unmount(&target, true).map_err(|e| e.to_string())
        })
    }
}

/// Every mount to take down, deepest first
///
/// The live table (newest first, stacked mounts listed once per layer) is
/// merged with the record, which still names mounts the table could not be
/// read for. Among equal depths the newer mount goes first.
fn teardown_order(recorded: &[PathBuf], table: &[PathBuf]) -> Vec<PathBuf> {
    let mut targets = table.to_vec();
    for target in recorded.iter().rev() {
        if !targets.contains(target) {
            targets.push(target.clone());
        }
    }
    targets.sort_by_key(|target| std::cmp::Reverse(target.components().count()));
    targets
}

fn make_dir(path: &Path) -> std::io::Result<()> {
    std::fs::DirBuilder::new().mode(DIR_MODE).create(path)
}

/// Remove `path` and its contents, but only when no mount remains at or below it
///
/// Contents are whatever the tmpfs or overlay left on the underlying
/// directory (a prepare that stopped before mounting).
fn remove_unmounted(provider: &dyn MountProvider, path: &Path) -> std::io::Result<()> {
    if let Some(mounted) = provider.mount_points_under(path)?.first() {
        return Err(std::io::Error::new(
            ErrorKind::Other,
            format!("{} is still mounted", mounted.display()),
        ));
    }
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn remove_dir_guard(path: &Path) -> ScopedGuard {
    let path = path.to_path_buf();
    ScopedGuard::new("dir", path.display().to_string(), move || {
        std::fs::remove_dir(&path).map_err(|e| e.to_string())
    })
}

/// Overlay mount data is comma separated, so layout paths must not contain separators
fn check_layout(layout: &SandboxLayout) -> VelenResult<()> {
    let raw = layout.root.to_string_lossy();
    if raw.contains([',', ':', '\\']) {
        return Err(VelenError::InvalidConfig(format!(
            "sandbox root contains an overlay option separator: {}",
            raw
        )));
    }
    Ok(())
}
