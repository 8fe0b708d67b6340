/*!
 * Passthrough Paths
 * Host paths bound into the merged view so changes reach the host in real time
 */

use super::path::{resolve_in_root, PathHandle};
use super::traits::MountProvider;
use crate::core::errors::{VelenError, VelenResult};
use crate::core::guard::{ScopedGuard, TransactionGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// A host path exposed inside the sandbox, `HOST[:SANDBOX]` on the command line
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PassthroughPath {
    pub host_path: PathBuf,
    pub sandbox_path: PathBuf,
}

impl PassthroughPath {
    /// Same path on both sides
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let host_path = path.into();
        Self {
            sandbox_path: host_path.clone(),
            host_path,
        }
    }

    pub fn with_target(host: impl Into<PathBuf>, sandbox: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host.into(),
            sandbox_path: sandbox.into(),
        }
    }
}

impl FromStr for PassthroughPath {
    type Err = VelenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, sandbox) = match s.split_once(':') {
            Some((host, sandbox)) => (host, sandbox),
            None => (s, s),
        };
        let host = check_syntax(s, host)?;
        let sandbox = check_syntax(s, sandbox)?;
        Ok(Self::with_target(host, sandbox))
    }
}

impl std::fmt::Display for PassthroughPath {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.host_path == self.sandbox_path {
            write!(f, "{}", self.host_path.display())
        } else {
            write!(
                f,
                "{}:{}",
                self.host_path.display(),
                self.sandbox_path.display()
            )
        }
    }
}

fn check_syntax(entry: &str, part: &str) -> VelenResult<PathBuf> {
    let path = Path::new(part);
    if part.is_empty() || !path.is_absolute() {
        return Err(VelenError::InvalidConfig(format!(
            "passthrough path must be absolute: {}",
            entry
        )));
    }
    if !path.components().any(|c| matches!(c, Component::Normal(_))) {
        return Err(VelenError::InvalidConfig(format!(
            "the filesystem root cannot be a passthrough path: {}",
            entry
        )));
    }
    Ok(path.to_path_buf())
}

/// Validates passthrough paths and binds them into the merged view
pub struct PassthroughBinder {
    provider: Arc<dyn MountProvider>,
}

impl PassthroughBinder {
    pub fn new(provider: Arc<dyn MountProvider>) -> Self {
        Self { provider }
    }

    /// Check every path against the host and each other before anything is mounted
    ///
    /// Returns the paths with canonical host sides, sorted so a parent target
    /// is bound before anything below it.
    pub fn validate_all(
        &self,
        root: &Path,
        paths: &[PassthroughPath],
    ) -> VelenResult<Vec<PassthroughPath>> {
        let root = PathHandle::try_new(root).map_err(|e| VelenError::io(root, e))?;
        let mut targets = HashSet::new();
        let mut checked = Vec::with_capacity(paths.len());

        for path in paths {
            let host = PathHandle::new(&path.host_path).map_err(|e| {
                VelenError::InvalidConfig(format!(
                    "passthrough host path {}: {}",
                    path.host_path.display(),
                    e
                ))
            })?;

            if host.as_path() == Path::new("/") {
                return Err(VelenError::InvalidConfig(format!(
                    "{} resolves to the filesystem root",
                    path.host_path.display()
                )));
            }
            if host.is_within(&root) || path.sandbox_path.starts_with(root.as_path()) {
                return Err(VelenError::InvalidConfig(format!(
                    "passthrough path {} lies inside the sandbox root {}",
                    path,
                    root.as_path().display()
                )));
            }
            if !targets.insert(path.sandbox_path.clone()) {
                return Err(VelenError::InvalidConfig(format!(
                    "duplicate passthrough target {}",
                    path.sandbox_path.display()
                )));
            }

            checked.push(PassthroughPath::with_target(
                host.as_path(),
                path.sandbox_path.clone(),
            ));
        }

        checked.sort_by(|a, b| a.sandbox_path.cmp(&b.sandbox_path));
        Ok(checked)
    }

    /// Bind each path into `merged`, recording an undo step per mount
    ///
    /// Returns the bind targets in mount order.
    pub fn bind_all(
        &self,
        merged: &Path,
        paths: &[PassthroughPath],
        tx: &mut TransactionGuard,
    ) -> VelenResult<Vec<PathBuf>> {
        let mut targets = Vec::with_capacity(paths.len());

        for path in paths {
            let target = resolve_in_root(merged, &path.sandbox_path)
                .map_err(|e| VelenError::mount(&path.sandbox_path, e))?;
            ensure_target(&path.host_path, &target)?;

            self.provider
                .bind(&path.host_path, &target)
                .map_err(|errno| VelenError::mount(&target, errno.desc()))?;
            info!(host = %path.host_path.display(), target = %target.display(), "Passthrough bound");

            let provider = self.provider.clone();
            let undo = target.clone();
            tx.push(ScopedGuard::new(
                "bind",
                target.display().to_string(),
                move || provider.unmount(&undo, true).map_err(|e| e.to_string()),
            ));
            targets.push(target);
        }

        Ok(targets)
    }
}

/// Make sure a bind target exists with the same type as its host path
fn ensure_target(host: &Path, target: &Path) -> VelenResult<()> {
    match std::fs::symlink_metadata(target) {
        Ok(meta) if meta.file_type().is_symlink() => {
            return Err(VelenError::mount(target, "bind target is a symlink"));
        }
        Ok(_) => return Ok(()),
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            return Err(VelenError::mount(target, e));
        }
        Err(_) => {}
    }

    let host_is_dir = std::fs::metadata(host)
        .map_err(|e| VelenError::io(host, e))?
        .is_dir();
    debug!(target = %target.display(), dir = host_is_dir, "Creating bind target");

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| VelenError::mount(target, e))?;
    }
    let created = if host_is_dir {
        std::fs::create_dir(target)
    } else {
        std::fs::File::create(target).map(|_| ())
    };
    created.map_err(|e| VelenError::mount(target, e))
}
