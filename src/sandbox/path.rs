/*!
 * Rooted Path Handling
 * Canonicalizes host paths once and resolves sandbox paths against the merged root
 */

use crate::core::limits::MAX_SYMLINK_HOPS;
use std::io::{Error, ErrorKind};
use std::path::{Component, Path, PathBuf};

/// Canonicalized host path, resolved once so later checks see the same file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathHandle {
    canonical: PathBuf,
}

impl PathHandle {
    /// Canonicalize an existing path
    pub fn new(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            canonical: path.canonicalize()?,
        })
    }

    /// Canonicalize, falling back to the parent for a path that does not exist yet
    pub fn try_new(path: &Path) -> std::io::Result<Self> {
        if path.exists() {
            return Self::new(path);
        }
        match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => Ok(Self {
                canonical: Self::try_new(parent)?.canonical.join(name),
            }),
            _ => Ok(Self {
                canonical: path.to_path_buf(),
            }),
        }
    }

    pub fn as_path(&self) -> &Path {
        &self.canonical
    }

    pub fn is_within(&self, base: &PathHandle) -> bool {
        self.canonical.starts_with(&base.canonical)
    }
}

/// Resolve `path` as the sandbox would see it, with `root` acting as `/`
///
/// Symlinks in intermediate components are followed relative to `root`
/// (an absolute link target restarts at `root`, `..` never climbs above it).
/// The final component is not followed. The result always lies under `root`;
/// components that do not exist yet are appended unresolved.
pub fn resolve_in_root(root: &Path, path: &Path) -> std::io::Result<PathBuf> {
    if !path.is_absolute() {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!("sandbox path must be absolute: {}", path.display()),
        ));
    }

    // Pending components, consumed from the end
    let mut pending: Vec<PathBuf> = components_rev(path);
    let mut resolved: Vec<std::ffi::OsString> = Vec::new();
    let mut hops = 0;

    while let Some(component) = pending.pop() {
        let name = component.as_os_str();
        if name == ".." {
            resolved.pop();
            continue;
        }

        let candidate = join_all(root, &resolved).join(name);
        let is_last = pending.is_empty();
        let link = if is_last {
            None
        } else {
            match std::fs::symlink_metadata(&candidate) {
                Ok(meta) if meta.file_type().is_symlink() => Some(std::fs::read_link(&candidate)?),
                _ => None,
            }
        };

        match link {
            Some(target) => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(Error::new(
                        ErrorKind::Other,
                        format!("too many symlinks resolving {}", path.display()),
                    ));
                }
                if target.is_absolute() {
                    resolved.clear();
                }
                pending.extend(components_rev(&target));
            }
            None => resolved.push(name.to_os_string()),
        }
    }

    Ok(join_all(root, &resolved))
}

/// Normal and parent components of `path`, last component first
fn components_rev(path: &Path) -> Vec<PathBuf> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(PathBuf::from(name)),
            Component::ParentDir => Some(PathBuf::from("..")),
            _ => None,
        })
        .rev()
        .collect()
}

fn join_all(root: &Path, parts: &[std::ffi::OsString]) -> PathBuf {
    parts.iter().fold(root.to_path_buf(), |acc, p| acc.join(p))
}
