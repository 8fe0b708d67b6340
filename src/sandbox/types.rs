/*!
 * Sandbox Types
 * Layout, lifecycle state and the persisted instance record
 */

use super::passthrough::PassthroughPath;
use crate::core::errors::{VelenError, VelenResult};
use crate::core::limits::*;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle state of the single sandbox instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    /// Root path does not exist
    Absent,
    /// Root created, mounts in progress (or a prepare crashed)
    Preparing,
    /// Fully mounted and usable by run
    Active,
    /// Teardown in progress (or a destroy failed part way)
    Destroying,
}

impl SandboxState {
    /// States in which the root path exists
    pub fn is_present(self) -> bool {
        !matches!(self, SandboxState::Absent)
    }
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            SandboxState::Absent => "absent",
            SandboxState::Preparing => "preparing",
            SandboxState::Active => "active",
            SandboxState::Destroying => "destroying",
        };
        f.write_str(name)
    }
}

/// Paths making up a sandbox rooted at one directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLayout {
    pub root: PathBuf,
    /// tmpfs holding upper and work
    pub top: PathBuf,
    pub upper: PathBuf,
    pub work: PathBuf,
    /// Merged view, the future `/`
    pub merged: PathBuf,
    pub record: PathBuf,
}

impl SandboxLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let top = root.join(TOP_DIR);
        Self {
            upper: top.join(UPPER_DIR),
            work: top.join(WORK_DIR),
            merged: root.join(OVERLAY_DIR),
            record: root.join(RECORD_FILE),
            top,
            root,
        }
    }
}

impl Default for SandboxLayout {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

/// The sandbox instance as recorded on disk next to its mounts
///
/// The record lets a later `destroy` (a different process) know which mount
/// points to remove, in which order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxInstance {
    pub state: SandboxState,
    pub root: PathBuf,
    pub upper: PathBuf,
    pub work: PathBuf,
    pub merged: PathBuf,
    pub passthrough: Vec<PassthroughPath>,
    /// Paths chowned to the account inside the merged view
    #[serde(default)]
    pub claimed: Vec<PathBuf>,
    /// Every mount point created, in creation order
    #[serde(default)]
    pub mounts: Vec<PathBuf>,
    pub created_at: u64,
    pub owner_pid: u32,
}

impl SandboxInstance {
    pub fn new(layout: &SandboxLayout, passthrough: Vec<PassthroughPath>) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            state: SandboxState::Preparing,
            root: layout.root.clone(),
            upper: layout.upper.clone(),
            work: layout.work.clone(),
            merged: layout.merged.clone(),
            passthrough,
            claimed: Vec::new(),
            mounts: Vec::new(),
            created_at,
            owner_pid: std::process::id(),
        }
    }

    /// Read the record; `Ok(None)` when it does not exist
    pub fn load(path: &Path) -> VelenResult<Option<Self>> {
        match std::fs::read(path) {
            Ok(raw) => serde_json::from_slice(&raw).map(Some).map_err(|e| VelenError::Io {
                path: path.to_path_buf(),
                reason: format!("corrupt instance record: {}", e),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VelenError::io(path, e)),
        }
    }

    /// Write the record atomically (temp file + rename)
    pub fn store(&self, path: &Path) -> VelenResult<()> {
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec_pretty(self).map_err(|e| VelenError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut file = std::fs::File::create(&tmp).map_err(|e| VelenError::io(&tmp, e))?;
        file.write_all(&raw)
            .and_then(|_| file.sync_all())
            .map_err(|e| VelenError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| VelenError::io(path, e))
    }
}
