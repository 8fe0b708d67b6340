/*!
 * Configuration
 * Defaults, JSON config file and environment overrides
 */

use super::errors::{VelenError, VelenResult};
use super::limits::*;
use crate::sandbox::PassthroughPath;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VelenConfig {
    /// Sandbox root; `root/overlay` is the merged view
    pub root: PathBuf,
    /// Account commands are executed as
    pub account: String,
    /// Passthrough paths bound on every prepare, `HOST[:SANDBOX]`
    pub passthrough: Vec<String>,
    /// Inner shell used when the account's login shell is velen
    pub default_shell: PathBuf,
    pub unmount_retries: u32,
    pub unmount_backoff_ms: u64,
    /// Mount a fresh /proc inside the run namespace
    pub mount_proc: bool,
    /// Recursively bind the host /dev inside the run namespace
    pub bind_dev: bool,
}

impl Default for VelenConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            account: DEFAULT_ACCOUNT.to_string(),
            passthrough: Vec::new(),
            default_shell: PathBuf::from(DEFAULT_SHELL),
            unmount_retries: UNMOUNT_RETRIES,
            unmount_backoff_ms: UNMOUNT_BACKOFF.as_millis() as u64,
            mount_proc: true,
            bind_dev: true,
        }
    }
}

impl VelenConfig {
    /// Load configuration for this process
    ///
    /// Environment variables:
    /// - VELEN_CONFIG: config file path (default: /etc/velen/config.json)
    /// - VELEN_ROOT, VELEN_ACCOUNT: override single fields
    /// - VELEN_PASSTHROUGH: comma-separated passthrough entries, appended
    ///
    /// A set-user-ID invocation ignores the environment entirely.
    pub fn load() -> VelenResult<Self> {
        let privileged = is_setuid_invocation();
        let path = match std::env::var_os("VELEN_CONFIG") {
            Some(p) if !privileged => PathBuf::from(p),
            _ => PathBuf::from(SYSTEM_CONFIG_PATH),
        };

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };

        if privileged {
            debug!("Set-user-ID invocation, environment overrides ignored");
        } else {
            config.apply_env(|key| std::env::var(key).ok());
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file; absent fields keep their defaults
    pub fn from_file(path: &Path) -> VelenResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| VelenError::io(path, e))?;
        serde_json::from_str(&raw)
            .map_err(|e| VelenError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("VELEN_ROOT") {
            self.root = PathBuf::from(root);
        }
        if let Some(account) = lookup("VELEN_ACCOUNT") {
            self.account = account;
        }
        if let Some(extra) = lookup("VELEN_PASSTHROUGH") {
            self.passthrough
                .extend(extra.split(',').filter(|s| !s.is_empty()).map(String::from));
        }
    }

    pub fn validate(&self) -> VelenResult<()> {
        if !self.root.is_absolute() {
            return Err(VelenError::InvalidConfig(format!(
                "root must be absolute: {}",
                self.root.display()
            )));
        }
        if self.root.parent().is_none() {
            return Err(VelenError::InvalidConfig(
                "root cannot be the filesystem root".to_string(),
            ));
        }
        if self.account.trim().is_empty() {
            return Err(VelenError::InvalidConfig("account is empty".to_string()));
        }
        if !self.default_shell.is_absolute() {
            return Err(VelenError::InvalidConfig(format!(
                "default_shell must be absolute: {}",
                self.default_shell.display()
            )));
        }
        if self.unmount_retries == 0 {
            warn!("unmount_retries is 0, treating as a single attempt");
        }
        self.passthrough_paths().map(|_| ())
    }

    /// Configured passthrough entries, parsed
    pub fn passthrough_paths(&self) -> VelenResult<Vec<PassthroughPath>> {
        self.passthrough.iter().map(|s| s.parse()).collect()
    }

    pub fn unmount_backoff(&self) -> Duration {
        Duration::from_millis(self.unmount_backoff_ms)
    }
}

/// Real and effective uid differ, i.e. the binary runs set-user-ID
pub fn is_setuid_invocation() -> bool {
    nix::unistd::getuid() != nix::unistd::geteuid()
}
