/*!
 * Lifecycle Controller
 * Owns the single sandbox instance and its state transitions
 *
 * ABSENT --prepare--> PREPARING --> ACTIVE --destroy--> DESTROYING --> ABSENT
 *
 * The on-disk root and instance record are authoritative across processes;
 * the in-process lock only serializes prepare and destroy within one process.
 */

use super::linux::LinuxMountProvider;
use super::overlay::{OverlayMounter, PrepareRequest};
use super::traits::MountProvider;
use super::types::{SandboxInstance, SandboxLayout, SandboxState};
use super::unmount::UnmountPolicy;
use crate::core::config::VelenConfig;
use crate::core::errors::{VelenError, VelenResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub struct LifecycleController {
    layout: SandboxLayout,
    mounter: OverlayMounter,
    lock: Mutex<()>,
}

impl LifecycleController {
    pub fn new(layout: SandboxLayout, provider: Arc<dyn MountProvider>, policy: UnmountPolicy) -> Self {
        Self {
            layout,
            mounter: OverlayMounter::new(provider, policy),
            lock: Mutex::new(()),
        }
    }

    /// Controller for the configured root with real mounts
    pub fn from_config(config: &VelenConfig) -> Self {
        Self::with_provider(config, Arc::new(LinuxMountProvider::new()))
    }

    pub fn with_provider(config: &VelenConfig, provider: Arc<dyn MountProvider>) -> Self {
        Self::new(
            SandboxLayout::new(&config.root),
            provider,
            UnmountPolicy::new(config.unmount_retries, config.unmount_backoff()),
        )
    }

    pub fn layout(&self) -> &SandboxLayout {
        &self.layout
    }

    pub fn provider(&self) -> &Arc<dyn MountProvider> {
        self.mounter.provider()
    }

    /// Current state as seen on disk
    ///
    /// A root without a readable record counts as `Preparing`: either a
    /// prepare is in flight or one crashed, and only destroy may proceed.
    pub fn state(&self) -> SandboxState {
        if std::fs::symlink_metadata(&self.layout.root).is_err() {
            return SandboxState::Absent;
        }
        match SandboxInstance::load(&self.layout.record) {
            Ok(Some(record)) => record.state,
            Ok(None) => SandboxState::Preparing,
            Err(e) => {
                warn!(error = %e, "Unreadable instance record");
                SandboxState::Preparing
            }
        }
    }

    /// The instance record, if the sandbox exists and has one
    ///
    /// Always re-read from disk, since another process may have changed it.
    pub fn instance(&self) -> VelenResult<Option<SandboxInstance>> {
        if std::fs::symlink_metadata(&self.layout.root).is_err() {
            return Ok(None);
        }
        SandboxInstance::load(&self.layout.record)
    }

    #[instrument(skip(self, request), fields(root = %self.layout.root.display()))]
    pub fn prepare(&self, request: &PrepareRequest) -> VelenResult<SandboxInstance> {
        let _lock = self.lock.lock();
        self.mounter.prepare(&self.layout, request)
    }

    #[instrument(skip(self), fields(root = %self.layout.root.display()))]
    pub fn destroy(&self) -> VelenResult<()> {
        let _lock = self.lock.lock();
        self.mounter.destroy(&self.layout)
    }

    /// The instance, provided it is fully prepared
    pub fn ensure_active(&self) -> VelenResult<SandboxInstance> {
        let state = self.state();
        if state != SandboxState::Active {
            debug!(state = %state, "Sandbox not active");
            return Err(VelenError::NotActive(self.layout.root.clone()));
        }
        self.instance()?
            .ok_or_else(|| VelenError::NotActive(self.layout.root.clone()))
    }
}
