/*!
 * Unmount Retry
 * Bounded retry with doubling backoff while a mount is busy
 */

use super::traits::MountProvider;
use crate::core::errors::{VelenError, VelenResult};
use nix::errno::Errno;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// How hard destroy tries before reporting a busy mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmountPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl UnmountPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }
}

impl Default for UnmountPolicy {
    fn default() -> Self {
        Self::new(
            crate::core::limits::UNMOUNT_RETRIES,
            crate::core::limits::UNMOUNT_BACKOFF,
        )
    }
}

/// Outcome of one successful unmount request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unmounted {
    Done,
    /// Nothing was mounted there (EINVAL or ENOENT)
    NotMounted,
}

/// Unmount `target`, retrying while the kernel answers EBUSY
pub fn unmount_with_retry(
    provider: &dyn MountProvider,
    target: &Path,
    policy: UnmountPolicy,
) -> VelenResult<Unmounted> {
    let mut delay = policy.backoff;

    for attempt in 1..=policy.attempts {
        match provider.unmount(target, false) {
            Ok(()) => {
                debug!(target = %target.display(), attempt, "Unmounted");
                return Ok(Unmounted::Done);
            }
            Err(Errno::EINVAL) | Err(Errno::ENOENT) => {
                debug!(target = %target.display(), "Not mounted");
                return Ok(Unmounted::NotMounted);
            }
            Err(Errno::EBUSY) if attempt < policy.attempts => {
                warn!(
                    target = %target.display(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Mount busy, retrying"
                );
                std::thread::sleep(delay);
                delay = delay.saturating_mul(2);
            }
            Err(Errno::EBUSY) => break,
            Err(errno) => {
                return Err(VelenError::UnmountFailure {
                    target: target.to_path_buf(),
                    reason: errno.desc().to_string(),
                })
            }
        }
    }

    Err(VelenError::UnmountBusy {
        target: target.to_path_buf(),
        attempts: policy.attempts,
    })
}
