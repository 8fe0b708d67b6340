/*!
 * System Limits and Constants
 *
 * Centralized location for paths, defaults and retry limits.
 * Values marked [CONTRACT] are observed by callers and must not change
 * without updating them.
 */

use std::time::Duration;

// =============================================================================
// SANDBOX LAYOUT
// =============================================================================

/// Fixed sandbox root. Its existence is the cross-process lock.
/// [CONTRACT] test harnesses check this path after destroy
pub const DEFAULT_ROOT: &str = "/tmp/velen";

/// Merged view mount point under the root
/// [CONTRACT]
pub const OVERLAY_DIR: &str = "overlay";

/// tmpfs holding the upper and work directories
pub const TOP_DIR: &str = "top";

/// Overlay upper layer under TOP_DIR
pub const UPPER_DIR: &str = "layer";

/// Overlay work directory under TOP_DIR (must share the upper's filesystem)
pub const WORK_DIR: &str = "workdir";

/// Instance record written next to the mount points
pub const RECORD_FILE: &str = "instance.json";

/// Mode for every directory created under the root
pub const DIR_MODE: u32 = 0o755;

/// tmpfs source name shown in the host mount table
pub const TMPFS_SOURCE: &str = "velentmp";

/// overlay source name shown in the host mount table
pub const OVERLAY_SOURCE: &str = "velen";

// =============================================================================
// ACCOUNT AND SHELL
// =============================================================================

/// Account commands run as unless configured otherwise
pub const DEFAULT_ACCOUNT: &str = "boruta-user";

/// Fallback inner shell when the account's login shell is velen itself
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// PATH handed to commands when the caller has none
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Basename prefix identifying velen's own binaries
pub const SELF_PREFIX: &str = "velen";

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Root-owned configuration file, the only source honoured when set-user-ID
pub const SYSTEM_CONFIG_PATH: &str = "/etc/velen/config.json";

// =============================================================================
// UNMOUNT RETRY
// =============================================================================

/// Unmount attempts before reporting UnmountBusy
pub const UNMOUNT_RETRIES: u32 = 5;

/// First backoff between busy unmount attempts, doubled each retry
/// 50 + 100 + 200 + 400 ms keeps destroy under one second
pub const UNMOUNT_BACKOFF: Duration = Duration::from_millis(50);

/// Symlink hops tolerated when resolving a path inside the merged root
/// [LINUX-COMPAT] matches MAXSYMLINKS
pub const MAX_SYMLINK_HOPS: usize = 40;
