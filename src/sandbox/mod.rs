/*!
 * Sandbox Module
 * Overlay-backed ephemeral root with passthrough binds
 *
 * Components:
 * - Overlay mounter: tmpfs upper layer over the read-only host root
 * - Passthrough binder: host paths shared live with the sandbox
 * - Lifecycle controller: prepare/destroy and the single-instance lock
 *
 * Platform support:
 * - Linux: mount(2) through nix
 * - Simulation: in-memory mount table for tests
 */

pub mod lifecycle;
pub mod linux;
pub mod mountinfo;
pub mod overlay;
pub mod passthrough;
pub mod path;
pub mod simulation;
pub mod traits;
pub mod types;
pub mod unmount;

pub use lifecycle::LifecycleController;
pub use linux::LinuxMountProvider;
pub use overlay::{OverlayMounter, PrepareRequest};
pub use passthrough::{PassthroughBinder, PassthroughPath};
pub use path::{resolve_in_root, PathHandle};
pub use simulation::{MountOp, SimMountKind, SimulatedMounts};
pub use traits::{MountOpResult, MountProvider};
pub use types::{SandboxInstance, SandboxLayout, SandboxState};
pub use unmount::{unmount_with_retry, UnmountPolicy, Unmounted};
