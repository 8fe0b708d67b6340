/*!
 * Passthrough Tests
 * Host paths shared live with the sandbox
 */

use nix::errno::Errno;
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use velen::core::errors::{exit, VelenError};
use velen::sandbox::{
    LifecycleController, PassthroughPath, PrepareRequest, SandboxLayout, SimMountKind,
    SimulatedMounts, UnmountPolicy,
};

fn controller(root: &Path, sim: &SimulatedMounts) -> LifecycleController {
    LifecycleController::new(
        SandboxLayout::new(root),
        Arc::new(sim.clone()),
        UnmountPolicy::new(2, Duration::from_millis(1)),
    )
}

fn inside(merged: &Path, path: &Path) -> PathBuf {
    merged.join(path.strip_prefix("/").unwrap())
}

#[test]
fn test_same_path_passthrough() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("shared")).unwrap();
    let shared = dir.path().join("shared").canonicalize().unwrap();
    std::fs::write(shared.join("keep.txt"), b"host").unwrap();

    let sim = SimulatedMounts::new();
    let lifecycle = controller(&dir.path().join("velen"), &sim);
    let instance = lifecycle
        .prepare(&PrepareRequest::new(vec![PassthroughPath::new(&shared)]))
        .unwrap();

    let target = inside(&lifecycle.layout().merged, &shared);
    assert!(target.is_dir());
    assert_eq!(instance.mounts.last(), Some(&target));
    assert_eq!(
        sim.mounts().last().cloned(),
        Some((
            target,
            SimMountKind::Bind {
                source: shared.clone()
            }
        ))
    );

    lifecycle.destroy().unwrap();
    assert_eq!(std::fs::read(shared.join("keep.txt")).unwrap(), b"host");
}

#[test]
fn test_file_passthrough_creates_file_target() {
    let dir = tempfile::tempdir().unwrap();
    let host = dir.path().join("token");
    std::fs::write(&host, b"secret").unwrap();

    let sim = SimulatedMounts::new();
    let lifecycle = controller(&dir.path().join("velen"), &sim);
    lifecycle
        .prepare(&PrepareRequest::new(vec![PassthroughPath::with_target(
            &host,
            "/run/token",
        )]))
        .unwrap();

    let target = lifecycle.layout().merged.join("run/token");
    assert!(target.is_file());
    assert!(sim.is_mounted(&target));

    lifecycle.destroy().unwrap();
    assert_eq!(std::fs::read(&host).unwrap(), b"secret");
}

#[test]
fn test_parent_target_bound_first() {
    let dir = tempfile::tempdir().unwrap();
    let outer = dir.path().join("outer");
    let inner = dir.path().join("inner");
    std::fs::create_dir(&outer).unwrap();
    std::fs::create_dir(&inner).unwrap();

    let sim = SimulatedMounts::new();
    let lifecycle = controller(&dir.path().join("velen"), &sim);
    let merged = lifecycle.layout().merged.clone();
    lifecycle
        .prepare(&PrepareRequest::new(vec![
            PassthroughPath::with_target(&inner, "/data/inner"),
            PassthroughPath::with_target(&outer, "/data"),
        ]))
        .unwrap();

    let binds: Vec<PathBuf> = sim.mount_points().into_iter().skip(2).collect();
    assert_eq!(binds, vec![merged.join("data"), merged.join("data/inner")]);

    lifecycle.destroy().unwrap();
    assert_eq!(
        sim.unmounted(),
        vec![
            merged.join("data/inner"),
            merged.join("data"),
            merged.clone(),
            lifecycle.layout().top.clone(),
        ]
    );
}

#[test]
fn test_invalid_passthrough_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().canonicalize().unwrap();
    let root = base.join("velen");
    let sim = SimulatedMounts::new();
    let lifecycle = controller(&root, &sim);

    let missing = PassthroughPath::new(dir.path().join("missing"));
    let err = lifecycle
        .prepare(&PrepareRequest::new(vec![missing]))
        .unwrap_err();
    assert_eq!(err.exit_code(), exit::CONFIG);

    let err = lifecycle
        .prepare(&PrepareRequest::new(vec![PassthroughPath::with_target(
            &base,
            root.join("loop"),
        )]))
        .unwrap_err();
    assert!(matches!(err, VelenError::InvalidConfig(_)));

    assert!(sim.log().is_empty());
    assert!(!root.exists());
}

#[test]
fn test_host_root_rejected() {
    assert!("/".parse::<PassthroughPath>().is_err());
    assert!("/srv:/".parse::<PassthroughPath>().is_err());
    assert!("srv".parse::<PassthroughPath>().is_err());
}

#[test]
fn test_bind_failure_rolls_back_everything() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a");
    let second = dir.path().join("b");
    std::fs::create_dir(&first).unwrap();
    std::fs::create_dir(&second).unwrap();

    let sim = SimulatedMounts::new();
    let root = dir.path().join("velen");
    let lifecycle = controller(&root, &sim);
    sim.fail_mount_at(lifecycle.layout().merged.join("b"), Errno::EPERM);

    let err = lifecycle
        .prepare(&PrepareRequest::new(vec![
            PassthroughPath::with_target(&first, "/a"),
            PassthroughPath::with_target(&second, "/b"),
        ]))
        .unwrap_err();
    assert!(matches!(err, VelenError::MountFailure { .. }));
    assert_eq!(err.exit_code(), exit::MOUNT_FAILURE);

    assert!(sim.mount_points().is_empty());
    assert!(!root.exists());
    assert!(first.exists() && second.exists());
}

#[test]
fn test_stuck_passthrough_keeps_root() {
    let dir = tempfile::tempdir().unwrap();
    let shared = dir.path().join("shared");
    std::fs::create_dir(&shared).unwrap();
    std::fs::write(shared.join("keep.txt"), b"host").unwrap();

    let sim = SimulatedMounts::new();
    let root = dir.path().join("velen");
    let lifecycle = controller(&root, &sim);
    lifecycle
        .prepare(&PrepareRequest::new(vec![PassthroughPath::with_target(
            &shared, "/srv",
        )]))
        .unwrap();

    let target = lifecycle.layout().merged.join("srv");
    sim.fail_unmount_at(&target, Errno::EPERM);

    let err = lifecycle.destroy().unwrap_err();
    assert!(matches!(err, VelenError::UnmountFailure { .. }));
    assert!(root.exists());
    assert!(sim.is_mounted(&target));
    assert_eq!(std::fs::read(shared.join("keep.txt")).unwrap(), b"host");
}
