/*!
 * Sandbox Lifecycle Tests
 * prepare / destroy across controllers sharing one root
 */

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use velen::core::errors::{exit, VelenError};
use velen::sandbox::{
    LifecycleController, PrepareRequest, SandboxLayout, SandboxState, SimMountKind,
    SimulatedMounts, UnmountPolicy,
};

fn controller(root: &std::path::Path, sim: &SimulatedMounts) -> LifecycleController {
    LifecycleController::new(
        SandboxLayout::new(root),
        Arc::new(sim.clone()),
        UnmountPolicy::new(3, Duration::from_millis(1)),
    )
}

#[test]
fn test_prepare_builds_overlay_over_host_root() {
    let dir = tempfile::tempdir().unwrap();
    let sim = SimulatedMounts::new();
    let lifecycle = controller(&dir.path().join("velen"), &sim);

    let instance = lifecycle.prepare(&PrepareRequest::default()).unwrap();
    let layout = lifecycle.layout();

    assert_eq!(instance.state, SandboxState::Active);
    assert_eq!(instance.merged, layout.merged);
    assert_eq!(
        sim.mounts(),
        vec![
            (
                layout.top.clone(),
                SimMountKind::Tmpfs {
                    source: "velentmp".to_string()
                }
            ),
            (
                layout.merged.clone(),
                SimMountKind::Overlay {
                    lower: "/".into(),
                    upper: layout.upper.clone(),
                    work: layout.work.clone(),
                }
            ),
        ]
    );
}

#[test]
fn test_one_sandbox_per_root() {
    let dir = tempfile::tempdir().unwrap();
    let sim = SimulatedMounts::new();
    let root = dir.path().join("velen");
    let first = controller(&root, &sim);
    let second = controller(&root, &sim);

    first.prepare(&PrepareRequest::default()).unwrap();
    let err = second.prepare(&PrepareRequest::default()).unwrap_err();
    assert_eq!(err, VelenError::AlreadyActive(root.clone()));
    assert_eq!(err.exit_code(), exit::ALREADY_ACTIVE);

    // The first instance is untouched
    assert_eq!(second.state(), SandboxState::Active);
    assert_eq!(sim.mount_points().len(), 2);
}

#[test]
fn test_destroy_from_another_controller() {
    let dir = tempfile::tempdir().unwrap();
    let sim = SimulatedMounts::new();
    let root = dir.path().join("velen");

    controller(&root, &sim)
        .prepare(&PrepareRequest::default())
        .unwrap();

    let other = controller(&root, &sim);
    assert_eq!(other.state(), SandboxState::Active);
    other.destroy().unwrap();

    assert!(sim.mount_points().is_empty());
    assert!(!root.exists());
    assert!(dir.path().exists());
}

#[test]
fn test_cycle_can_repeat() {
    let dir = tempfile::tempdir().unwrap();
    let sim = SimulatedMounts::new();
    let lifecycle = controller(&dir.path().join("velen"), &sim);

    for _ in 0..3 {
        lifecycle.prepare(&PrepareRequest::default()).unwrap();
        assert!(lifecycle.ensure_active().is_ok());
        lifecycle.destroy().unwrap();
        assert_eq!(lifecycle.state(), SandboxState::Absent);
    }
}

#[test]
fn test_run_checks_need_active() {
    let dir = tempfile::tempdir().unwrap();
    let sim = SimulatedMounts::new();
    let lifecycle = controller(&dir.path().join("velen"), &sim);

    let err = lifecycle.ensure_active().unwrap_err();
    assert_eq!(err.exit_code(), exit::NOT_ACTIVE);
    let err = lifecycle.destroy().unwrap_err();
    assert_eq!(err.exit_code(), exit::NOT_ACTIVE);
    assert!(sim.log().is_empty());
}

#[test]
fn test_writes_in_sandbox_stay_out_of_host() {
    let dir = tempfile::tempdir().unwrap();
    let sim = SimulatedMounts::new();
    let lifecycle = controller(&dir.path().join("velen"), &sim);
    lifecycle.prepare(&PrepareRequest::default()).unwrap();

    // Under simulation, upper is a plain directory standing in for the tmpfs layer
    std::fs::write(lifecycle.layout().upper.join("scratch"), b"data").unwrap();
    lifecycle.destroy().unwrap();

    assert!(!lifecycle.layout().upper.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_racing_prepares_one_wins() {
    let dir = tempfile::tempdir().unwrap();
    let sim = SimulatedMounts::new();
    let root = dir.path().join("velen");
    let controllers: Vec<_> = (0..4).map(|_| controller(&root, &sim)).collect();

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = controllers
            .iter()
            .map(|c| scope.spawn(move || c.prepare(&PrepareRequest::default())))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| *e == VelenError::AlreadyActive(root.clone())));
    assert_eq!(sim.mount_points().len(), 2);
}
