/*!
 * Restricted Shell Tests
 * Session teardown on every exit path
 */

use nix::sys::signal::{kill, raise, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Gid, Uid};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use velen::core::errors::{exit, VelenError, VelenResult};
use velen::process::{
    wait_for, CommandRunner, CommandSpec, FnLauncher, ForkLauncher, Launcher, RecordingConfiner,
    RecordingExecutor, RestrictedShell, ShellSession, SignalForwarder,
};
use velen::sandbox::{
    LifecycleController, MountOp, PrepareRequest, SandboxLayout, SandboxState, SimulatedMounts,
    UnmountPolicy,
};
use velen::security::{Credential, PrivilegeDropper, RecordingCredentialOps, TableAccountResolver};

fn lifecycle() -> (tempfile::TempDir, SimulatedMounts, Arc<LifecycleController>) {
    let dir = tempfile::tempdir().unwrap();
    let sim = SimulatedMounts::new();
    let lifecycle = Arc::new(LifecycleController::new(
        SandboxLayout::new(dir.path().join("velen")),
        Arc::new(sim.clone()),
        UnmountPolicy::new(2, Duration::from_millis(1)),
    ));
    (dir, sim, lifecycle)
}

fn shell(lifecycle: &Arc<LifecycleController>, launcher: FnLauncher) -> RestrictedShell {
    RestrictedShell::new(lifecycle.clone(), PrepareRequest::default(), Arc::new(launcher))
}

#[test]
fn test_inner_status_passes_through() {
    let (_dir, sim, lifecycle) = lifecycle();
    let status = shell(&lifecycle, FnLauncher::exiting(42)).run(None).unwrap();

    assert_eq!(status, 42);
    assert_eq!(lifecycle.state(), SandboxState::Absent);
    assert!(sim.mount_points().is_empty());
}

#[test]
fn test_command_runs_inside_active_sandbox() {
    let (_dir, _sim, lifecycle) = lifecycle();
    let observed = lifecycle.clone();
    let launcher = Arc::new(FnLauncher::new(move |_| {
        Ok(if observed.state() == SandboxState::Active { 0 } else { 1 })
    }));

    let shell = RestrictedShell::new(lifecycle.clone(), PrepareRequest::default(), launcher.clone());
    let status = shell.run(Some("make test".into())).unwrap();

    assert_eq!(status, 0);
    assert_eq!(
        launcher.specs(),
        vec![CommandSpec::LoginShell {
            command: Some("make test".into())
        }]
    );
}

#[test]
fn test_launch_failure_still_destroys() {
    let (_dir, _sim, lifecycle) = lifecycle();
    let launcher = FnLauncher::new(|_| {
        Err(VelenError::PrivilegeDropFailure {
            step: "setuid".into(),
            reason: "Operation not permitted".into(),
        })
    });

    let err = shell(&lifecycle, launcher).run(None).unwrap_err();
    assert_eq!(err.exit_code(), exit::PRIVILEGE_DROP_FAILURE);
    assert_eq!(lifecycle.state(), SandboxState::Absent);
}

#[test]
fn test_panic_still_destroys() {
    let (_dir, _sim, lifecycle) = lifecycle();
    let shell = shell(&lifecycle, FnLauncher::new(|_| panic!("launcher blew up")));

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| shell.run(None)));
    assert!(result.is_err());
    assert_eq!(lifecycle.state(), SandboxState::Absent);
}

#[test]
fn test_failed_teardown_overrides_success() {
    let (_dir, sim, lifecycle) = lifecycle();
    let merged = lifecycle.layout().merged.clone();
    let launcher = FnLauncher::new(move |_| {
        sim.busy_for(&merged, 100);
        Ok(0)
    });

    let err = shell(&lifecycle, launcher).run(None).unwrap_err();
    assert!(matches!(err, VelenError::UnmountBusy { .. }));
    assert_eq!(err.exit_code(), exit::UNMOUNT_BUSY);
    assert!(lifecycle.layout().root.exists());
}

#[test]
fn test_existing_sandbox_is_reused_then_destroyed() {
    let (_dir, sim, lifecycle) = lifecycle();
    lifecycle.prepare(&PrepareRequest::default()).unwrap();

    let status = shell(&lifecycle, FnLauncher::exiting(0)).run(None).unwrap();
    assert_eq!(status, 0);
    assert_eq!(lifecycle.state(), SandboxState::Absent);

    let mounts = sim
        .log()
        .into_iter()
        .filter(|op| matches!(op, MountOp::Mount(_)))
        .count();
    assert_eq!(mounts, 2);
}

#[test]
fn test_dropped_session_destroys() {
    let (_dir, _sim, lifecycle) = lifecycle();
    {
        let _session = ShellSession::open(lifecycle.clone(), &PrepareRequest::default()).unwrap();
        assert_eq!(lifecycle.state(), SandboxState::Active);
    }
    assert_eq!(lifecycle.state(), SandboxState::Absent);
}

#[test]
fn test_failed_prepare_leaves_nothing() {
    let (_dir, sim, lifecycle) = lifecycle();
    sim.fail_mount_at(&lifecycle.layout().merged, nix::errno::Errno::EPERM);
    let launcher = Arc::new(FnLauncher::exiting(0));

    let shell = RestrictedShell::new(lifecycle.clone(), PrepareRequest::default(), launcher.clone());
    let err = shell.run(None).unwrap_err();

    assert_eq!(err.exit_code(), exit::MOUNT_FAILURE);
    assert!(launcher.specs().is_empty());
    assert_eq!(lifecycle.state(), SandboxState::Absent);
}

#[test]
#[serial]
fn test_wait_for_maps_signals() {
    match unsafe { fork() }.unwrap() {
        ForkResult::Child => unsafe { nix::libc::_exit(7) },
        ForkResult::Parent { child } => assert_eq!(wait_for(child).unwrap(), 7),
    }

    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            let _ = raise(Signal::SIGTERM);
            unsafe { nix::libc::_exit(0) }
        }
        ForkResult::Parent { child } => {
            assert_eq!(wait_for(child).unwrap(), exit::SIGNAL_BASE + 15)
        }
    }
}

fn recording_runner(lifecycle: &Arc<LifecycleController>) -> CommandRunner {
    let resolver = TableAccountResolver::new();
    resolver.insert(Credential {
        name: "builder".into(),
        uid: Uid::from_raw(2001),
        gid: Gid::from_raw(2001),
        groups: vec![Gid::from_raw(2001)],
        home: PathBuf::from("/home/builder"),
        shell: PathBuf::from("/bin/sh"),
    });
    CommandRunner::new(
        lifecycle.clone(),
        PrivilegeDropper::new(Arc::new(resolver), Arc::new(RecordingCredentialOps::root())),
        Arc::new(RecordingConfiner::new()),
        Arc::new(RecordingExecutor::new()),
        "builder",
        "/bin/sh",
    )
}

#[test]
#[serial]
fn test_fork_launcher_reports_child_failure() {
    let (_dir, _sim, lifecycle) = lifecycle();
    lifecycle.prepare(&PrepareRequest::default()).unwrap();

    // The recording executor never execs, so the child exits with the exec failure status
    let status = ForkLauncher::new(Arc::new(recording_runner(&lifecycle)))
        .launch(CommandSpec::LoginShell { command: None })
        .unwrap();
    assert_eq!(status, exit::NOT_EXECUTABLE);

    lifecycle.destroy().unwrap();
}

#[test]
#[serial]
fn test_hangup_during_busy_destroy_still_destroys() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("velen");

    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            let sim = SimulatedMounts::new();
            let lifecycle = Arc::new(LifecycleController::new(
                SandboxLayout::new(&root),
                Arc::new(sim.clone()),
                UnmountPolicy::new(5, Duration::from_millis(200)),
            ));
            sim.busy_for(&lifecycle.layout().merged, 3);

            let launcher = ForkLauncher::new(Arc::new(recording_runner(&lifecycle)));
            let shell = RestrictedShell::new(lifecycle, PrepareRequest::default(), Arc::new(launcher));
            let code = match shell.run(None) {
                Ok(code) => code,
                Err(e) => e.exit_code(),
            };
            unsafe { nix::libc::_exit(code) }
        }
        ForkResult::Parent { child } => {
            // The inner shell exits at once; destroy then retries for over a second
            std::thread::sleep(Duration::from_millis(400));
            kill(child, Signal::SIGHUP).unwrap();

            let status = waitpid(child, None).unwrap();
            assert_eq!(status, WaitStatus::Exited(child, exit::NOT_EXECUTABLE));
            assert!(!root.exists());
        }
    }
}

/// Delivers a hangup after prepare, just before the shell would start
struct HangupBeforeLaunch(ForkLauncher);

impl Launcher for HangupBeforeLaunch {
    fn launch(&self, spec: CommandSpec) -> VelenResult<i32> {
        raise(Signal::SIGHUP).unwrap();
        self.0.launch(spec)
    }

    fn forward_signals(&self) -> VelenResult<Option<SignalForwarder>> {
        self.0.forward_signals()
    }
}

#[test]
#[serial]
fn test_signal_before_launch_skips_shell_and_destroys() {
    let (_dir, sim, lifecycle) = lifecycle();
    let launcher = HangupBeforeLaunch(ForkLauncher::new(Arc::new(recording_runner(&lifecycle))));

    let status = RestrictedShell::new(lifecycle.clone(), PrepareRequest::default(), Arc::new(launcher))
        .run(None)
        .unwrap();

    assert_eq!(status, exit::SIGNAL_BASE + Signal::SIGHUP as i32);
    assert_eq!(lifecycle.state(), SandboxState::Absent);
    assert!(sim.mount_points().is_empty());
}
