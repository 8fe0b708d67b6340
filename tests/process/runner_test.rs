/*!
 * Command Runner Tests
 * The ordered run sequence with recording components
 */

use nix::unistd::{Gid, Uid};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use velen::core::errors::{exit, VelenError};
use velen::process::{CommandRunner, CommandSpec, RecordingConfiner, RecordingExecutor};
use velen::sandbox::{LifecycleController, PrepareRequest, SandboxLayout, SimulatedMounts, UnmountPolicy};
use velen::security::{
    Credential, CredentialStep, PrivilegeDropper, RecordingCredentialOps, TableAccountResolver,
};

struct Fixture {
    _dir: tempfile::TempDir,
    lifecycle: Arc<LifecycleController>,
    confiner: RecordingConfiner,
    executor: RecordingExecutor,
    ops: RecordingCredentialOps,
    resolver: TableAccountResolver,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = Arc::new(LifecycleController::new(
            SandboxLayout::new(dir.path().join("velen")),
            Arc::new(SimulatedMounts::new()),
            UnmountPolicy::new(2, Duration::from_millis(1)),
        ));
        let resolver = TableAccountResolver::new();
        resolver.insert(Credential {
            name: "builder".into(),
            uid: Uid::from_raw(2001),
            gid: Gid::from_raw(2001),
            groups: vec![Gid::from_raw(2001)],
            home: PathBuf::from("/home/builder"),
            shell: PathBuf::from("/usr/bin/velen-shell"),
        });
        Self {
            _dir: dir,
            lifecycle,
            confiner: RecordingConfiner::new(),
            executor: RecordingExecutor::new(),
            ops: RecordingCredentialOps::root(),
            resolver,
        }
    }

    fn runner(&self, account: &str) -> CommandRunner {
        CommandRunner::new(
            self.lifecycle.clone(),
            PrivilegeDropper::new(Arc::new(self.resolver.clone()), Arc::new(self.ops.clone())),
            Arc::new(self.confiner.clone()),
            Arc::new(self.executor.clone()),
            account,
            "/bin/sh",
        )
    }

    fn prepared(self) -> Self {
        self.lifecycle.prepare(&PrepareRequest::default()).unwrap();
        self
    }
}

fn lookup<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
    env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

#[test]
fn test_run_requires_active_sandbox() {
    let fx = Fixture::new();
    let err = fx
        .runner("builder")
        .run(CommandSpec::Argv(vec!["true".into()]))
        .unwrap_err();

    assert_eq!(err.exit_code(), exit::NOT_ACTIVE);
    assert!(fx.confiner.entered().is_empty());
    assert!(fx.ops.steps().is_empty());
    assert!(fx.executor.requests().is_empty());
}

#[test]
fn test_confine_then_drop_then_exec() {
    let fx = Fixture::new().prepared();
    let runner = fx
        .runner("builder")
        .with_environment(vec![
            ("USER".into(), "root".into()),
            ("TERM".into(), "xterm".into()),
        ])
        .with_caller_cwd(Some(PathBuf::from("/srv/project")));

    let err = runner
        .run(CommandSpec::Argv(vec!["make".into(), "-j4".into()]))
        .unwrap_err();
    assert!(matches!(err, VelenError::ExecFailure { .. }));

    assert_eq!(fx.confiner.entered(), vec![fx.lifecycle.layout().merged.clone()]);
    assert_eq!(
        fx.ops.steps().last(),
        Some(&CredentialStep::SetUid(Uid::from_raw(2001)))
    );

    let requests = fx.executor.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.argv, vec!["make".to_string(), "-j4".to_string()]);
    assert_eq!(request.cwd, vec![PathBuf::from("/srv/project")]);
    assert_eq!(lookup(&request.env, "USER"), Some("builder"));
    assert_eq!(lookup(&request.env, "HOME"), Some("/home/builder"));
    assert_eq!(lookup(&request.env, "TERM"), Some("xterm"));
    // The account's login shell is velen itself, so the inner shell is the default
    assert_eq!(lookup(&request.env, "SHELL"), Some("/bin/sh"));
    assert!(lookup(&request.env, "PATH").is_some());
}

#[test]
fn test_confine_failure_drops_nothing() {
    let fx = Fixture::new().prepared();
    fx.confiner.fail_at("pivot_root");

    let err = fx
        .runner("builder")
        .run(CommandSpec::Argv(vec!["id".into()]))
        .unwrap_err();
    assert_eq!(
        err,
        VelenError::ConfinementFailure {
            step: "pivot_root".into(),
            reason: "Operation not permitted".into(),
        }
    );
    assert_eq!(err.exit_code(), exit::CONFINEMENT_FAILURE);
    assert!(fx.ops.steps().is_empty());
    assert!(fx.executor.requests().is_empty());
}

#[test]
fn test_drop_failure_never_execs() {
    let fx = Fixture::new().prepared();
    fx.ops.fail_at("setuid");

    let err = fx
        .runner("builder")
        .run(CommandSpec::Argv(vec!["id".into()]))
        .unwrap_err();
    assert_eq!(err.exit_code(), exit::PRIVILEGE_DROP_FAILURE);
    assert_eq!(fx.confiner.entered().len(), 1);
    assert!(fx.executor.requests().is_empty());
}

#[test]
fn test_unknown_account_fails_before_confinement() {
    let fx = Fixture::new().prepared();
    let err = fx
        .runner("ghost")
        .run(CommandSpec::Argv(vec!["id".into()]))
        .unwrap_err();

    assert!(matches!(err, VelenError::PrivilegeDropFailure { ref step, .. } if step == "resolve"));
    assert!(fx.confiner.entered().is_empty());
}

#[test]
fn test_empty_argv_rejected() {
    let fx = Fixture::new().prepared();
    let err = fx.runner("builder").run(CommandSpec::Argv(Vec::new())).unwrap_err();
    assert_eq!(err.exit_code(), exit::CONFIG);
    assert!(fx.confiner.entered().is_empty());
}

#[test]
fn test_login_shell_runs_in_home() {
    let fx = Fixture::new().prepared();
    let _ = fx.runner("builder").run(CommandSpec::LoginShell {
        command: Some("id -un".into()),
    });

    let requests = fx.executor.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].argv,
        vec!["/bin/sh".to_string(), "-c".to_string(), "id -un".to_string()]
    );
    assert_eq!(requests[0].cwd, vec![PathBuf::from("/home/builder")]);
}

#[test]
fn test_interactive_login_shell() {
    let fx = Fixture::new().prepared();
    let _ = fx.runner("builder").run(CommandSpec::LoginShell { command: None });

    assert_eq!(fx.executor.requests()[0].argv, vec!["/bin/sh".to_string()]);
}
