/*!
 * Simulation Process Control
 * Recording confiner, executor and launcher for tests
 */

use super::confine::Confiner;
use super::exec::{ExecRequest, Executor};
use super::runner::CommandSpec;
use super::shell::Launcher;
use crate::core::errors::{VelenError, VelenResult};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Records the roots it was asked to enter
#[derive(Debug, Clone, Default)]
pub struct RecordingConfiner {
    entered: Arc<Mutex<Vec<PathBuf>>>,
    fail: Arc<Mutex<Option<&'static str>>>,
}

impl RecordingConfiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every entry at the named step
    pub fn fail_at(&self, step: &'static str) {
        *self.fail.lock() = Some(step);
    }

    pub fn entered(&self) -> Vec<PathBuf> {
        self.entered.lock().clone()
    }
}

impl Confiner for RecordingConfiner {
    fn enter(&self, merged: &Path) -> VelenResult<()> {
        if let Some(step) = *self.fail.lock() {
            return Err(VelenError::confinement(step, "Operation not permitted"));
        }
        self.entered.lock().push(merged.to_path_buf());
        Ok(())
    }
}

/// Records exec requests; reports a configurable exit failure instead of exec'ing
#[derive(Debug, Clone, Default)]
pub struct RecordingExecutor {
    requests: Arc<Mutex<Vec<ExecRequest>>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests.lock().clone()
    }
}

impl Executor for RecordingExecutor {
    fn exec(&self, request: ExecRequest) -> VelenResult<Infallible> {
        let program = request.program().to_string();
        self.requests.lock().push(request);
        Err(VelenError::ExecFailure {
            program,
            reason: "recorded, not executed".to_string(),
            not_found: false,
        })
    }
}

type LaunchFn = dyn Fn(CommandSpec) -> VelenResult<i32> + Send + Sync;

/// Launcher answering from a closure, recording each spec
pub struct FnLauncher {
    launch: Box<LaunchFn>,
    specs: Mutex<Vec<CommandSpec>>,
}

impl FnLauncher {
    pub fn new<F>(launch: F) -> Self
    where
        F: Fn(CommandSpec) -> VelenResult<i32> + Send + Sync + 'static,
    {
        Self {
            launch: Box::new(launch),
            specs: Mutex::new(Vec::new()),
        }
    }

    /// Launcher whose command always exits with `code`
    pub fn exiting(code: i32) -> Self {
        Self::new(move |_| Ok(code))
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.specs.lock().clone()
    }
}

impl Launcher for FnLauncher {
    fn launch(&self, spec: CommandSpec) -> VelenResult<i32> {
        self.specs.lock().push(spec.clone());
        (self.launch)(spec)
    }
}
