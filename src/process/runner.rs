/*!
 * Command Runner
 * Executes a command inside the active sandbox as the target account
 *
 * Sequence: check ACTIVE, resolve the account, enter the merged root,
 * drop privileges, exec. Any failure before exec aborts without running
 * anything.
 */

use super::confine::Confiner;
use super::exec::{build_environment, EnvIdentity, ExecRequest, Executor};
use crate::core::errors::{VelenError, VelenResult};
use crate::core::limits::SELF_PREFIX;
use crate::sandbox::LifecycleController;
use crate::security::PrivilegeDropper;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

/// What to run once inside
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    /// An explicit argument vector
    Argv(Vec<String>),
    /// The account's shell, interactive or with `-c command`
    LoginShell { command: Option<String> },
}

pub struct CommandRunner {
    lifecycle: Arc<LifecycleController>,
    dropper: PrivilegeDropper,
    confiner: Arc<dyn Confiner>,
    executor: Arc<dyn Executor>,
    account: String,
    default_shell: PathBuf,
    inherited_env: Vec<(String, String)>,
    caller_cwd: Option<PathBuf>,
}

impl CommandRunner {
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        dropper: PrivilegeDropper,
        confiner: Arc<dyn Confiner>,
        executor: Arc<dyn Executor>,
        account: impl Into<String>,
        default_shell: impl Into<PathBuf>,
    ) -> Self {
        Self {
            lifecycle,
            dropper,
            confiner,
            executor,
            account: account.into(),
            default_shell: default_shell.into(),
            inherited_env: Vec::new(),
            caller_cwd: None,
        }
    }

    /// Caller variables passed through to the command
    pub fn with_environment(mut self, env: Vec<(String, String)>) -> Self {
        self.inherited_env = env;
        self
    }

    /// Directory `run` tries to enter inside the sandbox
    pub fn with_caller_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.caller_cwd = cwd;
        self
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    /// Run `spec`; on success the process image is replaced and this never returns
    #[instrument(skip(self), fields(account = %self.account))]
    pub fn run(&self, spec: CommandSpec) -> VelenResult<Infallible> {
        let instance = self.lifecycle.ensure_active()?;
        let credential = self.dropper.resolve(&self.account)?;

        let (argv, shell, cwd) = match spec {
            CommandSpec::Argv(argv) => {
                if argv.is_empty() {
                    return Err(VelenError::InvalidConfig("no command given".to_string()));
                }
                let shell = inner_shell(&credential.shell, &self.default_shell);
                let cwd = self.caller_cwd.iter().cloned().collect();
                (argv, shell, cwd)
            }
            CommandSpec::LoginShell { command } => {
                let shell = inner_shell(&credential.shell, &self.default_shell);
                let mut argv = vec![shell.display().to_string()];
                if let Some(command) = command {
                    argv.push("-c".to_string());
                    argv.push(command);
                }
                (argv, shell, vec![credential.home.clone()])
            }
        };

        let env = build_environment(
            &EnvIdentity {
                user: &credential.name,
                home: &credential.home,
                shell: &shell,
            },
            self.inherited_env.iter().cloned(),
        );

        self.confiner.enter(&instance.merged)?;
        let identity = self.dropper.apply(credential)?;
        debug!(uid = identity.uid.as_raw(), program = %argv[0], "Handing over");

        self.executor.exec(ExecRequest { argv, env, cwd })
    }
}

/// The account's shell, unless it is velen itself (or unset)
pub fn inner_shell(account_shell: &Path, default_shell: &Path) -> PathBuf {
    let is_self = account_shell
        .file_name()
        .map(|name| name.to_string_lossy().starts_with(SELF_PREFIX))
        .unwrap_or(true);
    if is_self {
        default_shell.to_path_buf()
    } else {
        account_shell.to_path_buf()
    }
}
