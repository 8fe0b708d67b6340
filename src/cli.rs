/*!
 * Command Line
 * Multi-call dispatch and the command surface
 *
 * The binary answers to `velen <command>` and, through symlinks, to
 * `velen-prepare`, `velen-run`, `velen-destroy` and `velen-shell`. A leading
 * `-` (login shell convention) is ignored.
 */

use crate::core::errors::{exit, VelenError, VelenResult};
use crate::core::{is_setuid_invocation, VelenConfig};
use crate::process::{
    is_safe_variable, CommandRunner, CommandSpec, ForkLauncher, LinuxConfiner, LinuxExecutor,
    RestrictedShell,
};
use crate::sandbox::{LifecycleController, PassthroughPath, PrepareRequest};
use crate::security::{AccountResolver, NssAccountResolver, PrivilegeDropper};
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Ephemeral overlay sandbox over the host root
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "velen", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the sandbox
    Prepare(PrepareArgs),
    /// Run a command inside the sandbox as the target account
    Run(RunArgs),
    /// Tear the sandbox down
    Destroy(DestroyArgs),
    /// Prepare, run a shell, destroy
    Shell(ShellArgs),
    /// Print the sandbox state and instance record
    Status(StatusArgs),
}

#[derive(Parser, Debug, Clone, PartialEq, Eq, Default)]
#[command(name = "velen-prepare", version)]
pub struct PrepareArgs {
    /// Give PATH inside the sandbox to the target account (repeatable)
    #[arg(long = "claim", value_name = "PATH")]
    pub claims: Vec<PathBuf>,

    /// Extra host paths shared live with the sandbox
    #[arg(value_name = "HOST[:SANDBOX]")]
    pub passthrough: Vec<String>,
}

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "velen-run", version)]
pub struct RunArgs {
    /// Program and arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGV")]
    pub argv: Vec<String>,
}

#[derive(Parser, Debug, Clone, PartialEq, Eq, Default)]
#[command(name = "velen-destroy", version)]
pub struct DestroyArgs {}

#[derive(Parser, Debug, Clone, PartialEq, Eq, Default)]
#[command(name = "velen-shell", version)]
pub struct ShellArgs {
    /// Run COMMAND with the account's shell instead of an interactive session
    #[arg(short = 'c', value_name = "COMMAND")]
    pub command: Option<String>,
}

#[derive(Parser, Debug, Clone, PartialEq, Eq, Default)]
#[command(name = "velen-status", version)]
pub struct StatusArgs {}

/// Name the binary was invoked as, without directories or a login `-`
pub fn invoked_name(argv0: &OsString) -> String {
    Path::new(argv0)
        .file_name()
        .map(|name| name.to_string_lossy().trim_start_matches('-').to_string())
        .unwrap_or_default()
}

/// Parse the command line according to the invoked name
pub fn dispatch(args: Vec<OsString>) -> Result<Command, clap::Error> {
    let name = args.first().map(invoked_name).unwrap_or_default();
    debug!(invoked = %name, "Dispatching");

    match name.as_str() {
        "velen-prepare" => PrepareArgs::try_parse_from(args).map(Command::Prepare),
        "velen-run" => RunArgs::try_parse_from(args).map(Command::Run),
        "velen-destroy" => DestroyArgs::try_parse_from(args).map(Command::Destroy),
        "velen-shell" => ShellArgs::try_parse_from(args).map(Command::Shell),
        _ => Cli::try_parse_from(args).map(|cli| cli.command),
    }
}

/// Exit status for a command line that did not parse
pub fn usage_exit(err: &clap::Error) -> i32 {
    let _ = err.print();
    if err.use_stderr() {
        exit::USAGE
    } else {
        exit::SUCCESS
    }
}

/// Run `command` and return the process exit status
pub fn execute(command: Command, config: &VelenConfig) -> i32 {
    let lifecycle = Arc::new(LifecycleController::from_config(config));

    let result = match command {
        Command::Prepare(args) => prepare(&lifecycle, config, &args).map(|_| exit::SUCCESS),
        Command::Run(args) => run(lifecycle, config, args.argv),
        Command::Destroy(_) => lifecycle.destroy().map(|_| exit::SUCCESS),
        Command::Shell(args) => shell(lifecycle, config, args.command),
        Command::Status(_) => status(&lifecycle).map(|_| exit::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => report(e),
    }
}

/// Render an error on stderr and map it to its exit status
pub fn report(err: VelenError) -> i32 {
    let code = err.exit_code();
    eprintln!("{:?}", miette::Report::new(err));
    code
}

fn prepare_request(
    config: &VelenConfig,
    extra: &[String],
    claims: Vec<PathBuf>,
) -> VelenResult<PrepareRequest> {
    let mut passthrough = config.passthrough_paths()?;
    for entry in extra {
        passthrough.push(entry.parse::<PassthroughPath>()?);
    }

    let claim_owner = if claims.is_empty() {
        None
    } else {
        match NssAccountResolver::new().resolve(&config.account) {
            Ok(credential) => Some((credential.uid, credential.gid)),
            Err(e) => {
                warn!(error = %e, "Cannot resolve account for claimed paths");
                None
            }
        }
    };

    Ok(PrepareRequest {
        passthrough,
        claims,
        claim_owner,
    })
}

fn prepare(lifecycle: &LifecycleController, config: &VelenConfig, args: &PrepareArgs) -> VelenResult<()> {
    let request = prepare_request(config, &args.passthrough, args.claims.clone())?;
    lifecycle.prepare(&request).map(|_| ())
}

fn runner(lifecycle: Arc<LifecycleController>, config: &VelenConfig) -> CommandRunner {
    let privileged = is_setuid_invocation();
    let env: Vec<(String, String)> = std::env::vars()
        .filter(|(key, _)| !privileged || is_safe_variable(key))
        .collect();

    CommandRunner::new(
        lifecycle,
        PrivilegeDropper::system(),
        Arc::new(LinuxConfiner::new(config.mount_proc, config.bind_dev)),
        Arc::new(LinuxExecutor::new()),
        config.account.clone(),
        config.default_shell.clone(),
    )
    .with_environment(env)
    .with_caller_cwd(std::env::current_dir().ok())
}

fn run(lifecycle: Arc<LifecycleController>, config: &VelenConfig, argv: Vec<String>) -> VelenResult<i32> {
    match runner(lifecycle, config).run(CommandSpec::Argv(argv)) {
        Ok(never) => match never {},
        Err(e) => Err(e),
    }
}

fn shell(lifecycle: Arc<LifecycleController>, config: &VelenConfig, command: Option<String>) -> VelenResult<i32> {
    let request = prepare_request(config, &[], Vec::new())?;
    let launcher = Arc::new(ForkLauncher::new(Arc::new(runner(lifecycle.clone(), config))));
    RestrictedShell::new(lifecycle, request, launcher).run(command)
}

fn status(lifecycle: &LifecycleController) -> VelenResult<()> {
    println!("{}", lifecycle.state());
    if let Some(record) = lifecycle.instance()? {
        let json = serde_json::to_string_pretty(&record).map_err(|e| VelenError::Io {
            path: lifecycle.layout().record.clone(),
            reason: e.to_string(),
        })?;
        println!("{}", json);
    }
    Ok(())
}
