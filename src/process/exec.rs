/*!
 * Execution
 * Environment construction and process image replacement
 */

use crate::core::errors::{VelenError, VelenResult};
use crate::core::limits::DEFAULT_PATH;
use nix::errno::Errno;
use nix::unistd::{access, chdir, execve, AccessFlags};
use std::convert::Infallible;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Everything needed to replace the process image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Working directories to try in order
    pub cwd: Vec<PathBuf>,
}

impl ExecRequest {
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }
}

/// Replaces the running process; only returns on failure
pub trait Executor: Send + Sync {
    fn exec(&self, request: ExecRequest) -> VelenResult<Infallible>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxExecutor;

impl LinuxExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for LinuxExecutor {
    fn exec(&self, request: ExecRequest) -> VelenResult<Infallible> {
        let program = request.program().to_string();
        let failure = |reason: String, not_found: bool| VelenError::ExecFailure {
            program: program.clone(),
            reason,
            not_found,
        };

        if program.is_empty() {
            return Err(failure("empty command".to_string(), true));
        }

        enter_first(&request.cwd);

        let path_var = lookup(&request.env, "PATH").unwrap_or(DEFAULT_PATH);
        let resolved = resolve_program(&program, path_var)
            .ok_or_else(|| failure("command not found".to_string(), true))?;

        let to_c = |s: &str| CString::new(s).map_err(|_| failure(format!("NUL byte in {:?}", s), false));
        let path = to_c(&*resolved.to_string_lossy())?;
        let argv = request
            .argv
            .iter()
            .map(|a| to_c(a.as_str()))
            .collect::<VelenResult<Vec<_>>>()?;
        let env = request
            .env
            .iter()
            .map(|(k, v)| to_c(format!("{}={}", k, v).as_str()))
            .collect::<VelenResult<Vec<_>>>()?;

        debug!(program = %resolved.display(), args = argv.len(), "Executing");
        let errno = match execve(&path, &argv, &env) {
            Ok(never) => match never {},
            Err(errno) => errno,
        };
        Err(failure(errno.desc().to_string(), errno == Errno::ENOENT))
    }
}

/// chdir into the first candidate that works, falling back to `/`
fn enter_first(candidates: &[PathBuf]) {
    for dir in candidates {
        if chdir(dir.as_path()).is_ok() {
            return;
        }
        debug!(dir = %dir.display(), "Working directory unavailable");
    }
    if let Err(e) = chdir("/") {
        warn!(error = %e, "Could not enter /");
    }
}

/// Locate `program` the way a shell would: names with a slash are used as is
pub fn resolve_program(program: &str, path_var: &str) -> Option<PathBuf> {
    if program.contains('/') {
        return Some(PathBuf::from(program));
    }
    path_var
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(program))
        .find(|candidate| candidate.is_file() && access(candidate, AccessFlags::X_OK).is_ok())
}

fn lookup<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
    env.iter()
        .rev()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Who the command runs as, for the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvIdentity<'a> {
    pub user: &'a str,
    pub home: &'a Path,
    pub shell: &'a Path,
}

/// Caller environment with the account's identity applied
///
/// `USER`, `LOGNAME`, `HOME` and `SHELL` always reflect the account; `PATH`
/// gets a default when the caller has none.
pub fn build_environment(
    identity: &EnvIdentity<'_>,
    inherited: impl IntoIterator<Item = (String, String)>,
) -> Vec<(String, String)> {
    const OVERRIDDEN: [&str; 4] = ["USER", "LOGNAME", "HOME", "SHELL"];

    let mut env: Vec<(String, String)> = inherited
        .into_iter()
        .filter(|(k, _)| !OVERRIDDEN.contains(&k.as_str()))
        .collect();

    if !env.iter().any(|(k, _)| k == "PATH") {
        env.push(("PATH".to_string(), DEFAULT_PATH.to_string()));
    }
    env.push(("USER".to_string(), identity.user.to_string()));
    env.push(("LOGNAME".to_string(), identity.user.to_string()));
    env.push(("HOME".to_string(), identity.home.display().to_string()));
    env.push(("SHELL".to_string(), identity.shell.display().to_string()));
    env
}

/// Variables kept from the caller when running set-user-ID
pub fn is_safe_variable(key: &str) -> bool {
    matches!(key, "TERM" | "LANG" | "TZ" | "COLORTERM") || key.starts_with("LC_")
}
