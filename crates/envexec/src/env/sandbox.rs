//! macOS Seatbelt backend: a process runner wrapped in `sandbox-exec`.

use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;
use std::fs::OpenOptions;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;
use tracing::debug;

use super::process::{ProcessBuilder, ProcessRunner};
use super::{CmdBuilder, Runner};
use crate::context::Context;
use crate::error::{ExecError, ExecResult, FileError, FileOp};
use crate::model::{Cmd, RunId, Status};

pub const SANDBOX_EXEC: &str = "/usr/bin/sandbox-exec";

/// What a generated profile allows on top of `deny default`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxPolicy {
    /// Subpaths readable by the command.
    pub allowed_read: Vec<String>,
    /// Subpaths writable by the command.
    pub allowed_write: Vec<String>,
    /// Extra executables the command may exec besides `args[0]`.
    pub allowed_executables: Vec<String>,
    /// Allow outbound network connections.
    pub network: bool,
}

/// Only characters known to be safe inside a profile string literal.
fn validate_seatbelt_path(s: &str) -> ExecResult<()> {
    let is_valid = s.chars().all(|ch| {
        ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | '@' | ' ')
    });
    if !is_valid {
        return Err(ExecError::PolicyDenied {
            message: format!(
                "path contains characters unsafe for sandbox profiles \
                 (only alphanumeric, -, _, ., /, @, space allowed): {s}"
            ),
        });
    }
    Ok(())
}

pub fn ensure_sandbox_available() -> ExecResult<()> {
    let status = Command::new(SANDBOX_EXEC)
        .arg("-p")
        .arg("(version 1)(allow default)")
        .arg("/usr/bin/true")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(exit) if exit.success() => Ok(()),
        Ok(_) => Err(ExecError::SandboxUnavailable {
            message: "sandbox-exec failed to run".to_string(),
        }),
        Err(err) => Err(ExecError::SandboxUnavailable {
            message: format!("sandbox-exec not available: {err}"),
        }),
    }
}

/// Profile for one command running in `work_dir`.
pub fn build_profile(policy: &SandboxPolicy, work_dir: &Path, program: &str) -> ExecResult<String> {
    let work_dir = work_dir.display().to_string();
    validate_seatbelt_path(&work_dir)?;

    let mut profile = String::new();
    profile.push_str("(version 1)\n");
    profile.push_str("(deny default)\n");
    profile.push_str("(import \"system.sb\")\n");
    profile.push_str("(import \"bsd.sb\")\n");

    if policy.network {
        profile.push_str("(allow network-outbound (remote ip))\n");
    }

    // write! to String is infallible
    let _ = writeln!(profile, "(allow file-read* (subpath \"{work_dir}\"))");
    let _ = writeln!(profile, "(allow file-write* (subpath \"{work_dir}\"))");
    for path in &policy.allowed_read {
        validate_seatbelt_path(path)?;
        let _ = writeln!(profile, "(allow file-read* (subpath \"{path}\"))");
    }
    for path in &policy.allowed_write {
        validate_seatbelt_path(path)?;
        let _ = writeln!(profile, "(allow file-write* (subpath \"{path}\"))");
    }

    let executables = policy.allowed_executables.iter().map(String::as_str);
    for exe in std::iter::once(program).chain(executables) {
        validate_seatbelt_path(exe)?;
        let _ = writeln!(profile, "(allow process-exec (literal \"{exe}\"))");
    }

    Ok(profile)
}

/// Write the profile readable by the owner only.
pub fn write_profile(
    path: &Path,
    policy: &SandboxPolicy,
    work_dir: &Path,
    program: &str,
) -> ExecResult<()> {
    let content = build_profile(policy, work_dir, program)?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options
        .open(path)
        .map_err(|err| FileError::new(FileOp::Create, path, err))?;
    file.write_all(content.as_bytes())
        .map_err(|err| FileError::new(FileOp::Copy, path, err))?;
    Ok(())
}

/// Argv that runs `args` under `profile`.
#[must_use]
pub fn wrap_args(profile: &Path, args: &[String]) -> Vec<String> {
    let mut wrapped = Vec::with_capacity(args.len() + 3);
    wrapped.push(SANDBOX_EXEC.to_string());
    wrapped.push("-f".to_string());
    wrapped.push(profile.display().to_string());
    wrapped.extend(args.iter().cloned());
    wrapped
}

/// Builds process runners confined by a per-run Seatbelt profile.
#[derive(Clone, Debug)]
pub struct SeatbeltBuilder {
    process: ProcessBuilder,
    policy: SandboxPolicy,
}

impl SeatbeltBuilder {
    pub fn new(process: ProcessBuilder, policy: SandboxPolicy) -> ExecResult<Self> {
        ensure_sandbox_available()?;
        Ok(Self { process, policy })
    }

    #[must_use]
    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }
}

impl CmdBuilder for SeatbeltBuilder {
    fn build(&self, cmd: &Cmd) -> ExecResult<Box<dyn Runner>> {
        let mut param = self.process.execve_param(cmd)?;
        let program = param.args.first().cloned().unwrap_or_default();
        let cwd = self.process.cwd_for(cmd);

        let profile_dir = tempfile::Builder::new()
            .prefix("envexec-sb-")
            .tempdir()
            .map_err(|err| FileError::new(FileOp::Mkdir, std::env::temp_dir(), err))?;
        let profile: PathBuf = profile_dir.path().join(format!("{}.sb", RunId::new()));
        write_profile(&profile, &self.policy, &cwd, &program)?;
        debug!(profile = %profile.display(), "wrote sandbox profile");

        param.args = wrap_args(&profile, &param.args);
        Ok(Box::new(SeatbeltRunner {
            inner: self.process.runner(param, cmd),
            _profile_dir: profile_dir,
        }))
    }
}

/// Process runner that keeps its profile on disk for as long as it lives.
#[derive(Debug)]
pub struct SeatbeltRunner {
    inner: ProcessRunner,
    _profile_dir: TempDir,
}

impl Runner for SeatbeltRunner {
    fn start(&mut self, ctx: &Context) -> ExecResult<()> {
        self.inner.start(ctx)
    }

    fn wait(&mut self, ctx: &Context) -> ExecResult<Status> {
        self.inner.wait(ctx)
    }

    fn kill(&mut self) -> ExecResult<()> {
        self.inner.kill()
    }
}
