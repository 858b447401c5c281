//! Direct child-process backend.
//!
//! No isolation beyond a cleared environment and a chosen working directory.
//! Memory, process count and CPU rate are accepted but not enforced here; the
//! time limit is enforced against wall time.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{CmdBuilder, Runner};
use crate::context::Context;
use crate::error::{ExecError, ExecResult, ValidationError};
use crate::model::{Cmd, ExecveParam, ExitStatus, Status};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);
const TIME_LIMIT_EXCEEDED: &str = "time limit exceeded";
#[cfg(unix)]
const SIGKILL_EXIT: i32 = 128 + 9;

/// Builds [`ProcessRunner`]s that run in `work_dir` unless the descriptor
/// names its own.
#[derive(Clone, Debug)]
pub struct ProcessBuilder {
    work_dir: PathBuf,
    poll_interval: Duration,
}

impl ProcessBuilder {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Directory a runner for `cmd` starts in.
    #[must_use]
    pub fn cwd_for(&self, cmd: &Cmd) -> PathBuf {
        cmd.work_dir.clone().unwrap_or_else(|| self.work_dir.clone())
    }

    /// Project `cmd` onto what a spawn needs. File handles are duplicated so
    /// the descriptor keeps its own.
    pub fn execve_param(&self, cmd: &Cmd) -> ExecResult<ExecveParam> {
        if cmd.args.is_empty() {
            return Err(ValidationError::EmptyArgs.into());
        }
        let mut files = std::collections::BTreeMap::new();
        for (slot, file) in &cmd.files {
            files.insert(*slot, file.try_clone()?);
        }
        Ok(ExecveParam {
            args: cmd.args.clone(),
            env: cmd.env.clone(),
            files,
        })
    }

    /// Runner for an already projected `param`.
    #[must_use]
    pub fn runner(&self, param: ExecveParam, cmd: &Cmd) -> ProcessRunner {
        ProcessRunner {
            param: Some(param),
            cwd: self.cwd_for(cmd),
            time_limit: time_limit(cmd.time_limit_ms),
            poll_interval: self.poll_interval,
            child: None,
            started_at: None,
        }
    }
}

impl CmdBuilder for ProcessBuilder {
    fn build(&self, cmd: &Cmd) -> ExecResult<Box<dyn Runner>> {
        if cmd.tty {
            warn!("tty requested but the process backend does not allocate one");
        }
        let param = self.execve_param(cmd)?;
        Ok(Box::new(self.runner(param, cmd)))
    }
}

/// Zero means no limit.
fn time_limit(ms: i64) -> Option<Duration> {
    u64::try_from(ms)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

/// One spawned child. The child is killed and reaped on drop if still running.
#[derive(Debug)]
pub struct ProcessRunner {
    param: Option<ExecveParam>,
    cwd: PathBuf,
    time_limit: Option<Duration>,
    poll_interval: Duration,
    child: Option<Child>,
    started_at: Option<Instant>,
}

impl ProcessRunner {
    fn command(&self, param: ExecveParam) -> ExecResult<Command> {
        let (program, args) = param
            .args
            .split_first()
            .ok_or(ExecError::Validation(ValidationError::EmptyArgs))?;
        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        for entry in &param.env {
            let (key, value) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
            command.env(key, value);
        }
        for (slot, file) in param.files {
            match slot {
                0 => {
                    command.stdin(Stdio::from(file));
                }
                1 => {
                    command.stdout(Stdio::from(file));
                }
                2 => {
                    command.stderr(Stdio::from(file));
                }
                other => {
                    warn!(slot = other, "descriptor slot not supported by the process backend");
                }
            }
        }
        Ok(command)
    }

    fn elapsed(&self) -> Duration {
        self.started_at.as_ref().map_or(Duration::ZERO, Instant::elapsed)
    }

    fn kill_and_reap(&mut self) {
        if let Err(err) = self.kill() {
            debug!(error = %err, "kill failed");
        }
        if let Some(child) = self.child.as_mut() {
            if let Err(err) = child.wait() {
                debug!(error = %err, "reap failed");
            }
        }
    }
}

impl Runner for ProcessRunner {
    fn start(&mut self, ctx: &Context) -> ExecResult<()> {
        ctx.check()?;
        let param = self
            .param
            .take()
            .ok_or_else(|| ExecError::backend("runner already started"))?;
        let program = param.args.first().cloned().unwrap_or_default();
        let mut command = self.command(param)?;
        let child = command.spawn()?;
        debug!(pid = child.id(), program = %program, cwd = %self.cwd.display(), "spawned");
        self.child = Some(child);
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn wait(&mut self, ctx: &Context) -> ExecResult<Status> {
        loop {
            let child = self
                .child
                .as_mut()
                .ok_or_else(|| ExecError::backend("runner not started"))?;
            if let Some(exit) = child.try_wait()? {
                let status = status_from(exit, self.elapsed());
                debug!(status = %status.status, exit_code = status.exit_code, "child exited");
                return Ok(status);
            }
            if let Err(err) = ctx.check() {
                self.kill_and_reap();
                return Err(err.into());
            }
            if let Some(limit) = self.time_limit {
                if self.elapsed() > limit {
                    self.kill_and_reap();
                    return Ok(time_limit_status(self.elapsed()));
                }
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn kill(&mut self) -> ExecResult<()> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        kill_child(child)
    }
}

impl Drop for ProcessRunner {
    fn drop(&mut self) {
        let running = self
            .child
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(None)));
        if running {
            self.kill_and_reap();
        }
    }
}

#[cfg(unix)]
fn kill_child(child: &Child) -> ExecResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id()).map_err(|_| ExecError::backend("pid out of range"))?;
    match kill(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(std::io::Error::from(errno).into()),
    }
}

#[cfg(not(unix))]
fn kill_child(child: &mut Child) -> ExecResult<()> {
    Ok(child.kill()?)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn time_limit_status(elapsed: Duration) -> Status {
    let ms = millis(elapsed);
    Status {
        status: ExitStatus::Signalled,
        error: Some(TIME_LIMIT_EXCEEDED.to_string()),
        time_ms: ms,
        memory: 0,
        run_time_ms: ms,
        #[cfg(unix)]
        exit_code: SIGKILL_EXIT,
        #[cfg(not(unix))]
        exit_code: -1,
    }
}

/// Map a child's exit onto a [`Status`]. Wall time stands in for CPU time.
#[must_use]
pub fn status_from(exit: std::process::ExitStatus, elapsed: Duration) -> Status {
    let ms = millis(elapsed);
    let mut status = Status {
        time_ms: ms,
        run_time_ms: ms,
        ..Status::default()
    };
    match exit.code() {
        Some(0) => {}
        Some(code) => {
            status.status = ExitStatus::RuntimeError;
            status.exit_code = code;
        }
        None => {
            status.status = ExitStatus::Signalled;
            apply_signal(&mut status, exit);
        }
    }
    status
}

#[cfg(unix)]
fn apply_signal(status: &mut Status, exit: std::process::ExitStatus) {
    use nix::sys::signal::Signal;
    use std::os::unix::process::ExitStatusExt;

    if let Some(signo) = exit.signal() {
        status.exit_code = 128 + signo;
        status.error = Some(match Signal::try_from(signo) {
            Ok(signal) => format!("terminated by {}", signal.as_str()),
            Err(_) => format!("terminated by signal {signo}"),
        });
    }
}

#[cfg(not(unix))]
fn apply_signal(status: &mut Status, _exit: std::process::ExitStatus) {
    status.exit_code = -1;
    status.error = Some("terminated abnormally".to_string());
}
