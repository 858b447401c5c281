//! Execution backend contracts and the reference backends behind them.
//!
//! The orchestrator only sees [`Environment`]. [`CmdBuilder`] turns a
//! descriptor into a live [`Runner`], so several backends can share one
//! descriptor shape. [`open_environment`] picks a backend from an
//! [`EnvConfig`]:
//!
//! - [`Backend::Process`] spawns the command directly ([`ProcessBuilder`]).
//! - [`Backend::Seatbelt`] wraps it in `sandbox-exec` with a generated
//!   deny-by-default profile ([`SeatbeltBuilder`]).

pub mod process;
pub mod sandbox;

pub use process::{ProcessBuilder, ProcessRunner};
pub use sandbox::{SandboxPolicy, SeatbeltBuilder};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::debug;

use crate::context::Context;
use crate::error::{ExecError, ExecResult, FileError, FileOp};
use crate::files::{copy_file, create_truncate, ensure_file_path};
use crate::model::{Cmd, FileRef, Status};

/// Polymorphic execution surface the orchestrator depends on.
pub trait Environment {
    /// Run `cmd` to completion and report how it ended.
    fn run(&self, ctx: &Context, cmd: &Cmd) -> ExecResult<Status>;

    /// Move a host-side file into the environment.
    fn copy_in(&self, ctx: &Context, file: &FileRef) -> ExecResult<()>;

    /// Move a file out of the environment to the host side.
    fn copy_out(&self, ctx: &Context, file: &FileRef) -> ExecResult<()>;

    /// Release everything the environment holds. Safe to call whether or not
    /// `run` ever completed; calls after the first are no-ops.
    fn close(&mut self) -> ExecResult<()>;

    /// Directory a descriptor without its own `work_dir` runs in, if the
    /// environment has one on the host filesystem.
    fn work_dir(&self) -> Option<&Path> {
        None
    }
}

/// Live execution state of one command.
pub trait Runner {
    /// Begin execution without waiting for it.
    fn start(&mut self, ctx: &Context) -> ExecResult<()>;

    /// Block until the command finishes. Returns the context error once
    /// `ctx` is cancelled or past its deadline.
    fn wait(&mut self, ctx: &Context) -> ExecResult<Status>;

    /// Ask for early termination.
    fn kill(&mut self) -> ExecResult<()>;
}

/// Turns static configuration into a [`Runner`].
pub trait CmdBuilder {
    fn build(&self, cmd: &Cmd) -> ExecResult<Box<dyn Runner>>;
}

/// Which backend [`open_environment`] builds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Plain child process, no isolation.
    #[default]
    Process,
    /// macOS Seatbelt via `sandbox-exec`.
    Seatbelt,
}

const DEFAULT_POLL_INTERVAL_MS: u64 = 5;

/// Environment configuration, usually loaded from a JSON/YAML file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub backend: Backend,
    /// Directory commands run in. A scratch directory is created when unset.
    pub work_dir: Option<PathBuf>,
    /// Host-side directory used by `copy_in`/`copy_out`. Scratch when unset.
    pub exchange_dir: Option<PathBuf>,
    /// Seatbelt profile inputs; ignored by the process backend.
    pub sandbox: SandboxPolicy,
    /// How often runners poll a child for exit.
    pub poll_interval_ms: u64,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Process,
            work_dir: None,
            exchange_dir: None,
            sandbox: SandboxPolicy::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

/// Build the environment selected by `config.backend`.
pub fn open_environment(config: EnvConfig) -> ExecResult<Box<dyn Environment>> {
    Ok(Box::new(LocalEnvironment::open(config)?))
}

/// Environment backed by host directories. Owns a scratch directory when the
/// configuration leaves `work_dir` or `exchange_dir` unset.
pub struct LocalEnvironment {
    builder: Box<dyn CmdBuilder>,
    work_dir: PathBuf,
    exchange_dir: PathBuf,
    scratch: Option<TempDir>,
    closed: bool,
}

impl LocalEnvironment {
    pub fn open(config: EnvConfig) -> ExecResult<Self> {
        let scratch = if config.work_dir.is_none() || config.exchange_dir.is_none() {
            Some(
                tempfile::Builder::new()
                    .prefix("envexec-")
                    .tempdir()
                    .map_err(|err| FileError::new(FileOp::Mkdir, std::env::temp_dir(), err))?,
            )
        } else {
            None
        };
        let scratch_path = scratch.as_ref().map(|dir| dir.path().to_path_buf());
        let work_dir = config
            .work_dir
            .clone()
            .or_else(|| scratch_path.as_ref().map(|p| p.join("work")))
            .ok_or_else(|| ExecError::backend("no work directory"))?;
        let exchange_dir = config
            .exchange_dir
            .clone()
            .or_else(|| scratch_path.as_ref().map(|p| p.join("exchange")))
            .ok_or_else(|| ExecError::backend("no exchange directory"))?;
        for dir in [&work_dir, &exchange_dir] {
            fs::create_dir_all(dir)
                .map_err(|err| FileError::new(FileOp::Mkdir, dir.as_path(), err))?;
        }

        let process = ProcessBuilder::new(&work_dir)
            .with_poll_interval(Duration::from_millis(config.poll_interval_ms.max(1)));
        let builder: Box<dyn CmdBuilder> = match config.backend {
            Backend::Process => Box::new(process),
            Backend::Seatbelt => Box::new(SeatbeltBuilder::new(process, config.sandbox)?),
        };
        debug!(
            backend = ?config.backend,
            work_dir = %work_dir.display(),
            exchange_dir = %exchange_dir.display(),
            "opened environment"
        );
        Ok(Self {
            builder,
            work_dir,
            exchange_dir,
            scratch,
            closed: false,
        })
    }

    /// Wrap an arbitrary builder over existing directories. Nothing is
    /// deleted on close.
    pub fn with_builder(
        builder: Box<dyn CmdBuilder>,
        work_dir: impl Into<PathBuf>,
        exchange_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            builder,
            work_dir: work_dir.into(),
            exchange_dir: exchange_dir.into(),
            scratch: None,
            closed: false,
        }
    }

    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    #[must_use]
    pub fn exchange_dir(&self) -> &Path {
        &self.exchange_dir
    }

    fn ensure_open(&self) -> ExecResult<()> {
        if self.closed {
            return Err(ExecError::backend("environment is closed"));
        }
        Ok(())
    }

    fn transfer(ctx: &Context, from: &Path, to: &Path, mode: u32) -> ExecResult<()> {
        ctx.check()?;
        let mut src =
            fs::File::open(from).map_err(|err| FileError::new(FileOp::Open, from, err))?;
        ensure_file_path(to).map_err(|err| FileError::new(FileOp::Mkdir, to, err))?;
        let mut dst =
            create_truncate(to, mode).map_err(|err| FileError::new(FileOp::Create, to, err))?;
        copy_file(ctx, &mut dst, &mut src).map_err(|err| FileError::new(FileOp::Copy, to, err))?;
        Ok(())
    }
}

impl Environment for LocalEnvironment {
    fn run(&self, ctx: &Context, cmd: &Cmd) -> ExecResult<Status> {
        self.ensure_open()?;
        let mut runner = self.builder.build(cmd)?;
        runner.start(ctx)?;
        match runner.wait(ctx) {
            Ok(status) => Ok(status),
            Err(err) => {
                if let Err(kill_err) = runner.kill() {
                    debug!(error = %kill_err, "kill after failed wait");
                }
                Err(err)
            }
        }
    }

    fn copy_in(&self, ctx: &Context, file: &FileRef) -> ExecResult<()> {
        self.ensure_open()?;
        let from = self.exchange_dir.join(&file.name);
        let to = self.work_dir.join(&file.path);
        Self::transfer(ctx, &from, &to, file.mode)
    }

    fn copy_out(&self, ctx: &Context, file: &FileRef) -> ExecResult<()> {
        self.ensure_open()?;
        let from = self.work_dir.join(&file.path);
        let to = self.exchange_dir.join(&file.name);
        Self::transfer(ctx, &from, &to, file.mode)
    }

    fn close(&mut self) -> ExecResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(scratch) = self.scratch.take() {
            scratch.close()?;
        }
        debug!(work_dir = %self.work_dir.display(), "closed environment");
        Ok(())
    }

    fn work_dir(&self) -> Option<&Path> {
        Some(&self.work_dir)
    }
}

impl Drop for LocalEnvironment {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(error = %err, "environment cleanup failed");
        }
    }
}
