//! The four-phase pipeline: validate, prepare, run, collect.

use std::fmt;
use tracing::{debug, info_span};

use crate::context::Context;
use crate::env::Environment;
use crate::error::{CmdError, ExecError, FileError, FileOp, Phase};
use crate::files::{collect_files_in, prepare_files_in, CopyInReader, FileCollector, FileWriter};
use crate::model::{Cmd, RunId, Status};
use crate::validate::validate_cmd;

/// Optional behaviour on top of [`run_cmd`].
#[derive(Clone, Copy, Default)]
pub struct RunOptions<'a> {
    /// Receives every collected file before the handles are released.
    pub sink: Option<&'a dyn FileWriter>,
}

impl fmt::Debug for RunOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("sink", &self.sink.map(|_| "FileWriter"))
            .finish()
    }
}

impl<'a> RunOptions<'a> {
    #[must_use]
    pub fn with_sink(mut self, sink: &'a dyn FileWriter) -> Self {
        self.sink = Some(sink);
        self
    }
}

/// Run `cmd` in `env`, staging inputs from `copy_in` and collecting outputs
/// through `copy_out`.
///
/// Each phase runs only if the previous one succeeded. The backend is never
/// called when validation or staging fails. Collection is skipped entirely
/// when `cmd.copy_out` is empty. Collected handles are closed before this
/// function returns, on success and on failure.
///
/// Relative copy-in and copy-out paths resolve against `cmd.work_dir`, or
/// against [`Environment::work_dir`] when the descriptor leaves it unset.
pub fn run_cmd(
    ctx: &Context,
    env: &dyn Environment,
    cmd: &Cmd,
    copy_in: &dyn CopyInReader,
    copy_out: &dyn FileCollector,
) -> Result<Status, CmdError> {
    run_cmd_with_options(ctx, env, cmd, copy_in, copy_out, RunOptions::default())
}

/// [`run_cmd`] with a sink for collected files.
pub fn run_cmd_with_options(
    ctx: &Context,
    env: &dyn Environment,
    cmd: &Cmd,
    copy_in: &dyn CopyInReader,
    copy_out: &dyn FileCollector,
    options: RunOptions<'_>,
) -> Result<Status, CmdError> {
    let run_id = RunId::new();
    let program = cmd.args.first().map_or("", String::as_str);
    let span = info_span!("run_cmd", %run_id, program);
    let _enter = span.enter();

    validate_cmd(cmd)?;
    debug!(phase = %Phase::Validate, "descriptor valid");

    let work_dir = cmd.work_dir.as_deref().or_else(|| env.work_dir());
    prepare_files_in(ctx, cmd, work_dir, copy_in)
        .map_err(|err| CmdError::new(Phase::Prepare, err))?;
    debug!(phase = %Phase::Prepare, staged = cmd.copy_in.len(), "inputs staged");

    let status = env
        .run(ctx, cmd)
        .map_err(|err| CmdError::new(Phase::Run, err))?;
    debug!(
        phase = %Phase::Run,
        status = %status.status,
        exit_code = status.exit_code,
        time_ms = status.time_ms,
        "command finished"
    );

    if !cmd.copy_out.is_empty() {
        let mut collected = collect_files_in(ctx, &cmd.copy_out, work_dir, copy_out)
            .map_err(|err| CmdError::new(Phase::Collect, err))?;
        if let Some(sink) = options.sink {
            for (path, file) in collected.iter_mut() {
                sink.write_file(ctx, path, file)
                    .map_err(|err| CmdError::new(Phase::Collect, sink_error(path, err)))?;
            }
        }
        debug!(phase = %Phase::Collect, collected = collected.len(), "outputs collected");
    }

    Ok(status)
}

fn sink_error(path: &std::path::Path, err: ExecError) -> ExecError {
    match err {
        ExecError::File(_) => err,
        other => FileError::new(FileOp::Copy, path, other).into(),
    }
}
