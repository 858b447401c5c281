//! envexec: run one external command inside a pluggable execution environment.
//!
//! A run moves through four phases, each gated on the previous one:
//! `validate` checks the [`Cmd`] descriptor, `prepare` stages copy-in files,
//! `run` hands the descriptor to an [`env::Environment`], and `collect`
//! gathers copy-out files. Any failure comes back as a [`CmdError`] tagged
//! with the phase that produced it.

#![forbid(unsafe_code)]
// Backend internals are documented at the module level only.
#![allow(missing_docs)]

pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod files;
pub mod model;
pub mod orchestrator;
pub mod validate;

pub use crate::config::{load_cmd_file, load_env_config_file};
pub use crate::context::{CancelToken, Context, ContextError};
pub use crate::env::{open_environment, Backend, CmdBuilder, EnvConfig, Environment, Runner};
pub use crate::error::{
    CmdError, ErrorCode, ErrorInfo, ExecError, ExecResult, FileError, FileOp, Phase,
    ValidationError,
};
pub use crate::files::{
    collect_files, collect_files_in, copy_file, ensure_file_path, prepare_files, prepare_files_in,
    CollectedFiles, CopyInReader, CopyOutWriter, FileCollector, FileWriter, LocalFiles,
};
pub use crate::model::*;
pub use crate::orchestrator::{run_cmd, run_cmd_with_options, RunOptions};
pub use crate::validate::validate_cmd;
