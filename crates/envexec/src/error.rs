//! Error taxonomy for the orchestration pipeline.
//!
//! Collaborators (file sources, sinks, backends) return [`ExecError`]. The
//! orchestrator wraps whatever comes back in a [`CmdError`] carrying the
//! [`Phase`] that failed, keeping the original cause as its `source()`.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::context::ContextError;

pub type ExecResult<T> = Result<T, ExecError>;

/// Orchestration stage that produced an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Validate,
    Prepare,
    Run,
    Collect,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Prepare => "prepare",
            Self::Run => "run",
            Self::Collect => "collect",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Malformed descriptor. Raised before any I/O happens.
#[derive(Clone, Debug, PartialEq, Error, Diagnostic)]
pub enum ValidationError {
    #[error("no command specified")]
    #[diagnostic(code(envexec::validate::empty_args), help("args must name a program"))]
    EmptyArgs,
    #[error("time limit must not be negative (got {0}ms)")]
    #[diagnostic(code(envexec::validate::time_limit))]
    NegativeTimeLimit(i64),
    #[error("memory limit must not be negative (got {0} bytes)")]
    #[diagnostic(code(envexec::validate::memory_limit))]
    NegativeMemoryLimit(i64),
    #[error("process limit must not be negative (got {0})")]
    #[diagnostic(code(envexec::validate::proc_limit))]
    NegativeProcLimit(i64),
    #[error("cpu rate must be between 0 and 1 (got {0})")]
    #[diagnostic(code(envexec::validate::cpu_rate))]
    CpuRateOutOfRange(f64),
}

/// File operation that failed while staging or collecting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOp {
    Open,
    Mkdir,
    Create,
    Copy,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Mkdir => "mkdir",
            Self::Create => "create",
            Self::Copy => "copy",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Diagnostic)]
#[error("{op} {}: {source}", .path.display())]
#[diagnostic(code(envexec::file))]
pub struct FileError {
    pub op: FileOp,
    pub path: PathBuf,
    #[source]
    pub source: Box<ExecError>,
}

impl FileError {
    pub fn new(op: FileOp, path: impl Into<PathBuf>, source: impl Into<ExecError>) -> Self {
        Self {
            op,
            path: path.into(),
            source: Box::new(source.into()),
        }
    }
}

/// Cause of a failure anywhere below the orchestrator.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    File(#[from] FileError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    #[diagnostic(code(envexec::io))]
    Io(#[from] std::io::Error),
    #[error("sandbox unavailable: {message}")]
    #[diagnostic(
        code(envexec::sandbox::unavailable),
        help("use the process backend on platforms without sandbox-exec")
    )]
    SandboxUnavailable { message: String },
    #[error("policy denied: {message}")]
    #[diagnostic(code(envexec::sandbox::policy_denied))]
    PolicyDenied { message: String },
    #[error("backend error: {message}")]
    #[diagnostic(code(envexec::backend))]
    Backend { message: String },
    #[error("invalid configuration: {message}")]
    #[diagnostic(code(envexec::config))]
    Config { message: String },
}

impl ExecError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::Config {
            message: format!("{}: {err}", message.into()),
        }
    }

    /// The context error at the root of this error, if any.
    #[must_use]
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            Self::Context(err) => Some(*err),
            Self::File(err) => err.source.context_error(),
            _ => None,
        }
    }

    /// Summary without a phase; file errors carry `op` and `path` as context.
    #[must_use]
    pub fn to_error_info(&self) -> ErrorInfo {
        let context = match self {
            Self::File(err) => Some(serde_json::json!({
                "op": err.op,
                "path": err.path.display().to_string(),
            })),
            _ => None,
        };
        ErrorInfo {
            code: self.code().as_str().to_string(),
            phase: None,
            message: self.to_string(),
            context,
        }
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::File(err) => ExecError::code(&err.source),
            Self::Context(ContextError::Cancelled) => ErrorCode::Cancelled,
            Self::Context(ContextError::DeadlineExceeded) => ErrorCode::Timeout,
            Self::Io(_) => ErrorCode::Io,
            Self::SandboxUnavailable { .. } => ErrorCode::SandboxUnavailable,
            Self::PolicyDenied { .. } => ErrorCode::PolicyDenied,
            Self::Backend { .. } => ErrorCode::Backend,
            Self::Config { .. } => ErrorCode::Protocol,
        }
    }
}

/// Error crossing the orchestrator boundary, tagged with the failing phase.
#[derive(Debug, Error)]
#[error("{phase}: {cause}")]
pub struct CmdError {
    pub phase: Phase,
    #[source]
    pub cause: ExecError,
}

impl CmdError {
    pub fn new(phase: Phase, cause: impl Into<ExecError>) -> Self {
        Self {
            phase,
            cause: cause.into(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn cause(&self) -> &ExecError {
        &self.cause
    }

    #[must_use]
    pub fn into_cause(self) -> ExecError {
        self.cause
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.cause.code()
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    #[must_use]
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            phase: Some(self.phase),
            ..self.cause.to_error_info()
        }
    }
}

impl Diagnostic for CmdError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Diagnostic::code(&self.cause)
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Diagnostic::help(&self.cause)
    }
}

/// Stable machine-readable error codes. Each maps to a CLI exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "E_VALIDATION")]
    Validation,
    #[serde(rename = "E_SANDBOX_UNAVAILABLE")]
    SandboxUnavailable,
    #[serde(rename = "E_TIMEOUT")]
    Timeout,
    #[serde(rename = "E_CANCELLED")]
    Cancelled,
    #[serde(rename = "E_PROCESS_EXIT")]
    ProcessExit,
    #[serde(rename = "E_POLICY_DENIED")]
    PolicyDenied,
    #[serde(rename = "E_BACKEND")]
    Backend,
    #[serde(rename = "E_PROTOCOL")]
    Protocol,
    #[serde(rename = "E_IO")]
    Io,
}

impl ErrorCode {
    pub const ALL: [Self; 9] = [
        Self::Validation,
        Self::SandboxUnavailable,
        Self::Timeout,
        Self::Cancelled,
        Self::ProcessExit,
        Self::PolicyDenied,
        Self::Backend,
        Self::Protocol,
        Self::Io,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "E_VALIDATION",
            Self::SandboxUnavailable => "E_SANDBOX_UNAVAILABLE",
            Self::Timeout => "E_TIMEOUT",
            Self::Cancelled => "E_CANCELLED",
            Self::ProcessExit => "E_PROCESS_EXIT",
            Self::PolicyDenied => "E_POLICY_DENIED",
            Self::Backend => "E_BACKEND",
            Self::Protocol => "E_PROTOCOL",
            Self::Io => "E_IO",
        }
    }

    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }

    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Validation => 2,
            Self::SandboxUnavailable => 3,
            Self::Timeout => 4,
            Self::Cancelled => 5,
            Self::ProcessExit => 6,
            Self::PolicyDenied => 7,
            Self::Backend => 8,
            Self::Protocol => 9,
            Self::Io => 10,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable error summary for JSON output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}
