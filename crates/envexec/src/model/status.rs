use serde::{Deserialize, Serialize};
use std::fmt;

/// How the command terminated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Exited on its own with status 0.
    #[default]
    Normal,
    /// Terminated by a signal (including kills issued by the backend).
    Signalled,
    /// Exited with a non-zero status or otherwise failed at runtime.
    RuntimeError,
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::Signalled => "signalled",
            Self::RuntimeError => "runtime_error",
        };
        f.write_str(name)
    }
}

/// Result of one execution, produced once by the backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub status: ExitStatus,
    /// Backend diagnostic, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Consumed CPU time in milliseconds.
    pub time_ms: u64,
    /// Peak memory in bytes.
    pub memory: u64,
    /// Wall-clock run time in milliseconds.
    pub run_time_ms: u64,
    pub exit_code: i32,
}

impl Status {
    /// A `Normal` status with the given exit code.
    #[must_use]
    pub fn normal(exit_code: i32) -> Self {
        Self {
            status: ExitStatus::Normal,
            exit_code,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_normal(&self) -> bool {
        self.status == ExitStatus::Normal
    }
}
