pub mod cmd;
pub mod ids;
pub mod status;

pub use cmd::{Cmd, ExecveParam, FileRef};
pub use ids::RunId;
pub use status::{ExitStatus, Status};

/// Default CPU time limit for a new descriptor, in milliseconds.
pub const DEFAULT_TIME_LIMIT_MS: i64 = 1_000;

/// Default memory limit for a new descriptor (256 MiB).
pub const DEFAULT_MEMORY_LIMIT: i64 = 256 << 20;

/// Default process-count limit for a new descriptor.
pub const DEFAULT_PROC_LIMIT: i64 = 1;

/// Default CPU rate for a new descriptor (100%).
pub const DEFAULT_CPU_RATE: f64 = 1.0;
