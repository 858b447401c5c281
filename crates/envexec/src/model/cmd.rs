use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::{DEFAULT_CPU_RATE, DEFAULT_MEMORY_LIMIT, DEFAULT_PROC_LIMIT, DEFAULT_TIME_LIMIT_MS};

/// Descriptor of a command to run inside an environment, with its limits.
///
/// Limits are signed because descriptors are read from JSON/YAML files and CLI
/// flags; [`crate::validate_cmd`] rejects negative values before anything runs.
/// Once handed to [`crate::run_cmd`] the descriptor is only borrowed immutably.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Cmd {
    /// Argument vector; `args[0]` is the program.
    pub args: Vec<String>,
    /// `KEY=VALUE` pairs passed through unmodified.
    pub env: Vec<String>,
    /// Pre-opened handles keyed by descriptor slot. Owned by the caller's
    /// descriptor, never serialized.
    #[serde(skip)]
    pub files: BTreeMap<i32, File>,
    /// Whether the backend should allocate a TTY.
    pub tty: bool,
    /// CPU time limit in milliseconds.
    pub time_limit_ms: i64,
    /// Memory limit in bytes.
    pub memory_limit: i64,
    /// Maximum number of processes.
    pub proc_limit: i64,
    /// CPU rate as a fraction of one core, in `[0, 1]`.
    pub cpu_rate: f64,
    /// Destination path to source path, staged before the run.
    pub copy_in: BTreeMap<PathBuf, PathBuf>,
    /// Destination paths collected after the run.
    pub copy_out: Vec<PathBuf>,
    /// Directory that relative destinations and the process cwd resolve against.
    pub work_dir: Option<PathBuf>,
}

impl Default for Cmd {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            env: Vec::new(),
            files: BTreeMap::new(),
            tty: false,
            time_limit_ms: DEFAULT_TIME_LIMIT_MS,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            proc_limit: DEFAULT_PROC_LIMIT,
            cpu_rate: DEFAULT_CPU_RATE,
            copy_in: BTreeMap::new(),
            copy_out: Vec::new(),
            work_dir: None,
        }
    }
}

impl Cmd {
    /// Create a descriptor with default limits: 1s, 256 MiB, 1 process, 100% CPU.
    #[must_use]
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    #[must_use]
    pub fn with_file(mut self, slot: i32, file: File) -> Self {
        self.files.insert(slot, file);
        self
    }

    #[must_use]
    pub fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    #[must_use]
    pub fn with_time_limit_ms(mut self, ms: i64) -> Self {
        self.time_limit_ms = ms;
        self
    }

    #[must_use]
    pub fn with_memory_limit(mut self, bytes: i64) -> Self {
        self.memory_limit = bytes;
        self
    }

    #[must_use]
    pub fn with_proc_limit(mut self, procs: i64) -> Self {
        self.proc_limit = procs;
        self
    }

    #[must_use]
    pub fn with_cpu_rate(mut self, rate: f64) -> Self {
        self.cpu_rate = rate;
        self
    }

    /// Stage `src` at `dst` before the run.
    #[must_use]
    pub fn with_copy_in(mut self, dst: impl Into<PathBuf>, src: impl Into<PathBuf>) -> Self {
        self.copy_in.insert(dst.into(), src.into());
        self
    }

    /// Collect `path` after the run.
    #[must_use]
    pub fn with_copy_out(mut self, path: impl Into<PathBuf>) -> Self {
        self.copy_out.push(path.into());
        self
    }

    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Resolve a destination path against `work_dir`. Absolute paths and
    /// descriptors without a work dir are returned unchanged.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.work_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Split `env` into key/value pairs. Entries without `=` map to an empty value.
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env
            .iter()
            .map(|entry| entry.split_once('=').unwrap_or((entry.as_str(), "")))
    }
}

/// Spawn-ready projection of a [`Cmd`]: what an `execve` needs.
#[derive(Debug, Default)]
pub struct ExecveParam {
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub files: BTreeMap<i32, File>,
}

/// A unit of transfer across the environment boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Logical name on the host side of the boundary.
    pub name: String,
    /// Path relative to the environment's work directory.
    pub path: PathBuf,
    /// Permission bits applied to the written copy.
    #[serde(default = "default_file_mode")]
    pub mode: u32,
}

impl FileRef {
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            mode: default_file_mode(),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }
}

fn default_file_mode() -> u32 {
    0o644
}
