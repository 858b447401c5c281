//! Moving files across the environment boundary.
//!
//! [`prepare_files`] stages a descriptor's copy-in table before the run and
//! [`collect_files`] gathers its copy-out list afterwards. The source and sink
//! are collaborators behind [`CopyInReader`] and [`FileCollector`]; this module
//! only sequences them and owns the handles it opens.

pub mod local;

pub use local::LocalFiles;

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::context::Context;
use crate::error::{ExecResult, FileError, FileOp};
use crate::model::Cmd;

const COPY_CHUNK: usize = 64 * 1024;
const DIR_MODE: u32 = 0o755;
const STAGED_FILE_MODE: u32 = 0o644;

/// Source of copy-in files.
pub trait CopyInReader {
    /// Open `path` for reading.
    fn open_file(&self, ctx: &Context, path: &Path) -> ExecResult<File>;
}

/// Sink that hands back copy-out files after the run.
pub trait FileCollector {
    /// Open a single output for reading.
    fn collect_file(&self, ctx: &Context, path: &Path) -> ExecResult<File>;

    /// Open every output in `paths`. Stops at the first failure or once `ctx`
    /// is done; handles opened so far are dropped with the partial map.
    fn collect_files(
        &self,
        ctx: &Context,
        paths: &[PathBuf],
    ) -> ExecResult<BTreeMap<PathBuf, File>> {
        let mut files = BTreeMap::new();
        for path in paths {
            ctx.check()?;
            let file = self.collect_file(ctx, path)?;
            files.insert(path.clone(), file);
        }
        Ok(files)
    }
}

/// Destination for collected files.
pub trait FileWriter {
    /// Persist the contents of `file` under `path`.
    fn write_file(&self, ctx: &Context, path: &Path, file: &mut File) -> ExecResult<()>;
}

/// Creates writable files on the far side of a copy-out.
pub trait CopyOutWriter {
    fn create_file(&self, ctx: &Context, path: &Path, mode: u32) -> ExecResult<File>;
}

/// Stream `src` into `dst` and flush `dst` to disk. The context is polled
/// between chunks, so a cancelled copy stops part-way through.
pub fn copy_file<R>(ctx: &Context, dst: &mut File, src: &mut R) -> ExecResult<u64>
where
    R: Read + ?Sized,
{
    let mut buf = vec![0_u8; COPY_CHUNK];
    let mut written: u64 = 0;
    loop {
        ctx.check()?;
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        let chunk = buf.get(..n).unwrap_or_default();
        dst.write_all(chunk)?;
        written += n as u64;
    }
    dst.sync_all()?;
    Ok(written)
}

/// Make sure the parent directory of `path` exists.
pub fn ensure_file_path(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => create_dir_all(dir),
        _ => Ok(()),
    }
}

fn create_dir_all(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_MODE);
    builder.create(dir)
}

/// Create or truncate `path` for writing.
pub(crate) fn create_truncate(path: &Path, mode: u32) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path)
}

/// Stage every copy-in entry of `cmd` before execution.
///
/// Each entry opens its source, creates the destination's parent directory,
/// truncates the destination and copies the bytes, in that order. Both
/// handles are dropped before the next entry starts. The first failure aborts
/// staging; entries already copied are left in place.
pub fn prepare_files(ctx: &Context, cmd: &Cmd, copy_in: &dyn CopyInReader) -> ExecResult<()> {
    prepare_files_in(ctx, cmd, None, copy_in)
}

/// [`prepare_files`], with relative destinations resolved against `base`
/// when the descriptor has no `work_dir` of its own.
pub fn prepare_files_in(
    ctx: &Context,
    cmd: &Cmd,
    base: Option<&Path>,
    copy_in: &dyn CopyInReader,
) -> ExecResult<()> {
    let root = cmd.work_dir.as_deref().or(base);
    for (dst, src) in &cmd.copy_in {
        ctx.check()?;
        stage_file(ctx, &resolve_under(root, dst), src, copy_in)?;
    }
    Ok(())
}

fn resolve_under(root: Option<&Path>, path: &Path) -> PathBuf {
    match root {
        Some(root) if path.is_relative() => root.join(path),
        _ => path.to_path_buf(),
    }
}

fn stage_file(
    ctx: &Context,
    dst: &Path,
    src: &Path,
    copy_in: &dyn CopyInReader,
) -> ExecResult<()> {
    let mut src_file = copy_in
        .open_file(ctx, src)
        .map_err(|err| FileError::new(FileOp::Open, src, err))?;
    ensure_file_path(dst).map_err(|err| FileError::new(FileOp::Mkdir, dst, err))?;
    let mut dst_file = create_truncate(dst, STAGED_FILE_MODE)
        .map_err(|err| FileError::new(FileOp::Create, dst, err))?;
    let bytes = copy_file(ctx, &mut dst_file, &mut src_file)
        .map_err(|err| FileError::new(FileOp::Copy, dst, err))?;
    debug!(src = %src.display(), dst = %dst.display(), bytes, "staged file");
    Ok(())
}

/// Handles returned by a collection. Every handle is closed when this value
/// is dropped, whichever way the caller leaves the scope.
#[derive(Debug, Default)]
pub struct CollectedFiles {
    files: BTreeMap<PathBuf, File>,
}

impl CollectedFiles {
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&File> {
        self.files.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Path, &mut File)> {
        self.files
            .iter_mut()
            .map(|(path, file)| (path.as_path(), file))
    }
}

impl From<BTreeMap<PathBuf, File>> for CollectedFiles {
    fn from(files: BTreeMap<PathBuf, File>) -> Self {
        Self { files }
    }
}

impl Drop for CollectedFiles {
    fn drop(&mut self) {
        if !self.files.is_empty() {
            debug!(count = self.files.len(), "releasing collected files");
        }
    }
}

/// Gather `copy_out` through `collector`. An empty list is a no-op that
/// never calls the collector; otherwise collector errors are returned as-is.
pub fn collect_files(
    ctx: &Context,
    copy_out: &[PathBuf],
    collector: &dyn FileCollector,
) -> ExecResult<CollectedFiles> {
    if copy_out.is_empty() {
        return Ok(CollectedFiles::default());
    }
    let files = collector.collect_files(ctx, copy_out)?;
    Ok(CollectedFiles::from(files))
}

/// [`collect_files`], asking the collector for paths resolved against
/// `base`. The returned set stays keyed by the paths in `copy_out`.
pub fn collect_files_in(
    ctx: &Context,
    copy_out: &[PathBuf],
    base: Option<&Path>,
    collector: &dyn FileCollector,
) -> ExecResult<CollectedFiles> {
    if base.is_none() || copy_out.is_empty() {
        return collect_files(ctx, copy_out, collector);
    }
    let resolved: Vec<PathBuf> = copy_out
        .iter()
        .map(|path| resolve_under(base, path))
        .collect();
    let mut files = collector.collect_files(ctx, &resolved)?;
    let mut keyed = BTreeMap::new();
    for (path, full) in copy_out.iter().zip(&resolved) {
        if let Some(file) = files.remove(full) {
            keyed.insert(path.clone(), file);
        }
    }
    Ok(CollectedFiles::from(keyed))
}

