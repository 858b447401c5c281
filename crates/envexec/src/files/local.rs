use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{
    copy_file, create_truncate, ensure_file_path, CopyInReader, CopyOutWriter, FileCollector,
    FileWriter,
};
use crate::context::Context;
use crate::error::{ExecResult, FileError, FileOp};

const WRITTEN_FILE_MODE: u32 = 0o644;

/// Plain-filesystem source and sink. Relative paths resolve under `root`
/// when one is set, otherwise against the process working directory.
#[derive(Clone, Debug, Default)]
pub struct LocalFiles {
    root: Option<PathBuf>,
}

impl LocalFiles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl CopyInReader for LocalFiles {
    fn open_file(&self, ctx: &Context, path: &Path) -> ExecResult<File> {
        ctx.check()?;
        Ok(File::open(self.resolve(path))?)
    }
}

impl FileCollector for LocalFiles {
    fn collect_file(&self, ctx: &Context, path: &Path) -> ExecResult<File> {
        ctx.check()?;
        let resolved = self.resolve(path);
        let file =
            File::open(&resolved).map_err(|err| FileError::new(FileOp::Open, resolved, err))?;
        Ok(file)
    }
}

impl CopyOutWriter for LocalFiles {
    fn create_file(&self, ctx: &Context, path: &Path, mode: u32) -> ExecResult<File> {
        ctx.check()?;
        let resolved = self.resolve(path);
        ensure_file_path(&resolved)
            .map_err(|err| FileError::new(FileOp::Mkdir, resolved.clone(), err))?;
        let file = create_truncate(&resolved, mode)
            .map_err(|err| FileError::new(FileOp::Create, resolved, err))?;
        Ok(file)
    }
}

impl FileWriter for LocalFiles {
    fn write_file(&self, ctx: &Context, path: &Path, file: &mut File) -> ExecResult<()> {
        let mut out = self.create_file(ctx, path, WRITTEN_FILE_MODE)?;
        let bytes = copy_file(ctx, &mut out, file)
            .map_err(|err| FileError::new(FileOp::Copy, self.resolve(path), err))?;
        debug!(path = %path.display(), bytes, "wrote collected file");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use crate::ContextError;
    use std::io::Read;

    #[test]
    fn collect_missing_file_reports_open_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalFiles::rooted(dir.path());
        let err = local
            .collect_file(&Context::background(), Path::new("missing.txt"))
            .unwrap_err();
        match err {
            ExecError::File(file_err) => {
                assert_eq!(file_err.op, FileOp::Open);
                assert_eq!(file_err.path, dir.path().join("missing.txt"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn write_file_copies_into_nested_path() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("src.txt");
        std::fs::write(&src_path, "payload").unwrap();
        let local = LocalFiles::rooted(dir.path().join("out"));
        let mut src = File::open(&src_path).unwrap();
        local
            .write_file(&Context::background(), Path::new("a/b/c.txt"), &mut src)
            .unwrap();
        let mut written = String::new();
        File::open(dir.path().join("out/a/b/c.txt"))
            .unwrap()
            .read_to_string(&mut written)
            .unwrap();
        assert_eq!(written, "payload");
    }

    #[test]
    fn cancelled_context_stops_open() {
        let local = LocalFiles::new();
        let ctx = Context::background();
        ctx.token().cancel();
        let err = local.open_file(&ctx, Path::new("/dev/null")).unwrap_err();
        assert_eq!(err.context_error(), Some(ContextError::Cancelled));
    }

    #[cfg(unix)]
    #[test]
    fn create_file_applies_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let local = LocalFiles::rooted(dir.path());
        let file = local
            .create_file(&Context::background(), Path::new("x/run.sh"), 0o700)
            .unwrap();
        drop(file);
        let mode = std::fs::metadata(dir.path().join("x/run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700 & !current_umask());
    }

    #[cfg(unix)]
    fn current_umask() -> u32 {
        // Files created with 0o777 reveal the umask in their missing bits.
        let dir = tempfile::tempdir().unwrap();
        let probe = dir.path().join("probe");
        create_truncate(&probe, 0o777).unwrap();
        use std::os::unix::fs::PermissionsExt;
        0o777 & !std::fs::metadata(&probe).unwrap().permissions().mode()
    }
}
