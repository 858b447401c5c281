// Test module - relaxed lint rules
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::type_complexity)]
#![allow(missing_docs)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use envexec::{
    run_cmd, run_cmd_with_options, Cmd, CmdError, Context, ContextError, CopyInReader,
    Environment, ErrorCode, ExecError, ExecResult, FileCollector, FileOp, FileRef, FileWriter,
    Phase, RunOptions, Status, ValidationError,
};

struct MockEnvironment {
    run: Box<dyn Fn(&Context, &Cmd) -> ExecResult<Status>>,
    runs: Cell<usize>,
    work_dir: Option<PathBuf>,
}

impl MockEnvironment {
    fn new(run: impl Fn(&Context, &Cmd) -> ExecResult<Status> + 'static) -> Self {
        Self {
            run: Box::new(run),
            runs: Cell::new(0),
            work_dir: None,
        }
    }

    fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    fn normal() -> Self {
        Self::new(|_, _| {
            Ok(Status {
                time_ms: 100,
                memory: 1024,
                run_time_ms: 150,
                ..Status::normal(0)
            })
        })
    }
}

impl Environment for MockEnvironment {
    fn run(&self, ctx: &Context, cmd: &Cmd) -> ExecResult<Status> {
        self.runs.set(self.runs.get() + 1);
        (self.run)(ctx, cmd)
    }

    fn copy_in(&self, _ctx: &Context, _file: &FileRef) -> ExecResult<()> {
        Ok(())
    }

    fn copy_out(&self, _ctx: &Context, _file: &FileRef) -> ExecResult<()> {
        Ok(())
    }

    fn close(&mut self) -> ExecResult<()> {
        Ok(())
    }

    fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }
}

struct MockFileReader {
    open: Box<dyn Fn(&Path) -> ExecResult<File>>,
    opened: RefCell<Vec<PathBuf>>,
}

impl MockFileReader {
    fn new(open: impl Fn(&Path) -> ExecResult<File> + 'static) -> Self {
        Self {
            open: Box::new(open),
            opened: RefCell::new(Vec::new()),
        }
    }

    fn unused() -> Self {
        Self::new(|path| panic!("unexpected open of {}", path.display()))
    }
}

impl CopyInReader for MockFileReader {
    fn open_file(&self, _ctx: &Context, path: &Path) -> ExecResult<File> {
        self.opened.borrow_mut().push(path.to_path_buf());
        (self.open)(path)
    }
}

struct MockFileCollector {
    collect: Box<dyn Fn(&[PathBuf]) -> ExecResult<BTreeMap<PathBuf, File>>>,
    batches: Cell<usize>,
}

impl MockFileCollector {
    fn new(collect: impl Fn(&[PathBuf]) -> ExecResult<BTreeMap<PathBuf, File>> + 'static) -> Self {
        Self {
            collect: Box::new(collect),
            batches: Cell::new(0),
        }
    }

    fn unused() -> Self {
        Self::new(|_| panic!("collector should not be called"))
    }
}

impl FileCollector for MockFileCollector {
    fn collect_file(&self, _ctx: &Context, path: &Path) -> ExecResult<File> {
        panic!("collect_file({}) should go through the batch", path.display())
    }

    fn collect_files(
        &self,
        _ctx: &Context,
        paths: &[PathBuf],
    ) -> ExecResult<BTreeMap<PathBuf, File>> {
        self.batches.set(self.batches.get() + 1);
        (self.collect)(paths)
    }
}

struct FailingSink;

impl FileWriter for FailingSink {
    fn write_file(&self, _ctx: &Context, _path: &Path, _file: &mut File) -> ExecResult<()> {
        Err(ExecError::backend("sink is full"))
    }
}

#[derive(Default)]
struct RecordingSink {
    written: RefCell<Vec<(PathBuf, String)>>,
}

impl FileWriter for RecordingSink {
    fn write_file(&self, _ctx: &Context, path: &Path, file: &mut File) -> ExecResult<()> {
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        self.written
            .borrow_mut()
            .push((path.to_path_buf(), contents));
        Ok(())
    }
}

fn input_file(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("source.txt");
    let mut file = File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

fn echo_cmd(dir: &tempfile::TempDir) -> Cmd {
    Cmd::new(["/bin/echo", "hello"])
        .with_time_limit_ms(1_000)
        .with_memory_limit(64 << 20)
        .with_work_dir(dir.path().join("box"))
}

fn reader_for(path: PathBuf) -> MockFileReader {
    MockFileReader::new(move |_| Ok(File::open(&path)?))
}

fn collector_for(path: PathBuf) -> MockFileCollector {
    MockFileCollector::new(move |paths| {
        let mut files = BTreeMap::new();
        for requested in paths {
            files.insert(requested.clone(), File::open(&path)?);
        }
        Ok(files)
    })
}

fn expect_err(result: Result<Status, CmdError>) -> CmdError {
    match result {
        Ok(status) => panic!("expected an error, got {status:?}"),
        Err(err) => err,
    }
}

#[test]
fn normal_run_returns_backend_status() {
    let dir = tempfile::tempdir().unwrap();
    let source = input_file(&dir, "input data");
    let cmd = echo_cmd(&dir)
        .with_copy_in("input.txt", &source)
        .with_copy_out("output.txt");
    let env = MockEnvironment::normal();
    let reader = reader_for(source.clone());
    let collector = collector_for(source);

    let status = run_cmd(&Context::background(), &env, &cmd, &reader, &collector).unwrap();

    assert!(status.is_normal());
    assert_eq!(status.exit_code, 0);
    assert_eq!(status.time_ms, 100);
    assert_eq!(status.memory, 1024);
    assert_eq!(status.run_time_ms, 150);
    assert_eq!(env.runs.get(), 1);
    assert_eq!(collector.batches.get(), 1);
    let staged = std::fs::read_to_string(dir.path().join("box/input.txt")).unwrap();
    assert_eq!(staged, "input data");
}

#[test]
fn invalid_descriptor_never_touches_collaborators() {
    let cmd = Cmd {
        args: Vec::new(),
        time_limit_ms: -1,
        memory_limit: -1,
        ..Cmd::default()
    };
    let env = MockEnvironment::new(|_, _| panic!("backend should not run"));
    let err = expect_err(run_cmd(
        &Context::background(),
        &env,
        &cmd,
        &MockFileReader::unused(),
        &MockFileCollector::unused(),
    ));

    assert_eq!(err.phase(), Phase::Validate);
    assert!(matches!(
        err.cause(),
        ExecError::Validation(ValidationError::EmptyArgs)
    ));
    assert_eq!(err.code(), ErrorCode::Validation);
    assert_eq!(env.runs.get(), 0);
}

#[test]
fn failed_source_open_is_a_prepare_error_and_skips_run() {
    let dir = tempfile::tempdir().unwrap();
    let cmd = echo_cmd(&dir).with_copy_in("input.txt", "missing.txt");
    let env = MockEnvironment::new(|_, _| panic!("backend should not run"));
    let reader = MockFileReader::new(|_| {
        Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such file").into())
    });

    let err = expect_err(run_cmd(
        &Context::background(),
        &env,
        &cmd,
        &reader,
        &MockFileCollector::unused(),
    ));

    assert_eq!(err.phase(), Phase::Prepare);
    match err.cause() {
        ExecError::File(file_err) => {
            assert_eq!(file_err.op, FileOp::Open);
            assert_eq!(file_err.path, PathBuf::from("missing.txt"));
        }
        other => panic!("unexpected cause: {other}"),
    }
    assert_eq!(err.to_string(), "prepare: open missing.txt: no such file");
    assert_eq!(env.runs.get(), 0);
    assert_eq!(reader.opened.borrow().len(), 1);
}

#[test]
fn backend_deadline_is_a_run_error() {
    let dir = tempfile::tempdir().unwrap();
    let cmd = Cmd::new(["/bin/sleep", "10"]).with_work_dir(dir.path());
    let env = MockEnvironment::new(|_, _| Err(ContextError::DeadlineExceeded.into()));

    let err = expect_err(run_cmd(
        &Context::background(),
        &env,
        &cmd,
        &MockFileReader::unused(),
        &MockFileCollector::unused(),
    ));

    assert_eq!(err.phase(), Phase::Run);
    assert_eq!(
        err.cause().context_error(),
        Some(ContextError::DeadlineExceeded)
    );
    assert_eq!(err.code(), ErrorCode::Timeout);
    let source = std::error::Error::source(&err).map(ToString::to_string);
    assert_eq!(source.as_deref(), Some("context deadline exceeded"));
}

#[test]
fn empty_copy_out_skips_collection() {
    let dir = tempfile::tempdir().unwrap();
    let cmd = echo_cmd(&dir);
    let env = MockEnvironment::normal();
    let collector = MockFileCollector::unused();

    let status = run_cmd(
        &Context::background(),
        &env,
        &cmd,
        &MockFileReader::unused(),
        &collector,
    )
    .unwrap();

    assert!(status.is_normal());
    assert_eq!(collector.batches.get(), 0);
}

#[test]
fn collector_failure_is_a_collect_error() {
    let dir = tempfile::tempdir().unwrap();
    let cmd = echo_cmd(&dir).with_copy_out("output.txt");
    let collector = MockFileCollector::new(|_| Err(ExecError::backend("collector offline")));

    let err = expect_err(run_cmd(
        &Context::background(),
        &MockEnvironment::normal(),
        &cmd,
        &MockFileReader::unused(),
        &collector,
    ));

    assert_eq!(err.phase(), Phase::Collect);
    assert_eq!(err.to_string(), "collect: backend error: collector offline");
}

#[test]
fn sink_receives_each_collected_file() {
    let dir = tempfile::tempdir().unwrap();
    let source = input_file(&dir, "result");
    let cmd = echo_cmd(&dir)
        .with_copy_out("a.txt")
        .with_copy_out("b.txt");
    let sink = RecordingSink::default();

    run_cmd_with_options(
        &Context::background(),
        &MockEnvironment::normal(),
        &cmd,
        &MockFileReader::unused(),
        &collector_for(source),
        RunOptions::default().with_sink(&sink),
    )
    .unwrap();

    let written = sink.written.borrow();
    assert_eq!(
        *written,
        vec![
            (PathBuf::from("a.txt"), "result".to_string()),
            (PathBuf::from("b.txt"), "result".to_string()),
        ]
    );
}

#[test]
fn sink_failure_is_a_collect_error() {
    let dir = tempfile::tempdir().unwrap();
    let source = input_file(&dir, "result");
    let cmd = echo_cmd(&dir).with_copy_out("out.txt");

    let err = expect_err(run_cmd_with_options(
        &Context::background(),
        &MockEnvironment::normal(),
        &cmd,
        &MockFileReader::unused(),
        &collector_for(source),
        RunOptions::default().with_sink(&FailingSink),
    ));

    assert_eq!(err.phase(), Phase::Collect);
    match err.cause() {
        ExecError::File(file_err) => {
            assert_eq!(file_err.op, FileOp::Copy);
            assert_eq!(file_err.path, PathBuf::from("out.txt"));
        }
        other => panic!("unexpected cause: {other}"),
    }
}

#[test]
fn environment_work_dir_anchors_relative_paths() {
    let dir = tempfile::tempdir().unwrap();
    let source = input_file(&dir, "staged");
    let work = dir.path().join("env-work");
    let cmd = Cmd::new(["/bin/cat", "in.txt"])
        .with_copy_in("in.txt", &source)
        .with_copy_out("out.txt");
    let requested = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&requested);
    let collector = MockFileCollector::new(move |paths| {
        seen.borrow_mut().extend(paths.iter().cloned());
        let mut files = BTreeMap::new();
        for path in paths {
            files.insert(path.clone(), File::open(&path.with_file_name("in.txt"))?);
        }
        Ok(files)
    });
    let sink = RecordingSink::default();

    run_cmd_with_options(
        &Context::background(),
        &MockEnvironment::normal().with_work_dir(&work),
        &cmd,
        &reader_for(source),
        &collector,
        RunOptions::default().with_sink(&sink),
    )
    .unwrap();

    assert_eq!(
        std::fs::read_to_string(work.join("in.txt")).unwrap(),
        "staged"
    );
    assert_eq!(*requested.borrow(), vec![work.join("out.txt")]);
    assert_eq!(
        *sink.written.borrow(),
        vec![(PathBuf::from("out.txt"), "staged".to_string())]
    );
}

#[test]
fn descriptor_work_dir_wins_over_environment() {
    let dir = tempfile::tempdir().unwrap();
    let source = input_file(&dir, "staged");
    let cmd = echo_cmd(&dir).with_copy_in("in.txt", &source);

    run_cmd(
        &Context::background(),
        &MockEnvironment::normal().with_work_dir(dir.path().join("env-work")),
        &cmd,
        &reader_for(source),
        &MockFileCollector::unused(),
    )
    .unwrap();

    assert!(dir.path().join("box/in.txt").is_file());
    assert!(!dir.path().join("env-work").exists());
}

#[test]
fn cancelled_context_stops_staging() {
    let dir = tempfile::tempdir().unwrap();
    let source = input_file(&dir, "x");
    let cmd = echo_cmd(&dir).with_copy_in("input.txt", &source);
    let ctx = Context::background();
    ctx.token().cancel();
    let reader = reader_for(source);

    let err = expect_err(run_cmd(
        &ctx,
        &MockEnvironment::new(|_, _| panic!("backend should not run")),
        &cmd,
        &reader,
        &MockFileCollector::unused(),
    ));

    assert_eq!(err.phase(), Phase::Prepare);
    assert_eq!(err.code(), ErrorCode::Cancelled);
    assert!(reader.opened.borrow().is_empty());
}

#[test]
fn error_info_carries_file_context() {
    let dir = tempfile::tempdir().unwrap();
    let cmd = echo_cmd(&dir).with_copy_in("input.txt", "gone.txt");
    let reader = MockFileReader::new(|_| {
        Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into())
    });

    let err = expect_err(run_cmd(
        &Context::background(),
        &MockEnvironment::normal(),
        &cmd,
        &reader,
        &MockFileCollector::unused(),
    ));
    let info = err.to_error_info();

    assert_eq!(info.code, "E_IO");
    assert_eq!(info.phase, Some(Phase::Prepare));
    let context = info.context.unwrap();
    assert_eq!(context["op"], "open");
    assert_eq!(context["path"], "gone.txt");
}
