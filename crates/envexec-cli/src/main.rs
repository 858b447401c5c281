//! envexec CLI: run one command inside an execution environment.
//!
//! Builds a descriptor from a file and flags, stages inputs, runs the command
//! and collects outputs, then reports the resulting status.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // CLI must print to stdout
#![allow(clippy::print_stderr)] // CLI must print to stderr
#![allow(clippy::exit)] // CLI uses exit codes

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use envexec::env::LocalEnvironment;
use envexec::{
    load_cmd_file, load_env_config_file, run_cmd_with_options, validate_cmd, Backend, CancelToken,
    Cmd, CmdError, Context, EnvConfig, Environment, ErrorCode, ErrorInfo, ExecError, LocalFiles,
    RunOptions, Status,
};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "ENVEXEC_LOG";

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum BackendArg {
    Process,
    Seatbelt,
}

impl From<BackendArg> for Backend {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Process => Self::Process,
            BackendArg::Seatbelt => Self::Seatbelt,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "envexec", version, about = "Run a command inside an execution environment")]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    #[arg(
        long,
        short = 'v',
        global = true,
        help = "Debug logging to stderr (otherwise filtered by ENVEXEC_LOG, default warn)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate, stage, run and collect a command
    Run(RunArgs),
    /// Check a descriptor file without running it
    Validate {
        #[arg(long, help = "Descriptor file (JSON, or YAML by extension)")]
        cmd: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long)]
    json: bool,
    #[arg(long, help = "Descriptor file (JSON, or YAML by extension)")]
    cmd: Option<PathBuf>,
    #[arg(long, help = "Environment config file (JSON, or YAML by extension)")]
    env_config: Option<PathBuf>,
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,
    #[arg(long, help = "Directory the command runs in (scratch if unset)")]
    work_dir: Option<PathBuf>,
    #[arg(long, help = "Host-side directory for environment copy-in/copy-out")]
    exchange_dir: Option<PathBuf>,
    #[arg(long, allow_negative_numbers = true)]
    time_limit_ms: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    memory_limit: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    proc_limit: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    cpu_rate: Option<f64>,
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,
    #[arg(long = "copy-in", value_name = "DST=SRC", value_parser = parse_copy_in)]
    copy_in: Vec<(PathBuf, PathBuf)>,
    #[arg(long = "copy-out", value_name = "PATH")]
    copy_out: Vec<PathBuf>,
    #[arg(long, help = "Write collected copy-out files into this directory")]
    output_dir: Option<PathBuf>,
    #[arg(long, help = "File connected to the command's stdin")]
    stdin: Option<PathBuf>,
    #[arg(long, help = "File receiving the command's stdout")]
    stdout: Option<PathBuf>,
    #[arg(long, help = "File receiving the command's stderr")]
    stderr: Option<PathBuf>,
    #[arg(long, help = "Overall deadline for the whole run")]
    timeout_ms: Option<u64>,
    #[arg(last = true)]
    args: Vec<String>,
}

fn parse_copy_in(value: &str) -> std::result::Result<(PathBuf, PathBuf), String> {
    match value.split_once('=') {
        Some((dst, src)) if !dst.is_empty() && !src.is_empty() => {
            Ok((PathBuf::from(dst), PathBuf::from(src)))
        }
        _ => Err(format!("expected DST=SRC, got {value:?}")),
    }
}

/// Configure color output based on CLI flag and environment
fn configure_colors(mode: ColorMode) {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            if std::env::var("NO_COLOR").is_ok() {
                false
            } else {
                // Diagnostics go to stderr
                supports_color::on(supports_color::Stream::Stderr).is_some()
            }
        }
    };

    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_colors(cli.color);
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Validate { cmd, json } => cmd_validate(cmd, json),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

/// Handle the run command.
fn cmd_run(args: RunArgs) -> Result<()> {
    let json = args.json;
    let config = match build_env_config(&args) {
        Ok(config) => config,
        Err(err) => return emit_exec_error(json, err),
    };
    let cmd = match build_cmd(&args) {
        Ok(cmd) => cmd,
        Err(err) => return emit_exec_error(json, err),
    };
    let mut env = match LocalEnvironment::open(config) {
        Ok(env) => env,
        Err(err) => return emit_exec_error(json, err),
    };

    let token = CancelToken::new();
    let handler_token = token.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!(error = %err, "failed to install ctrl-c handler");
    }
    let mut ctx = Context::background().with_cancel(token);
    if let Some(ms) = args.timeout_ms {
        ctx = ctx.with_timeout(Duration::from_millis(ms));
    }

    // Copy-in sources come from the caller's cwd; copy-out paths arrive
    // already resolved against the environment's work dir.
    let copy_in = LocalFiles::new();
    let collector = LocalFiles::new();
    let sink = args.output_dir.as_ref().map(LocalFiles::rooted);
    let mut options = RunOptions::default();
    if let Some(sink) = sink.as_ref() {
        options = options.with_sink(sink);
    }

    let result = run_cmd_with_options(&ctx, &env, &cmd, &copy_in, &collector, options);
    if let Err(err) = env.close() {
        debug!(error = %err, "environment close failed");
    }
    emit_result(json, result)
}

/// Handle the validate command.
fn cmd_validate(path: PathBuf, json: bool) -> Result<()> {
    #[derive(Serialize)]
    struct Valid<'a> {
        valid: bool,
        args: &'a [String],
    }

    let cmd = match load_cmd_file(&path) {
        Ok(cmd) => cmd,
        Err(err) => return emit_exec_error(json, err),
    };
    if let Err(err) = validate_cmd(&cmd) {
        return emit_cmd_error(json, err);
    }
    if json {
        let payload = serde_json::to_string(&Valid {
            valid: true,
            args: &cmd.args,
        })
        .into_diagnostic()?;
        println!("{payload}");
    } else {
        eprintln!("descriptor valid: {}", path.display());
    }
    Ok(())
}

/// Handle the completions command.
#[allow(clippy::unnecessary_wraps)] // Consistent with other command handlers
fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

// =============================================================================
// Descriptor assembly
// =============================================================================

fn build_env_config(args: &RunArgs) -> std::result::Result<EnvConfig, ExecError> {
    let mut config = match args.env_config.as_ref() {
        Some(path) => load_env_config_file(path)?,
        None => EnvConfig::default(),
    };
    if let Some(backend) = args.backend {
        config.backend = backend.into();
    }
    if let Some(dir) = args.work_dir.as_ref() {
        config.work_dir = Some(dir.clone());
    }
    if let Some(dir) = args.exchange_dir.as_ref() {
        config.exchange_dir = Some(dir.clone());
    }
    Ok(config)
}

/// Flags override whatever the descriptor file says.
fn build_cmd(args: &RunArgs) -> std::result::Result<Cmd, ExecError> {
    let mut cmd = match args.cmd.as_ref() {
        Some(path) => load_cmd_file(path)?,
        None => Cmd::default(),
    };
    if !args.args.is_empty() {
        cmd.args = args.args.clone();
    }
    if let Some(ms) = args.time_limit_ms {
        cmd.time_limit_ms = ms;
    }
    if let Some(bytes) = args.memory_limit {
        cmd.memory_limit = bytes;
    }
    if let Some(procs) = args.proc_limit {
        cmd.proc_limit = procs;
    }
    if let Some(rate) = args.cpu_rate {
        cmd.cpu_rate = rate;
    }
    cmd.env.extend(args.env.iter().cloned());
    for (dst, src) in &args.copy_in {
        cmd.copy_in.insert(dst.clone(), src.clone());
    }
    cmd.copy_out.extend(args.copy_out.iter().cloned());

    if let Some(path) = args.stdin.as_ref() {
        cmd.files.insert(0, File::open(path)?);
    }
    if let Some(path) = args.stdout.as_ref() {
        cmd.files.insert(1, File::create(path)?);
    }
    if let Some(path) = args.stderr.as_ref() {
        cmd.files.insert(2, File::create(path)?);
    }
    Ok(cmd)
}

// =============================================================================
// Output
// =============================================================================

fn emit_result(json: bool, result: std::result::Result<Status, CmdError>) -> Result<()> {
    match result {
        Ok(status) => {
            if json {
                let payload = serde_json::to_string(&status).into_diagnostic()?;
                println!("{payload}");
            } else {
                eprintln!(
                    "run completed: {} (exit code {}, {}ms)",
                    status.status, status.exit_code, status.run_time_ms
                );
            }
            if status.is_normal() {
                Ok(())
            } else {
                std::process::exit(ErrorCode::ProcessExit.exit_code());
            }
        }
        Err(err) => emit_cmd_error(json, err),
    }
}

fn emit_cmd_error(json: bool, err: CmdError) -> Result<()> {
    let info = err.to_error_info();
    let exit = err.exit_code();
    emit_error(json, &info, exit, miette::Report::new(err))
}

fn emit_exec_error(json: bool, err: ExecError) -> Result<()> {
    let info = err.to_error_info();
    let exit = err.code().exit_code();
    emit_error(json, &info, exit, miette::Report::new(err))
}

fn emit_error(json: bool, info: &ErrorInfo, exit: i32, report: miette::Report) -> Result<()> {
    if json {
        let payload = serde_json::to_string(info).into_diagnostic()?;
        println!("{payload}");
    } else {
        eprintln!("{report:?}");
    }
    std::process::exit(exit);
}
