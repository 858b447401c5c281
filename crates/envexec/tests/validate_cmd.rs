// Test module - relaxed lint rules
#![allow(clippy::unwrap_used)]
#![allow(clippy::float_cmp)]
#![allow(missing_docs)]

use envexec::{
    validate_cmd, Cmd, ExecError, Phase, ValidationError, DEFAULT_CPU_RATE, DEFAULT_MEMORY_LIMIT,
    DEFAULT_PROC_LIMIT, DEFAULT_TIME_LIMIT_MS,
};

fn cause(cmd: &Cmd) -> ValidationError {
    let err = validate_cmd(cmd).unwrap_err();
    assert_eq!(err.phase(), Phase::Validate);
    match err.into_cause() {
        ExecError::Validation(cause) => cause,
        other => unreachable_cause(&other),
    }
}

#[allow(clippy::panic)]
fn unreachable_cause(err: &ExecError) -> ValidationError {
    panic!("validation produced a non-validation cause: {err}")
}

#[test]
fn new_descriptor_has_defaults_and_validates() {
    let cmd = Cmd::new(["/bin/echo", "hello"]);
    assert_eq!(cmd.args, vec!["/bin/echo", "hello"]);
    assert_eq!(cmd.time_limit_ms, DEFAULT_TIME_LIMIT_MS);
    assert_eq!(cmd.time_limit_ms, 1_000);
    assert_eq!(cmd.memory_limit, DEFAULT_MEMORY_LIMIT);
    assert_eq!(cmd.memory_limit, 256 << 20);
    assert_eq!(cmd.proc_limit, DEFAULT_PROC_LIMIT);
    assert_eq!(cmd.cpu_rate, DEFAULT_CPU_RATE);
    assert!(cmd.env.is_empty() && cmd.files.is_empty());
    assert!(cmd.copy_in.is_empty() && cmd.copy_out.is_empty());
    validate_cmd(&cmd).unwrap();
}

#[test]
fn empty_args_fail_first() {
    let cmd = Cmd {
        time_limit_ms: -1,
        memory_limit: -1,
        ..Cmd::default()
    };
    assert_eq!(cause(&cmd), ValidationError::EmptyArgs);
}

#[test]
fn negative_limits_are_reported_in_order() {
    let base = || Cmd::new(["/bin/echo"]);
    assert_eq!(
        cause(&base().with_time_limit_ms(-1).with_memory_limit(-1)),
        ValidationError::NegativeTimeLimit(-1)
    );
    assert_eq!(
        cause(&base().with_memory_limit(-1).with_proc_limit(-1)),
        ValidationError::NegativeMemoryLimit(-1)
    );
    assert_eq!(
        cause(&base().with_proc_limit(-3).with_cpu_rate(2.0)),
        ValidationError::NegativeProcLimit(-3)
    );
}

#[test]
fn cpu_rate_outside_unit_interval_is_rejected() {
    let base = || Cmd::new(["/bin/echo"]);
    assert_eq!(
        cause(&base().with_cpu_rate(2.0)),
        ValidationError::CpuRateOutOfRange(2.0)
    );
    assert_eq!(
        cause(&base().with_cpu_rate(-0.1)),
        ValidationError::CpuRateOutOfRange(-0.1)
    );
    assert!(matches!(
        cause(&base().with_cpu_rate(f64::NAN)),
        ValidationError::CpuRateOutOfRange(rate) if rate.is_nan()
    ));
}

#[test]
fn boundary_values_are_accepted() {
    let cmd = Cmd::new(["/bin/echo"])
        .with_time_limit_ms(0)
        .with_memory_limit(0)
        .with_proc_limit(0)
        .with_cpu_rate(0.0);
    validate_cmd(&cmd).unwrap();
    validate_cmd(&cmd.with_cpu_rate(1.0)).unwrap();
}

#[test]
fn error_message_leads_with_phase() {
    let err = validate_cmd(&Cmd::default()).unwrap_err();
    assert_eq!(err.to_string(), "validate: no command specified");
    assert_eq!(err.exit_code(), 2);
}
