use crate::error::{CmdError, Phase, ValidationError};
use crate::model::Cmd;

/// Check descriptor well-formedness before anything touches the filesystem or
/// a backend. Stops at the first failing rule, in this order: args, time
/// limit, memory limit, process limit, CPU rate.
pub fn validate_cmd(cmd: &Cmd) -> Result<(), CmdError> {
    check_cmd(cmd).map_err(|err| CmdError::new(Phase::Validate, err))
}

fn check_cmd(cmd: &Cmd) -> Result<(), ValidationError> {
    if cmd.args.is_empty() {
        return Err(ValidationError::EmptyArgs);
    }
    if cmd.time_limit_ms < 0 {
        return Err(ValidationError::NegativeTimeLimit(cmd.time_limit_ms));
    }
    if cmd.memory_limit < 0 {
        return Err(ValidationError::NegativeMemoryLimit(cmd.memory_limit));
    }
    if cmd.proc_limit < 0 {
        return Err(ValidationError::NegativeProcLimit(cmd.proc_limit));
    }
    // NaN fails `contains` as well.
    if !(0.0..=1.0).contains(&cmd.cpu_rate) {
        return Err(ValidationError::CpuRateOutOfRange(cmd.cpu_rate));
    }
    Ok(())
}
