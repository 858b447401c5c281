//! Descriptor and environment files. JSON by default, YAML for `.yaml`/`.yml`.

use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use crate::env::EnvConfig;
use crate::error::{ExecError, ExecResult, FileError, FileOp};
use crate::model::Cmd;

pub fn load_cmd_file(path: impl AsRef<Path>) -> ExecResult<Cmd> {
    load_file(path.as_ref())
}

pub fn load_env_config_file(path: impl AsRef<Path>) -> ExecResult<EnvConfig> {
    load_file(path.as_ref())
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

fn load_file<T: DeserializeOwned>(path: &Path) -> ExecResult<T> {
    let data = fs::read_to_string(path).map_err(|err| FileError::new(FileOp::Open, path, err))?;
    if is_yaml(path) {
        serde_yml::from_str(&data).map_err(|err| ExecError::config("failed to parse yaml", err))
    } else {
        serde_json::from_str(&data).map_err(|err| ExecError::config("failed to parse json", err))
    }
}
