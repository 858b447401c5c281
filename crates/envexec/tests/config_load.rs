// Test module - relaxed lint rules
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::float_cmp)]
#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use envexec::{
    load_cmd_file, load_env_config_file, validate_cmd, Backend, ErrorCode, ExecError, FileOp,
    DEFAULT_PROC_LIMIT,
};

#[test]
fn json_descriptor_loads_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cmd.json");
    fs::write(
        &path,
        r#"{
            "args": ["/bin/echo", "hello"],
            "env": ["LANG=C"],
            "time_limit_ms": 2000,
            "copy_in": {"input.txt": "/tmp/source.txt"},
            "copy_out": ["output.txt"]
        }"#,
    )
    .unwrap();

    let cmd = load_cmd_file(&path).unwrap();

    assert_eq!(cmd.args, vec!["/bin/echo", "hello"]);
    assert_eq!(cmd.env, vec!["LANG=C"]);
    assert_eq!(cmd.time_limit_ms, 2000);
    assert_eq!(cmd.proc_limit, DEFAULT_PROC_LIMIT);
    assert_eq!(cmd.cpu_rate, 1.0);
    assert_eq!(
        cmd.copy_in.get(&PathBuf::from("input.txt")),
        Some(&PathBuf::from("/tmp/source.txt"))
    );
    assert_eq!(cmd.copy_out, vec![PathBuf::from("output.txt")]);
    assert!(cmd.files.is_empty());
    validate_cmd(&cmd).unwrap();
}

#[test]
fn yaml_descriptor_loads_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cmd.yml");
    fs::write(
        &path,
        "args: [/bin/cat]\nmemory_limit: 1048576\ncpu_rate: 0.5\nwork_dir: /srv/box\n",
    )
    .unwrap();

    let cmd = load_cmd_file(&path).unwrap();

    assert_eq!(cmd.args, vec!["/bin/cat"]);
    assert_eq!(cmd.memory_limit, 1_048_576);
    assert_eq!(cmd.cpu_rate, 0.5);
    assert_eq!(cmd.work_dir, Some(PathBuf::from("/srv/box")));
}

#[test]
fn negative_limit_loads_but_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cmd.json");
    fs::write(&path, r#"{"args": ["/bin/true"], "proc_limit": -2}"#).unwrap();

    let cmd = load_cmd_file(&path).unwrap();
    let err = validate_cmd(&cmd).unwrap_err();

    assert_eq!(err.code(), ErrorCode::Validation);
    assert_eq!(
        err.to_string(),
        "validate: process limit must not be negative (got -2)"
    );
}

#[test]
fn malformed_json_is_a_protocol_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cmd.json");
    fs::write(&path, "{ invalid json }").unwrap();

    let err = load_cmd_file(&path).unwrap_err();

    assert!(matches!(err, ExecError::Config { .. }));
    assert_eq!(err.code(), ErrorCode::Protocol);
    assert!(err.to_string().contains("failed to parse json"));
}

#[test]
fn missing_file_is_an_open_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");

    let err = load_cmd_file(&path).unwrap_err();

    match err {
        ExecError::File(file_err) => {
            assert_eq!(file_err.op, FileOp::Open);
            assert_eq!(file_err.path, path);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn env_config_yaml_selects_backend_and_policy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("env.yaml");
    fs::write(
        &path,
        "backend: seatbelt\nwork_dir: /tmp/w\nsandbox:\n  allowed_read: [/usr/lib]\n  network: true\n",
    )
    .unwrap();

    let config = load_env_config_file(&path).unwrap();

    assert_eq!(config.backend, Backend::Seatbelt);
    assert_eq!(config.work_dir, Some(PathBuf::from("/tmp/w")));
    assert_eq!(config.exchange_dir, None);
    assert_eq!(config.sandbox.allowed_read, vec!["/usr/lib"]);
    assert!(config.sandbox.network);
    assert_eq!(config.poll_interval_ms, 5);
}

#[test]
fn unknown_backend_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("env.json");
    fs::write(&path, r#"{"backend": "docker"}"#).unwrap();

    let err = load_env_config_file(&path).unwrap_err();

    assert_eq!(err.code(), ErrorCode::Protocol);
}
