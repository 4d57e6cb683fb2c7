use std::{
    fs,
    net::TcpListener,
    path::{Path, PathBuf},
    process::{Command, Output},
};

fn write_config(dir: &Path, file_name: &str, content: &str) -> PathBuf {
    let config_path = dir.join(file_name);
    fs::write(&config_path, content).expect("write config");
    config_path
}

fn write_valid_config(dir: &Path, file_name: &str) -> PathBuf {
    write_config(
        dir,
        file_name,
        r#"
name = "janus-room-cli-test"
env = "dev"

[gateway]
url = "ws://127.0.0.1:8188"
plugin = "videoroom"
room = 1234
display = "cli"

[observability]
filter_level = "info"

[observability.log]
output = "console"
"#,
    )
}

fn run_janus_room(args: &[&str], current_dir: Option<&Path>) -> Output {
    let mut cmd = Command::new(PathBuf::from(env!("CARGO_BIN_EXE_janus-room")));
    cmd.args(args);
    cmd.env_remove("RUST_LOG");
    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }
    cmd.output().expect("run janus-room command")
}

#[test]
fn test_command_accepts_explicit_valid_config() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_valid_config(temp.path(), "valid.toml");
    let output = run_janus_room(&["test", config_path.to_str().expect("utf8 path")], None);

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("配置验证通过"), "unexpected stdout: {stdout}");
}

#[test]
fn test_command_finds_default_config_in_current_directory() {
    let temp = tempfile::tempdir().expect("temp dir");
    write_valid_config(temp.path(), "config.toml");
    let output = run_janus_room(&["test"], Some(temp.path()));

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_command_accepts_warning_only_config() {
    let temp = tempfile::tempdir().expect("temp dir");
    // prod over plain ws:// with console logging only produces warnings
    let config_path = write_config(
        temp.path(),
        "prod.toml",
        r#"
name = "janus-room-prod"
env = "prod"

[gateway]
url = "ws://janus.internal:8188"
room = 1
"#,
    );
    let output = run_janus_room(&["test", config_path.to_str().expect("utf8 path")], None);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("Warning:"), "unexpected stdout: {stdout}");
}

#[test]
fn test_command_fails_for_validation_errors() {
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_config(
        temp.path(),
        "invalid.toml",
        r#"
name = "janus-room-invalid"
env = "staging"

[gateway]
url = "http://127.0.0.1:8188"
room = 1234
keepalive_interval_secs = 0
"#,
    );
    let output = run_janus_room(&["test", config_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(stderr.contains("Validation"), "unexpected stderr: {stderr}");
}

#[test]
fn test_command_fails_for_missing_custom_config_path() {
    let temp = tempfile::tempdir().expect("temp dir");
    let missing_path = temp.path().join("missing.toml");
    let output = run_janus_room(&["test", missing_path.to_str().expect("utf8 path")], None);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(
        stderr.contains("Config file not found"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn test_command_fails_when_no_default_config_exists() {
    let temp = tempfile::tempdir().expect("temp dir");
    let output = run_janus_room(&["test"], Some(temp.path()));
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(
        stderr.contains("No configuration file found"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn test_command_fails_for_invalid_config_content() {
    let temp = tempfile::tempdir().expect("temp dir");
    let bad_path = write_config(temp.path(), "bad.toml", "name = \"broken\"\n[gateway\n");

    let output = run_janus_room(&["test", bad_path.to_str().expect("utf8 path")], None);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(!output.status.success(), "command should fail");
    assert!(stdout.contains("配置文件解析失败"), "unexpected stdout: {stdout}");
}

#[test]
fn monitor_exits_non_zero_when_gateway_is_unreachable() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let temp = tempfile::tempdir().expect("temp dir");
    let config_path = write_config(
        temp.path(),
        "config.toml",
        &format!(
            r#"
[gateway]
url = "ws://127.0.0.1:{port}"
room = 1234
close_timeout_ms = 200
"#
        ),
    );

    let output = run_janus_room(
        &[
            "--config",
            config_path.to_str().expect("utf8 path"),
            "--duration",
            "10",
        ],
        None,
    );
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "command should fail");
    assert!(stderr.contains("Channel"), "unexpected stderr: {stderr}");
}
