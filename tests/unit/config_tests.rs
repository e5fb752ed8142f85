//! Unit tests for configuration parsing and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use build_session::config::{GlobalConfig, SharedConfig};
use build_session::models::request::{CommandEchoMode, ErrorHandlingMode, LogLevel};
use build_session::models::settings::SettingsProvider;
use build_session::AppError;

const FULL: &str = r#"
executable = "/usr/bin/qbs"
project_file = "/work/app/app.qbs"
build_directory = "{project_dir}/out/{configuration}"
settings_directory = "/home/dev/.config/qbs"
profile = "gcc"
configuration = "debug"
products = ["app"]
log_dir = "/var/log/build-session"

[build]
log_level = "debug"
max_job_count = 6
keep_going = true
command_echo_mode = "command-line"
clean_install_root = true
force_probe_execution = true
error_handling_mode = "relaxed"
dry_run = false

[auto_resolve]
enabled = true
delay_ms = 250

[timing]
startup_timeout_seconds = 10
resolve_linger_ms = 0
build_linger_ms = 500
clean_linger_ms = 0
install_linger_ms = 0
"#;

#[test]
fn full_config_parses() {
    let config = GlobalConfig::from_toml_str(FULL).expect("valid config");
    assert_eq!(config.executable, Path::new("/usr/bin/qbs"));
    assert_eq!(config.products, vec!["app".to_owned()]);
    assert_eq!(config.build.log_level, LogLevel::Debug);
    assert_eq!(config.build.command_echo_mode, CommandEchoMode::CommandLine);
    assert_eq!(config.build.error_handling_mode, ErrorHandlingMode::Relaxed);
    assert_eq!(config.auto_resolve_delay(), Duration::from_millis(250));
    assert_eq!(config.startup_timeout(), Some(Duration::from_secs(10)));

    let linger = config.linger_delays();
    assert_eq!(linger.build, Duration::from_millis(500));
    assert_eq!(linger.resolve, Duration::ZERO);
}

#[test]
fn empty_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("defaults");
    assert!(config.executable.as_os_str().is_empty());
    assert_eq!(config.configuration, "default");
    assert!(config.build_directory.contains("{project_dir}"));
    assert!(config.auto_resolve.enabled);
    assert_eq!(config.auto_resolve.delay_ms, 1000);
    assert_eq!(config.startup_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(config.linger_delays().build, Duration::from_millis(2000));
    assert_eq!(config.build.log_level, LogLevel::Info);
}

#[test]
fn zero_startup_timeout_disables_it() {
    let config =
        GlobalConfig::from_toml_str("[timing]\nstartup_timeout_seconds = 0\n").expect("config");
    assert_eq!(config.startup_timeout(), None);
}

#[test]
fn empty_configuration_is_rejected() {
    let err = GlobalConfig::from_toml_str("configuration = \"\"").expect_err("invalid");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn zero_auto_resolve_delay_is_rejected_when_enabled() {
    assert!(GlobalConfig::from_toml_str("[auto_resolve]\ndelay_ms = 0\n").is_err());
    assert!(GlobalConfig::from_toml_str("[auto_resolve]\nenabled = false\ndelay_ms = 0\n").is_ok());
}

#[test]
fn empty_product_name_is_rejected() {
    assert!(GlobalConfig::from_toml_str("products = [\"app\", \" \"]").is_err());
}

#[test]
fn unknown_enum_value_is_a_config_error() {
    let err = GlobalConfig::from_toml_str("[build]\nlog_level = \"chatty\"\n").expect_err("invalid");
    assert!(matches!(err, AppError::Config(ref m) if m.starts_with("invalid config")));
}

#[test]
fn relative_paths_are_anchored_at_config_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("build-session.toml");
    std::fs::write(
        &path,
        "executable = \"tools/qbs\"\nproject_file = \"app/app.qbs\"\nlog_dir = \"logs\"\n",
    )
    .expect("write");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.project_file, Some(dir.path().join("app/app.qbs")));
    assert_eq!(config.log_dir, Some(dir.path().join("logs")));
    assert_eq!(config.executable, dir.path().join("tools/qbs"));
}

#[test]
fn bare_executable_name_is_left_for_path_lookup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("build-session.toml");
    std::fs::write(&path, "executable = \"qbs\"\n").expect("write");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.executable, PathBuf::from("qbs"));
}

#[test]
fn missing_file_is_a_config_error() {
    let err = GlobalConfig::load_from_path("/definitely/not/here.toml").expect_err("missing");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn snapshot_reflects_config() {
    let config = GlobalConfig::from_toml_str(FULL).expect("config");
    let snapshot = config.snapshot().expect("snapshot");
    assert_eq!(snapshot.project_file, Some(PathBuf::from("/work/app/app.qbs")));
    assert_eq!(snapshot.max_job_count, 6);
    assert!(snapshot.keep_going);
    assert_eq!(
        snapshot.build_root().expect("root"),
        Path::new("/work/app/out/debug")
    );
}

#[test]
fn shared_config_snapshots_follow_replacement() {
    let shared = SharedConfig::new(GlobalConfig::from_toml_str(FULL).expect("config"));
    assert_eq!(shared.snapshot().expect("snapshot").configuration, "debug");

    let mut next = shared.current();
    next.configuration = "release".into();
    shared.replace(next);
    assert_eq!(shared.snapshot().expect("snapshot").configuration, "release");
}
