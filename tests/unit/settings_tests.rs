//! Unit tests for settings snapshots and request construction.

use std::path::{Path, PathBuf};

use build_session::models::request::{CommandEchoMode, LogLevel};
use build_session::models::settings::{SettingsSnapshot, COMPILE_ONLY_FILE_TAGS};
use build_session::AppError;

fn snapshot(build_directory: &str) -> SettingsSnapshot {
    SettingsSnapshot {
        project_file: Some(PathBuf::from("/work/app/app.qbs")),
        build_directory: build_directory.into(),
        profile: Some("clang".into()),
        configuration: "release".into(),
        ..SettingsSnapshot::default()
    }
}

#[test]
fn build_root_expands_placeholders() {
    let root = snapshot("{project_dir}/build/{profile}-{configuration}")
        .build_root()
        .expect("build root");
    assert_eq!(root, PathBuf::from("/work/app/build/clang-release"));
}

#[test]
fn relative_build_root_is_anchored_at_project_dir() {
    let root = snapshot("out/{configuration}").build_root().expect("build root");
    assert_eq!(root, Path::new("/work/app/out/release"));
}

#[test]
fn missing_profile_expands_to_default() {
    let mut settings = snapshot("/tmp/{profile}");
    settings.profile = None;
    assert_eq!(settings.build_root().expect("root"), Path::new("/tmp/default"));
}

#[test]
fn unknown_placeholder_is_rejected() {
    let err = snapshot("{home}/build").build_root().expect_err("unknown");
    assert!(matches!(err, AppError::Precondition(ref m) if m.contains("home")));
}

#[test]
fn unterminated_placeholder_is_rejected() {
    assert!(matches!(
        snapshot("{project_dir/build").build_root(),
        Err(AppError::Precondition(_))
    ));
}

#[test]
fn empty_build_directory_is_rejected() {
    assert!(matches!(
        snapshot("  ").build_root(),
        Err(AppError::Precondition(_))
    ));
}

#[test]
fn missing_project_is_a_precondition_error() {
    let settings = SettingsSnapshot {
        build_directory: "build".into(),
        ..SettingsSnapshot::default()
    };
    assert!(matches!(settings.project_file(), Err(AppError::Precondition(_))));
    assert!(settings.resolve_request().is_err());
}

#[test]
fn resolve_request_is_built_from_snapshot() {
    let mut settings = snapshot("{project_dir}/build");
    settings.settings_directory = Some(PathBuf::from("/home/dev/.config/qbs"));
    settings.force_probe_execution = true;
    settings.log_level = LogLevel::Debug;

    let request = settings.resolve_request().expect("request");
    assert_eq!(request.project_file_path, Path::new("/work/app/app.qbs"));
    assert_eq!(request.build_root, Path::new("/work/app/build"));
    assert_eq!(request.configuration_name, "release");
    assert_eq!(request.top_level_profile.as_deref(), Some("clang"));
    assert!(request.force_probe_execution);
    assert_eq!(request.log_level, LogLevel::Debug);
}

#[test]
fn build_request_uses_configured_products_unless_overridden() {
    let mut settings = snapshot("build");
    settings.products = vec!["app".into(), "tests".into()];
    settings.max_job_count = 0;
    settings.command_echo_mode = CommandEchoMode::Silent;

    let configured = settings.build_request(None);
    assert_eq!(configured.products, Some(vec!["app".into(), "tests".into()]));
    assert_eq!(configured.max_job_count, None);
    assert_eq!(configured.command_echo_mode, CommandEchoMode::Silent);

    let explicit = settings.build_request(Some(vec!["lib".into()]));
    assert_eq!(explicit.products, Some(vec!["lib".into()]));
}

#[test]
fn empty_product_list_builds_everything() {
    let settings = snapshot("build");
    assert_eq!(settings.build_request(None).products, None);
    assert_eq!(settings.clean_request().products, None);
    assert_eq!(settings.install_request().products, None);
}

#[test]
fn compile_request_sets_changed_files_and_tags() {
    let mut settings = snapshot("build");
    settings.max_job_count = 8;
    let request = settings.compile_request(vec![PathBuf::from("/work/app/main.cpp")]);
    assert_eq!(request.changed_files, vec![PathBuf::from("/work/app/main.cpp")]);
    assert_eq!(request.active_file_tags, COMPILE_ONLY_FILE_TAGS.map(str::to_owned).to_vec());
    assert_eq!(request.max_job_count, Some(8));
    assert!(!request.install);
}

#[test]
fn install_and_clean_requests_follow_settings() {
    let mut settings = snapshot("build");
    settings.keep_going = true;
    settings.dry_run = true;
    settings.clean_install_root = true;

    let clean = settings.clean_request();
    assert!(clean.keep_going && clean.dry_run);

    let install = settings.install_request();
    assert!(install.clean_install_root && install.dry_run);
    assert_eq!(install.install_root, None);

    assert_eq!(settings.run_environment_request("app").product, "app");
}
