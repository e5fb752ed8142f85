//! Integration tests for launching a real process in session mode.
//!
//! The "tool" is a shell script that checks its `session` argument, greets
//! with one `hello` packet, and then sleeps until terminated.

use std::sync::Arc;
use std::time::Duration;

use build_session::channel::spawner::ProcessLauncher;
use build_session::channel::Launcher;
use build_session::orchestrator::session::{Session, SessionState};
use build_session::sink::TracingSink;
use build_session::AppError;
use serial_test::serial;

use super::test_helpers::wait_for_state;

#[test]
fn empty_executable_is_not_configured() {
    assert!(!ProcessLauncher::new("", None).is_configured());
    assert!(ProcessLauncher::new("qbs", None).is_configured());
}

#[tokio::test]
async fn start_without_executable_is_a_noop() {
    let session = Arc::new(Session::new(
        Arc::new(ProcessLauncher::new("", None)),
        Arc::new(TracingSink),
    ));
    assert!(!session.start().expect("no-op start"));
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn missing_executable_is_a_spawn_error() {
    let launcher = ProcessLauncher::new("/nonexistent/build-tool", None);
    let err = launcher.launch().expect_err("spawn must fail");
    assert!(matches!(err, AppError::Spawn(ref m) if m.contains("/nonexistent/build-tool")));

    let session = Arc::new(Session::new(Arc::new(launcher), Arc::new(TracingSink)));
    assert!(matches!(session.start(), Err(AppError::Spawn(_))));
    assert_eq!(session.state(), SessionState::Stopped);
}

#[cfg(unix)]
fn write_fake_tool(dir: &std::path::Path) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-tool.sh");
    let script = "#!/bin/sh\n\
        [ \"$1\" = \"session\" ] || exit 3\n\
        printf 'qbsmsg:68\\neyJ0eXBlIjoiaGVsbG8iLCJhcGktbGV2ZWwiOjUsImFwaS1jb21wYXQtbGV2ZWwiOjJ9'\n\
        exec sleep 30\n";
    std::fs::write(&path, script).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod");
    path
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn real_process_starts_greets_and_stops_on_sigterm() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tool = write_fake_tool(dir.path());

    let session = Arc::new(Session::new(
        Arc::new(ProcessLauncher::new(tool, Some(dir.path().to_path_buf()))),
        Arc::new(TracingSink),
    ));
    assert!(session.start().expect("start"));
    assert!(session.pid().is_some());

    wait_for_state(&session, SessionState::Started).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.hello().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("hello before timeout");
    assert_eq!(session.hello().map(|h| h.api_level), Some(5));

    assert!(session.stop());
    wait_for_state(&session, SessionState::Stopped).await;
    assert!(session.pid().is_none());
}
