//! Integration tests for build operations against a scripted tool.
//!
//! Validates request construction, terminal-message matching, progress
//! notices, preconditions, single-flight ordering, cancellation, rebuild
//! sequencing, and failure when the session ends mid-operation.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use build_session::models::operation::{OperationKind, OperationNotice, OperationOutcome};
use build_session::models::response::ResponseEvent;
use build_session::models::settings::SettingsSnapshot;
use build_session::orchestrator::operations::{LingerDelays, Orchestrator};
use build_session::AppError;
use tokio::task::JoinHandle;

use super::test_helpers::{test_settings, Harness, WAIT};

/// Run `op` against the harness orchestrator in the background.
fn spawn_op<F, Fut>(h: &Harness, op: F) -> JoinHandle<OperationOutcome>
where
    F: FnOnce(Arc<Orchestrator>) -> Fut,
    Fut: Future<Output = OperationOutcome> + Send + 'static,
{
    tokio::spawn(op(Arc::clone(&h.orchestrator)))
}

async fn finish(handle: JoinHandle<OperationOutcome>) -> OperationOutcome {
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("operation should finish before timeout")
        .expect("operation task panicked")
}

#[tokio::test]
async fn resolve_sends_project_settings_and_succeeds() {
    let mut h = Harness::new();
    let mut tool = h.started().await;

    let op = spawn_op(&h, |o| async move { o.resolve().await });
    let request = tool.expect_request("resolve-project").await;
    assert_eq!(request["project-file-path"], "/work/app/app.qbs");
    assert_eq!(request["build-root"], "/work/app/build/debug");
    assert_eq!(request["configuration-name"], "debug");

    tool.done("project-resolved");
    let outcome = finish(op).await;
    assert!(outcome.success, "{}", outcome.message);

    let finished = h.sink.finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].0, OperationKind::Resolve);
    assert!(finished[0].1.success);
    assert!(!h.orchestrator.is_busy());
}

#[tokio::test]
async fn build_failure_carries_tool_messages() {
    let mut h = Harness::new();
    let mut tool = h.started().await;

    let op = spawn_op(&h, |o| async move { o.build(None).await });
    tool.expect_request("build-project").await;
    tool.failed("project-built", "undefined reference to main");

    let outcome = finish(op).await;
    assert!(!outcome.success);
    assert_eq!(outcome.message, "undefined reference to main");

    let finished = h.sink.finished();
    assert_eq!(finished[0].2.items.len(), 1);
}

#[tokio::test]
async fn build_done_alias_completes_build() {
    let mut h = Harness::new();
    let mut tool = h.started().await;

    let op = spawn_op(&h, |o| async move { o.build(Some(vec!["app".into()])).await });
    let request = tool.expect_request("build-project").await;
    assert_eq!(request["products"], serde_json::json!(["app"]));
    tool.done("build-done");
    assert!(finish(op).await.success);
}

#[tokio::test]
async fn progress_notices_follow_the_ratchet() {
    let mut h = Harness::new();
    let mut tool = h.started().await;
    let mut notices = h.orchestrator.subscribe_notices();

    let op = spawn_op(&h, |o| async move { o.build(None).await });
    tool.expect_request("build-project").await;
    tool.send_json(r#"{"type":"task-started","description":"Building","max-progress":10}"#);
    for progress in [2, 2, 5, 10] {
        tool.send_json(&format!(r#"{{"type":"task-progress","progress":{progress}}}"#));
    }
    tool.done("project-built");
    assert!(finish(op).await.success);

    let mut received = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        received.push(notice);
    }
    assert!(matches!(
        received.first(),
        Some(OperationNotice::Started { kind: OperationKind::Build })
    ));
    let percentages: Vec<u8> = received
        .iter()
        .filter_map(|n| match n {
            OperationNotice::Progress { percentage, .. } => Some(*percentage),
            _ => None,
        })
        .collect();
    assert_eq!(percentages, vec![20, 50, 100]);
    assert!(matches!(
        received.last(),
        Some(OperationNotice::Completed { kind: OperationKind::Build, success: true, .. })
    ));
}

#[tokio::test]
async fn missing_project_fails_without_sending() {
    let mut h = Harness::with_settings(SettingsSnapshot {
        project_file: None,
        ..test_settings()
    });
    let mut tool = h.started().await;

    let outcome = h.orchestrator.resolve().await;
    assert!(!outcome.success);
    assert!(outcome.message.starts_with("precondition"));
    tool.expect_silence(Duration::from_millis(100)).await;
    assert_eq!(h.sink.finished().len(), 1);
}

#[tokio::test]
async fn stopped_session_fails_operations() {
    let h = Harness::new();
    let outcome = h.orchestrator.build(None).await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("stopped"), "{}", outcome.message);
    assert_eq!(h.launcher.launches(), 0);
}

#[tokio::test]
async fn cancel_resolves_operation_and_ignores_late_reply() {
    let mut h = Harness::new();
    let mut tool = h.started().await;

    let op = spawn_op(&h, |o| async move { o.build(None).await });
    tool.expect_request("build-project").await;

    let cancel = h.orchestrator.cancel();
    assert!(cancel.success);
    assert_eq!(cancel.message, "cancel requested");
    let outcome = finish(op).await;
    assert!(!outcome.success);
    assert_eq!(outcome.message, "build cancelled");
    assert_eq!(h.session.bus().subscriber_count(), 0);
    assert!(!h.orchestrator.is_busy());
    tool.expect_request("cancel-job").await;

    // The tool finishes the abandoned job anyway; nobody is waiting for it.
    let mut notices = h.orchestrator.subscribe_notices();
    let mut late = h
        .session
        .subscribe(|e| matches!(e, ResponseEvent::ProjectBuilt(_)));
    tool.send_json(r#"{"type":"task-progress","progress":5}"#);
    tool.done("project-built");
    tokio::time::timeout(WAIT, late.recv())
        .await
        .expect("late reply dispatched")
        .expect("bus open");
    drop(late);
    assert!(notices.try_recv().is_err(), "late reply must not produce notices");
    assert_eq!(h.sink.finished().len(), 1);

    // The next build is decided by its own reply.
    let op = spawn_op(&h, |o| async move { o.build(None).await });
    tool.expect_request("build-project").await;
    tool.failed("project-built", "link failed");
    let outcome = finish(op).await;
    assert_eq!(outcome.message, "link failed");
}

#[tokio::test]
async fn cancel_without_operation_is_harmless() {
    let h = Harness::new();
    let outcome = h.orchestrator.cancel();
    assert!(outcome.success);
    assert_eq!(outcome.message, "nothing to cancel");
}

#[tokio::test]
async fn rebuild_stops_after_failed_clean() {
    let mut h = Harness::new();
    let mut tool = h.started().await;

    let op = spawn_op(&h, |o| async move { o.rebuild().await });
    tool.expect_request("clean-project").await;
    tool.failed("project-cleaned", "cannot remove build root");

    let outcome = finish(op).await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("cannot remove build root"));
    tool.expect_silence(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn rebuild_builds_after_successful_clean() {
    let mut h = Harness::new();
    let mut tool = h.started().await;

    let op = spawn_op(&h, |o| async move { o.rebuild().await });
    tool.expect_request("clean-project").await;
    tool.done("project-cleaned");
    tool.expect_request("build-project").await;
    tool.done("project-built");

    assert!(finish(op).await.success);
    let kinds: Vec<_> = h.sink.finished().into_iter().map(|f| f.0).collect();
    assert_eq!(kinds, vec![OperationKind::Clean, OperationKind::Build]);
}

#[tokio::test]
async fn compile_only_sends_changed_files_and_tags() {
    let mut h = Harness::new();
    let mut tool = h.started().await;

    let op = spawn_op(&h, |o| async move {
        o.compile_only(vec![PathBuf::from("/work/app/main.cpp")]).await
    });
    let request = tool.expect_request("build-project").await;
    assert_eq!(request["changed-files"], serde_json::json!(["/work/app/main.cpp"]));
    assert_eq!(request["active-file-tags"], serde_json::json!(["obj", "hpp"]));
    tool.done("project-built");
    assert!(finish(op).await.success);
}

#[tokio::test]
async fn compile_only_without_files_is_rejected() {
    let mut h = Harness::new();
    let mut tool = h.started().await;
    let outcome = h.orchestrator.compile_only(Vec::new()).await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("no files to compile"));
    tool.expect_silence(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn operations_run_one_at_a_time() {
    let mut h = Harness::new();
    let mut tool = h.started().await;

    let resolve = spawn_op(&h, |o| async move { o.resolve().await });
    tool.expect_request("resolve-project").await;
    let build = spawn_op(&h, |o| async move { o.build(None).await });

    // The build waits for the slot.
    tool.expect_silence(Duration::from_millis(100)).await;
    tool.done("project-resolved");
    assert!(finish(resolve).await.success);

    tool.expect_request("build-project").await;
    tool.done("project-built");
    assert!(finish(build).await.success);
}

#[tokio::test]
async fn unrelated_terminal_does_not_end_operation() {
    let mut h = Harness::new();
    let mut tool = h.started().await;

    let mut op = spawn_op(&h, |o| async move { o.install().await });
    tool.expect_request("install-project").await;
    tool.done("project-resolved");
    assert!(
        tokio::time::timeout(Duration::from_millis(100), &mut op)
            .await
            .is_err(),
        "install must keep waiting"
    );

    tool.done("install-done");
    assert!(finish(op).await.success);
}

#[tokio::test]
async fn clean_sends_clean_request() {
    let mut h = Harness::new();
    let mut tool = h.started().await;

    let op = spawn_op(&h, |o| async move { o.clean().await });
    tool.expect_request("clean-project").await;
    tool.done("project-cleaned");
    assert!(finish(op).await.success);
}

#[tokio::test]
async fn session_exit_fails_pending_operation() {
    let mut h = Harness::new();
    let mut tool = h.started().await;

    let op = spawn_op(&h, |o| async move { o.build(None).await });
    tool.expect_request("build-project").await;
    tool.exit(1);

    let outcome = finish(op).await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("session ended"), "{}", outcome.message);
}

#[tokio::test]
async fn run_environment_returns_tool_environment() {
    let mut h = Harness::new();
    let mut tool = h.started().await;

    let orchestrator = Arc::clone(&h.orchestrator);
    let query = tokio::spawn(async move { orchestrator.run_environment("app").await });
    let request = tool.expect_request("get-run-environment").await;
    assert_eq!(request["product"], "app");
    tool.send_json(
        r#"{"type":"run-environment","full-environment":{"PATH":"/usr/bin","LD_LIBRARY_PATH":"/work/app/lib"}}"#,
    );

    let env = tokio::time::timeout(WAIT, query)
        .await
        .expect("finished")
        .expect("joined")
        .expect("environment");
    assert_eq!(env.full_environment["PATH"], "/usr/bin");
    assert_eq!(env.full_environment.len(), 2);
}

#[tokio::test]
async fn run_environment_errors_are_reported() {
    let mut h = Harness::new();
    let mut tool = h.started().await;

    assert!(matches!(
        h.orchestrator.run_environment(" ").await,
        Err(AppError::Precondition(_))
    ));

    let orchestrator = Arc::clone(&h.orchestrator);
    let query = tokio::spawn(async move { orchestrator.run_environment("ghost").await });
    tool.expect_request("get-run-environment").await;
    tool.failed("run-environment", "no such product");

    let err = tokio::time::timeout(WAIT, query)
        .await
        .expect("finished")
        .expect("joined")
        .expect_err("tool reported errors");
    assert!(matches!(err, AppError::Operation(ref m) if m == "no such product"));
}

#[tokio::test]
async fn cancel_between_clean_and_build_stops_rebuild() {
    let linger = LingerDelays {
        clean: Duration::from_millis(300),
        ..LingerDelays::none()
    };
    let mut h = Harness::with_linger(test_settings(), linger);
    let mut tool = h.started().await;

    let op = spawn_op(&h, |o| async move { o.rebuild().await });
    tool.expect_request("clean-project").await;
    tool.done("project-cleaned");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(h.orchestrator.is_busy(), "rebuild stays cancellable while pausing");
    let cancel = h.orchestrator.cancel();
    assert_eq!(cancel.message, "cancel requested");

    let outcome = finish(op).await;
    assert!(!outcome.success);
    assert_eq!(outcome.message, "rebuild cancelled");
    tool.expect_request("cancel-job").await;
    tool.expect_silence(Duration::from_millis(400)).await;

    let kinds: Vec<_> = h.sink.finished().into_iter().map(|f| (f.0, f.1.success)).collect();
    assert_eq!(
        kinds,
        vec![(OperationKind::Clean, true), (OperationKind::Rebuild, false)]
    );
}

#[tokio::test]
async fn cancel_during_rebuild_clean_skips_build() {
    let mut h = Harness::new();
    let mut tool = h.started().await;

    let op = spawn_op(&h, |o| async move { o.rebuild().await });
    tool.expect_request("clean-project").await;
    h.orchestrator.cancel();

    let outcome = finish(op).await;
    assert_eq!(outcome.message, "clean cancelled");
    tool.expect_request("cancel-job").await;
    tool.done("project-cleaned");
    tool.expect_silence(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn reply_just_before_exit_still_counts() {
    let mut h = Harness::new();
    let mut tool = h.started().await;

    let op = spawn_op(&h, |o| async move { o.build(None).await });
    tool.expect_request("build-project").await;
    tool.done("project-built");
    tool.exit(0);

    let outcome = finish(op).await;
    assert!(outcome.success, "{}", outcome.message);
    let finished = h.sink.finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].0, OperationKind::Build);
    assert!(finished[0].1.success);
}
