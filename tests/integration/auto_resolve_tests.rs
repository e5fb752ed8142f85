//! Integration tests for the debounced auto-resolve task.

use std::time::Duration;

use build_session::orchestrator::auto_resolve::{AutoResolveDebouncer, AutoResolveHandle};
use build_session::orchestrator::session::SessionState;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{wait_for_state, Harness, WAIT};

fn debouncer(h: &Harness, delay: Duration) -> AutoResolveHandle {
    AutoResolveDebouncer::new(
        std::sync::Arc::clone(&h.orchestrator),
        delay,
        CancellationToken::new(),
    )
    .spawn()
}

async fn wait_for_count(handle: &AutoResolveHandle, count: u64) {
    tokio::time::timeout(WAIT, async {
        while handle.resolve_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("resolve count reached before timeout");
}

#[tokio::test]
async fn burst_of_triggers_resolves_once() {
    let mut h = Harness::new();
    let mut tool = h.started().await;
    let handle = debouncer(&h, Duration::from_millis(50));

    for _ in 0..5 {
        handle.trigger();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tool.expect_request("resolve-project").await;
    tool.done("project-resolved");
    wait_for_count(&handle, 1).await;

    tool.expect_silence(Duration::from_millis(200)).await;
    assert_eq!(handle.resolve_count(), 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn trigger_while_stopped_waits_for_start() {
    let mut h = Harness::new();
    let handle = debouncer(&h, Duration::from_millis(20));

    handle.trigger();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.resolve_count(), 0);

    let mut tool = h.started().await;
    tool.expect_request("resolve-project").await;
    tool.done("project-resolved");
    wait_for_count(&handle, 1).await;
    handle.shutdown().await;
}

#[tokio::test]
async fn stop_discards_parked_resolve() {
    let mut h = Harness::new();
    let handle = debouncer(&h, Duration::from_millis(20));

    handle.trigger();
    tokio::time::sleep(Duration::from_millis(100)).await;

    h.session.start().expect("start");
    let mut tool = h.next_tool().await;
    assert!(h.session.stop());
    tool.hello();
    wait_for_state(&h.session, SessionState::Stopped).await;

    tool.expect_silence(Duration::from_millis(100)).await;
    assert_eq!(handle.resolve_count(), 0);
    handle.shutdown().await;
}

#[tokio::test]
async fn cancelled_debouncer_ignores_triggers() {
    let mut h = Harness::new();
    let mut tool = h.started().await;
    let cancel = CancellationToken::new();
    let handle = AutoResolveDebouncer::new(
        std::sync::Arc::clone(&h.orchestrator),
        Duration::from_millis(20),
        cancel.clone(),
    )
    .spawn();

    cancel.cancel();
    handle.trigger();
    tool.expect_silence(Duration::from_millis(100)).await;
    assert_eq!(handle.resolve_count(), 0);
}

#[tokio::test]
async fn start_during_debounce_resolves_once() {
    let mut h = Harness::new();
    let handle = debouncer(&h, Duration::from_millis(200));

    // Park a resolve, then restart the delay before the session comes up.
    handle.trigger();
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.trigger();
    let mut tool = h.started().await;

    tool.expect_request("resolve-project").await;
    tool.done("project-resolved");
    wait_for_count(&handle, 1).await;

    tool.expect_silence(Duration::from_millis(400)).await;
    assert_eq!(handle.resolve_count(), 1);
    handle.shutdown().await;
}
