//! Unit tests for the message fan-out registry.

use build_session::models::response::{LogData, ResponseEvent, TaskProgress};
use build_session::orchestrator::event_bus::EventBus;

fn log(message: &str) -> ResponseEvent {
    ResponseEvent::LogData(LogData {
        message: message.into(),
    })
}

#[test]
fn dispatch_reaches_matching_subscribers_only() {
    let bus = EventBus::new();
    let mut logs = bus.subscribe(|e| matches!(e, ResponseEvent::LogData(_)));
    let mut progress = bus.subscribe(ResponseEvent::is_progress);

    assert_eq!(bus.dispatch(&log("one")), 1);
    assert_eq!(
        bus.dispatch(&ResponseEvent::TaskProgress(TaskProgress { progress: 3 })),
        1
    );

    assert_eq!(logs.try_recv(), Some(log("one")));
    assert_eq!(logs.try_recv(), None);
    assert!(matches!(
        progress.try_recv(),
        Some(ResponseEvent::TaskProgress(TaskProgress { progress: 3 }))
    ));
}

#[test]
fn dropping_subscription_unregisters_it() {
    let bus = EventBus::new();
    let first = bus.subscribe(|_| true);
    let _second = bus.subscribe(|_| true);
    assert_eq!(bus.subscriber_count(), 2);

    drop(first);
    assert_eq!(bus.subscriber_count(), 1);
    assert_eq!(bus.dispatch(&log("after drop")), 1);
}

#[test]
fn dispatch_without_subscribers_is_harmless() {
    let bus = EventBus::new();
    assert_eq!(bus.dispatch(&log("nobody")), 0);
}

#[test]
fn subscription_outliving_bus_is_safe() {
    let bus = EventBus::new();
    let mut sub = bus.subscribe(|_| true);
    bus.dispatch(&log("last"));
    drop(bus);
    assert_eq!(sub.try_recv(), Some(log("last")));
    drop(sub);
}

#[tokio::test]
async fn subscriptions_can_be_dropped_from_other_tasks_during_fan_out() {
    let bus = EventBus::new();
    let mut keeper = bus.subscribe(|_| true);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let sub = bus.subscribe(|_| true);
        handles.push(tokio::spawn(async move {
            tokio::task::yield_now().await;
            drop(sub);
        }));
    }
    for i in 0..64 {
        bus.dispatch(&log(&i.to_string()));
    }
    for handle in handles {
        handle.await.expect("join");
    }

    assert_eq!(bus.subscriber_count(), 1);
    for i in 0..64 {
        assert_eq!(keeper.recv().await, Some(log(&i.to_string())));
    }
}
