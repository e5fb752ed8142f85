//! Debounced automatic resolve.
//!
//! Settings and project-file changes call [`AutoResolveHandle::trigger`].
//! Triggers arriving within the delay restart it, so a burst of changes
//! produces one resolve. If the session is not started when the delay
//! expires, the resolve is parked on the session and runs when the session
//! next reaches `Started` (unless a stop was requested in between). A release
//! is claimed at most once, so a wakeup left over from a resolve that already
//! ran is ignored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, Instrument};

use crate::orchestrator::operations::Orchestrator;

/// Builder for the auto-resolve task.
///
/// Call [`spawn`](Self::spawn) to start the background task.
pub struct AutoResolveDebouncer {
    orchestrator: Arc<Orchestrator>,
    delay: Duration,
    cancel: CancellationToken,
}

impl AutoResolveDebouncer {
    /// Construct a debouncer (does not start it yet).
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, delay: Duration, cancel: CancellationToken) -> Self {
        Self {
            orchestrator,
            delay,
            cancel,
        }
    }

    /// Spawn the background task and return a handle for triggering it.
    #[must_use]
    pub fn spawn(self) -> AutoResolveHandle {
        let trigger = Arc::new(Notify::new());
        let resolves = Arc::new(AtomicU64::new(0));
        let cancel = self.cancel.clone();

        let join_handle = tokio::spawn(
            Self::run(
                self.orchestrator,
                self.delay,
                self.cancel,
                Arc::clone(&trigger),
                Arc::clone(&resolves),
            )
            .instrument(info_span!("auto_resolve")),
        );

        AutoResolveHandle {
            trigger,
            resolves,
            join_handle: Some(join_handle),
            cancel,
        }
    }

    async fn run(
        orchestrator: Arc<Orchestrator>,
        delay: Duration,
        cancel: CancellationToken,
        trigger: Arc<Notify>,
        resolves: Arc<AtomicU64>,
    ) {
        let session = Arc::clone(orchestrator.session());

        loop {
            // ── Idle: wait for a trigger or a released parked request ──
            let released = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("auto-resolve cancelled");
                    return;
                }
                () = session.auto_resolve_released() => true,
                () = trigger.notified() => false,
            };

            if released && !session.claim_released_auto_resolve() {
                trace!("stale auto-resolve release ignored");
                continue;
            }
            if !released {
                // ── Debounce: every trigger restarts the delay ──
                loop {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return,
                        () = trigger.notified() => trace!("auto-resolve delay restarted"),
                        () = tokio::time::sleep(delay) => break,
                    }
                }
                if !session.request_auto_resolve() {
                    continue;
                }
            }

            info!(released, "auto-resolving project");
            let outcome = orchestrator.resolve().await;
            resolves.fetch_add(1, Ordering::SeqCst);
            debug!(success = outcome.success, "auto-resolve finished");
        }
    }
}

/// Handle for controlling a running auto-resolve task.
///
/// Dropping the handle cancels the task.
pub struct AutoResolveHandle {
    trigger: Arc<Notify>,
    resolves: Arc<AtomicU64>,
    join_handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl AutoResolveHandle {
    /// Record a settings or project change.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Number of resolves started by this task.
    #[must_use]
    pub fn resolve_count(&self) -> u64 {
        self.resolves.load(Ordering::SeqCst)
    }

    /// Cancel the task and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            if let Err(err) = handle.await {
                debug!(%err, "auto-resolve task ended abnormally");
            }
        }
    }
}

impl Drop for AutoResolveHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
