//! High-level build operations on top of a [`Session`].
//!
//! Every operation follows the same flow:
//!
//! 1. Check preconditions (settings, project file, build root, session started).
//! 2. Take the single-flight slot; concurrent callers queue behind it.
//! 3. Subscribe to progress and to the operation's terminal message, then
//!    send the request. Subscribing first means a fast reply cannot slip past.
//! 4. Surface progress through the monotonic ratchet until the terminal
//!    message, a cancellation, or the session stopping.
//! 5. Release the subscription, forward the message list to the sink, emit
//!    `Completed`, release the slot, and linger so the final notice stays
//!    visible before the next one.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::operation::{OperationKind, OperationNotice, OperationOutcome};
use crate::models::request::Request;
use crate::models::response::{MessageList, ResponseEvent, RunEnvironment};
use crate::models::settings::{SettingsProvider, SettingsSnapshot};
use crate::orchestrator::event_bus::Subscription;
use crate::orchestrator::progress::ProgressTracker;
use crate::orchestrator::session::{Session, SessionState};
use crate::sink::DiagnosticsSink;
use crate::{AppError, Result};

/// Capacity of the notice broadcast channel.
const NOTICE_BUFFER: usize = 128;

/// How long each operation kind keeps its final notice visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LingerDelays {
    /// After resolve.
    pub resolve: Duration,
    /// After build, compile-only, and rebuild.
    pub build: Duration,
    /// After clean.
    pub clean: Duration,
    /// After install.
    pub install: Duration,
}

impl Default for LingerDelays {
    fn default() -> Self {
        Self {
            resolve: Duration::from_millis(1000),
            build: Duration::from_millis(2000),
            clean: Duration::from_millis(1000),
            install: Duration::from_millis(1000),
        }
    }
}

impl LingerDelays {
    /// No lingering at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            resolve: Duration::ZERO,
            build: Duration::ZERO,
            clean: Duration::ZERO,
            install: Duration::ZERO,
        }
    }

    /// Delay for `kind`.
    #[must_use]
    pub fn for_kind(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Resolve => self.resolve,
            OperationKind::Build | OperationKind::CompileOnly | OperationKind::Rebuild => {
                self.build
            }
            OperationKind::Clean => self.clean,
            OperationKind::Install => self.install,
            OperationKind::RunEnvironment | OperationKind::Cancel => Duration::ZERO,
        }
    }
}

/// Runs resolve, build, clean, install, rebuild, compile-only, cancel, and
/// run-environment against one session, one at a time.
pub struct Orchestrator {
    session: Arc<Session>,
    settings: Arc<dyn SettingsProvider>,
    sink: Arc<dyn DiagnosticsSink>,
    notices: broadcast::Sender<OperationNotice>,
    slot: tokio::sync::Mutex<()>,
    current: Mutex<Option<(u64, CancellationToken)>>,
    next_operation_id: AtomicU64,
    linger: LingerDelays,
}

impl Orchestrator {
    /// Create an orchestrator with default linger delays.
    #[must_use]
    pub fn new(
        session: Arc<Session>,
        settings: Arc<dyn SettingsProvider>,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_BUFFER);
        Self {
            session,
            settings,
            sink,
            notices,
            slot: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
            next_operation_id: AtomicU64::new(1),
            linger: LingerDelays::default(),
        }
    }

    /// Replace the linger delays.
    #[must_use]
    pub fn with_linger(mut self, linger: LingerDelays) -> Self {
        self.linger = linger;
        self
    }

    /// The session operations run against.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Receiver for operation notices.
    #[must_use]
    pub fn subscribe_notices(&self) -> broadcast::Receiver<OperationNotice> {
        self.notices.subscribe()
    }

    /// Whether an operation is registered and can be cancelled.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.current_lock().is_some()
    }

    fn current_lock(&self) -> MutexGuard<'_, Option<(u64, CancellationToken)>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Operations ───────────────────────────────────────────────────────────

    /// Load and configure the project.
    pub async fn resolve(&self) -> OperationOutcome {
        let kind = OperationKind::Resolve;
        match self.prepare(kind, |s| s.resolve_request().map(Request::Resolve)) {
            Ok(request) => self.run_single(kind, request).await,
            Err(outcome) => outcome,
        }
    }

    /// Build `products`, or the configured products when `None`.
    pub async fn build(&self, products: Option<Vec<String>>) -> OperationOutcome {
        let kind = OperationKind::Build;
        match self.prepare(kind, |s| Ok(Request::Build(s.build_request(products)))) {
            Ok(request) => self.run_single(kind, request).await,
            Err(outcome) => outcome,
        }
    }

    /// Remove build artifacts.
    pub async fn clean(&self) -> OperationOutcome {
        let kind = OperationKind::Clean;
        match self.prepare(kind, |s| Ok(Request::Clean(s.clean_request()))) {
            Ok(request) => self.run_single(kind, request).await,
            Err(outcome) => outcome,
        }
    }

    /// Install built products.
    pub async fn install(&self) -> OperationOutcome {
        let kind = OperationKind::Install;
        match self.prepare(kind, |s| Ok(Request::Install(s.install_request()))) {
            Ok(request) => self.run_single(kind, request).await,
            Err(outcome) => outcome,
        }
    }

    /// Clean, then build if the clean succeeded.
    ///
    /// The slot is held across both steps so no other operation can slip in
    /// between them. One cancel token covers the whole rebuild, including the
    /// pause between clean and build.
    pub async fn rebuild(&self) -> OperationOutcome {
        let clean = match self.prepare(OperationKind::Rebuild, |s| {
            Ok(Request::Clean(s.clean_request()))
        }) {
            Ok(request) => request,
            Err(outcome) => return outcome,
        };
        let slot = self.slot.lock().await;
        let started = Instant::now();
        let registration = Registration::new(self);
        let token = registration.token.clone();

        let (cleaned, _) = self.execute(OperationKind::Clean, clean, &token).await;
        if !cleaned.success {
            drop(registration);
            drop(slot);
            info!("rebuild stopped after failed clean");
            self.linger(OperationKind::Clean).await;
            return cleaned;
        }
        tokio::select! {
            () = self.linger(OperationKind::Clean) => {}
            () = token.cancelled() => {}
        }
        if token.is_cancelled() {
            drop(registration);
            drop(slot);
            let outcome = OperationOutcome::failed("rebuild cancelled");
            self.conclude(OperationKind::Rebuild, started, &outcome, &MessageList::default());
            return outcome;
        }

        // Settings may have changed while cleaning; the build uses the latest.
        let build = match self.prepare(OperationKind::Build, |s| {
            Ok(Request::Build(s.build_request(None)))
        }) {
            Ok(request) => request,
            Err(outcome) => return outcome,
        };
        let (built, _) = self.execute(OperationKind::Build, build, &token).await;
        drop(registration);
        drop(slot);
        self.linger(OperationKind::Build).await;
        built
    }

    /// Compile only `files`, activating object and header file tags.
    pub async fn compile_only(&self, files: Vec<PathBuf>) -> OperationOutcome {
        let kind = OperationKind::CompileOnly;
        if files.is_empty() {
            return self.reject(kind, &AppError::Precondition("no files to compile".into()));
        }
        match self.prepare(kind, |s| Ok(Request::Build(s.compile_request(files)))) {
            Ok(request) => self.run_single(kind, request).await,
            Err(outcome) => outcome,
        }
    }

    /// Ask the tool to abandon its current job and stop waiting for it.
    ///
    /// Cancellation is advisory: the tool may still finish (or already have
    /// finished) the job. The waiting operation resolves as cancelled and a
    /// late terminal message is dropped.
    pub fn cancel(&self) -> OperationOutcome {
        if let Err(e) = self.session.send(Request::Cancel) {
            debug!(error = %e, "cancel request not sent");
        }
        match self.current_lock().take() {
            Some((id, token)) => {
                token.cancel();
                info!(operation_id = id, "cancellation requested");
                OperationOutcome::succeeded("cancel requested")
            }
            None => {
                debug!("cancel with no operation in flight");
                OperationOutcome::succeeded("nothing to cancel")
            }
        }
    }

    /// Query the environment `product` runs in.
    ///
    /// # Errors
    ///
    /// - [`AppError::Precondition`] if the product name is empty or the
    ///   session cannot run operations.
    /// - [`AppError::Operation`] if the tool reports errors or the query is
    ///   cancelled.
    pub async fn run_environment(&self, product: &str) -> Result<RunEnvironment> {
        let kind = OperationKind::RunEnvironment;
        if product.trim().is_empty() {
            let err = AppError::Precondition("no product given".into());
            self.reject(kind, &err);
            return Err(err);
        }
        let request = self
            .prepare(kind, |s| {
                Ok(Request::GetRunEnvironment(s.run_environment_request(product)))
            })
            .map_err(|outcome| AppError::Precondition(outcome.message))?;

        let slot = self.slot.lock().await;
        let registration = Registration::new(self);
        let (outcome, terminal) = self.execute(kind, request, &registration.token).await;
        drop(registration);
        drop(slot);

        match terminal {
            Some(ResponseEvent::RunEnvironment(env)) if outcome.success => Ok(env),
            _ => Err(AppError::Operation(outcome.message)),
        }
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn prepare<F>(&self, kind: OperationKind, make: F) -> std::result::Result<Request, OperationOutcome>
    where
        F: FnOnce(&SettingsSnapshot) -> Result<Request>,
    {
        let checked = self
            .settings
            .snapshot()
            .ok_or_else(|| AppError::Precondition("settings are not available".into()))
            .and_then(|snapshot| {
                snapshot.project_file()?;
                snapshot.build_root()?;
                let state = self.session.state();
                if state != SessionState::Started {
                    return Err(AppError::Precondition(format!(
                        "build tool session is {state}"
                    )));
                }
                make(&snapshot)
            });
        checked.map_err(|e| self.reject(kind, &e))
    }

    fn reject(&self, kind: OperationKind, err: &AppError) -> OperationOutcome {
        warn!(operation = %kind, error = %err, "operation not started");
        let outcome = OperationOutcome::failed(err.to_string());
        self.sink
            .operation_finished(kind, &outcome, &MessageList::default());
        outcome
    }

    async fn run_single(&self, kind: OperationKind, request: Request) -> OperationOutcome {
        let slot = self.slot.lock().await;
        let registration = Registration::new(self);
        let (outcome, _) = self.execute(kind, request, &registration.token).await;
        drop(registration);
        drop(slot);
        self.linger(kind).await;
        outcome
    }

    async fn linger(&self, kind: OperationKind) {
        let delay = self.linger.for_kind(kind);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn notify(&self, notice: OperationNotice) {
        // No receivers is fine.
        let _ = self.notices.send(notice);
    }

    /// Send `request` and wait for the terminal message of `kind`.
    ///
    /// The caller holds the slot and has registered `token` as the current
    /// operation.
    async fn execute(
        &self,
        kind: OperationKind,
        request: Request,
        token: &CancellationToken,
    ) -> (OperationOutcome, Option<ResponseEvent>) {
        let mut subscription = self
            .session
            .subscribe(move |event| event.is_progress() || kind.is_terminal(event));
        let started = Instant::now();
        self.notify(OperationNotice::Started { kind });
        info!(operation = %kind, request = request.type_name(), "operation started");

        if let Err(e) = self.session.send(request) {
            drop(subscription);
            let outcome = OperationOutcome::failed(format!("{kind} request not sent: {e}"));
            self.conclude(kind, started, &outcome, &MessageList::default());
            return (outcome, None);
        }

        let mut tracker = ProgressTracker::new();
        let mut state_rx = self.session.watch_state();

        let ended = loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break Err(format!("{kind} cancelled")),
                event = subscription.recv() => match event {
                    Some(event) if kind.is_terminal(&event) => break Ok(event),
                    Some(event) => self.track(kind, &mut tracker, &event),
                    None => break Err(format!("{kind} aborted: message bus closed")),
                },
                () = session_ended(&mut state_rx) => {
                    // The reply may have been dispatched just before the exit.
                    match self.drain_terminal(kind, &mut tracker, &mut subscription) {
                        Some(event) => break Ok(event),
                        None => break Err(format!("{kind} aborted: build tool session ended")),
                    }
                }
            }
        };
        drop(subscription);

        match ended {
            Ok(event) => {
                let (outcome, messages) = judge(kind, &event);
                self.conclude(kind, started, &outcome, &messages);
                (outcome, Some(event))
            }
            Err(reason) => {
                let outcome = OperationOutcome::failed(reason);
                self.conclude(kind, started, &outcome, &MessageList::default());
                (outcome, None)
            }
        }
    }

    fn track(&self, kind: OperationKind, tracker: &mut ProgressTracker, event: &ResponseEvent) {
        if let Some(update) = tracker.apply(event) {
            self.notify(OperationNotice::Progress {
                kind,
                percentage: update.percentage,
                increment: update.increment,
                description: update.description,
            });
        }
    }

    /// Consume whatever is already queued, returning the terminal message if
    /// it is among it.
    fn drain_terminal(
        &self,
        kind: OperationKind,
        tracker: &mut ProgressTracker,
        subscription: &mut Subscription,
    ) -> Option<ResponseEvent> {
        while let Some(event) = subscription.try_recv() {
            if kind.is_terminal(&event) {
                return Some(event);
            }
            self.track(kind, tracker, &event);
        }
        None
    }

    fn conclude(
        &self,
        kind: OperationKind,
        started: Instant,
        outcome: &OperationOutcome,
        messages: &MessageList,
    ) {
        let elapsed = started.elapsed();
        self.sink.operation_finished(kind, outcome, messages);
        if outcome.success {
            info!(operation = %kind, elapsed_ms = elapsed.as_millis(), "operation succeeded");
        } else {
            warn!(
                operation = %kind,
                elapsed_ms = elapsed.as_millis(),
                message = %outcome.message,
                "operation failed"
            );
        }
        self.notify(OperationNotice::Completed {
            kind,
            success: outcome.success,
            elapsed,
            message: outcome.message.clone(),
        });
    }
}

/// Outcome and message list carried by a terminal message.
fn judge(kind: OperationKind, event: &ResponseEvent) -> (OperationOutcome, MessageList) {
    let errors = match event {
        ResponseEvent::ProjectResolved(done)
        | ResponseEvent::ProjectBuilt(done)
        | ResponseEvent::ProjectCleaned(done)
        | ResponseEvent::InstallDone(done) => &done.error,
        ResponseEvent::RunEnvironment(env) => &env.error,
        other => {
            return (
                OperationOutcome::failed(format!("unexpected reply {}", other.type_name())),
                MessageList::default(),
            )
        }
    };
    if errors.is_empty() {
        (
            OperationOutcome::succeeded(format!("{kind} succeeded")),
            MessageList::default(),
        )
    } else {
        (OperationOutcome::failed(errors.to_text()), errors.clone())
    }
}

async fn session_ended(rx: &mut watch::Receiver<SessionState>) {
    if rx
        .wait_for(|s| matches!(s, SessionState::Stopping | SessionState::Stopped))
        .await
        .is_err()
    {
        debug!("session state channel closed");
    }
}

/// Registration of the operation in flight, as seen by [`Orchestrator::cancel`].
///
/// Dropping it clears the slot entry unless a newer registration (or a
/// cancel) already replaced it.
struct Registration<'a> {
    orchestrator: &'a Orchestrator,
    id: u64,
    token: CancellationToken,
}

impl<'a> Registration<'a> {
    fn new(orchestrator: &'a Orchestrator) -> Self {
        let id = orchestrator.next_operation_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        *orchestrator.current_lock() = Some((id, token.clone()));
        Self {
            orchestrator,
            id,
            token,
        }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut current = self.orchestrator.current_lock();
        if current.as_ref().is_some_and(|(id, _)| *id == self.id) {
            *current = None;
        }
    }
}
