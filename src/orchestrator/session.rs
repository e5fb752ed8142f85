//! Session state machine around one build tool connection.
//!
//! ```text
//!            start()                first activity
//!  Stopped ──────────▶ Starting ─────────────────▶ Started
//!     ▲                   │                           │ stop()
//!     │  process exit     │ startup timeout /         ▼
//!     └───────────────────┴──── framing error ──▶ Stopping
//! ```
//!
//! "Started" is an activity heuristic: the protocol has no readiness
//! acknowledgement, so the first chunk of stdout is taken as evidence that
//! the tool is alive. A configurable startup timeout terminates a tool that
//! stays silent.
//!
//! Each connection gets a generation number. The per-connection pump task
//! drops events whose generation is no longer current, so a late message
//! from a previous process can never affect its successor.

use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::futures::Notified;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::channel::reader::run_reader;
use crate::channel::writer::run_writer;
use crate::channel::{ChannelEvent, Connection, ExitInfo, Launcher};
use crate::models::request::Request;
use crate::models::response::{Hello, ResponseEvent};
use crate::orchestrator::event_bus::{EventBus, Subscription};
use crate::sink::DiagnosticsSink;
use crate::{AppError, Result};

/// Capacity of the reader → pump channel.
const EVENT_BUFFER: usize = 256;

/// How long the pump keeps draining reader output after the process exited.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No process.
    Stopped,
    /// Process spawned, no output seen yet.
    Starting,
    /// Process produced output and accepts requests.
    Started,
    /// Termination requested, waiting for the process to exit.
    Stopping,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
        })
    }
}

struct ActiveConnection {
    request_tx: mpsc::UnboundedSender<Request>,
    terminate: Option<oneshot::Sender<()>>,
    cancel: CancellationToken,
    pid: Option<u32>,
}

struct Inner {
    state: SessionState,
    generation: u64,
    connection: Option<ActiveConnection>,
    restart_pending: bool,
    stop_requested: bool,
    auto_resolve_pending: bool,
    auto_resolve_released: bool,
    hello: Option<Hello>,
}

/// One long-lived connection to the build tool.
///
/// Construct once, share via [`Arc`], and pass explicitly to the
/// orchestrator and anything else that needs it.
pub struct Session {
    launcher: Arc<dyn Launcher>,
    sink: Arc<dyn DiagnosticsSink>,
    bus: EventBus,
    startup_timeout: Option<Duration>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
    auto_resolve_release: Notify,
}

impl Session {
    /// Create a stopped session.
    #[must_use]
    pub fn new(launcher: Arc<dyn Launcher>, sink: Arc<dyn DiagnosticsSink>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Stopped);
        Self {
            launcher,
            sink,
            bus: EventBus::new(),
            startup_timeout: None,
            inner: Mutex::new(Inner {
                state: SessionState::Stopped,
                generation: 0,
                connection: None,
                restart_pending: false,
                stop_requested: false,
                auto_resolve_pending: false,
                auto_resolve_released: false,
                hello: None,
            }),
            state_tx,
            auto_resolve_release: Notify::new(),
        }
    }

    /// Terminate a tool that produces no output within `timeout` of starting.
    #[must_use]
    pub fn with_startup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.startup_timeout = timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        let previous = inner.state;
        inner.state = state;
        self.state_tx.send_replace(state);
        info!(from = %previous, to = %state, generation = inner.generation, "session state changed");
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Greeting of the running tool, once received.
    #[must_use]
    pub fn hello(&self) -> Option<Hello> {
        self.lock().hello.clone()
    }

    /// OS process id of the running tool, if known.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.lock().connection.as_ref().and_then(|c| c.pid)
    }

    /// Register a subscriber for inbound messages matching `filter`.
    pub fn subscribe<F>(&self, filter: F) -> Subscription
    where
        F: Fn(&ResponseEvent) -> bool + Send + Sync + 'static,
    {
        self.bus.subscribe(filter)
    }

    /// The session's message bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Launch the tool. Only legal from [`SessionState::Stopped`].
    ///
    /// Returns `Ok(false)` without doing anything when no executable is
    /// configured.
    ///
    /// # Errors
    ///
    /// - [`AppError::Session`] if the session is not stopped.
    /// - [`AppError::Spawn`] if the process cannot be launched; the session
    ///   stays stopped.
    pub fn start(self: &Arc<Self>) -> Result<bool> {
        let mut inner = self.lock();
        if inner.state != SessionState::Stopped {
            return Err(AppError::Session(format!(
                "cannot start while {}",
                inner.state
            )));
        }
        if !self.launcher.is_configured() {
            debug!("no build tool executable configured; start ignored");
            return Ok(false);
        }

        let Connection {
            stdin,
            stdout,
            exit,
            terminate,
            pid,
        } = self.launcher.launch().map_err(|e| {
            warn!(error = %e, "build tool launch failed");
            e
        })?;

        inner.generation += 1;
        let generation = inner.generation;
        let cancel = CancellationToken::new();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = run_reader(stdout, event_tx, reader_cancel).await {
                warn!(generation, error = %e, "session reader stopped");
            }
        });
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = run_writer(stdin, request_rx, writer_cancel).await {
                warn!(generation, error = %e, "session writer stopped");
            }
        });

        inner.connection = Some(ActiveConnection {
            request_tx,
            terminate: Some(terminate),
            cancel,
            pid,
        });
        inner.stop_requested = false;
        self.set_state(&mut inner, SessionState::Starting);
        drop(inner);

        tokio::spawn(Arc::clone(self).pump(generation, event_rx, exit));
        if let Some(timeout) = self.startup_timeout {
            tokio::spawn(Arc::clone(self).startup_watchdog(generation, timeout));
        }
        Ok(true)
    }

    /// Ask the tool to terminate.
    ///
    /// From `Started` the terminate signal is sent at once. From `Starting`
    /// the stop is recorded and carried out as soon as the tool shows
    /// activity; a parked auto-resolve is discarded either way. Returns
    /// `false` when there is nothing to stop.
    pub fn stop(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Started => {
                inner.auto_resolve_pending = false;
                inner.auto_resolve_released = false;
                self.terminate_locked(&mut inner);
                true
            }
            SessionState::Starting => {
                debug!("stop requested while starting; deferred until first activity");
                inner.auto_resolve_pending = false;
                inner.auto_resolve_released = false;
                inner.stop_requested = true;
                true
            }
            SessionState::Stopped | SessionState::Stopping => false,
        }
    }

    /// Stop (if running) and start again once stopped.
    ///
    /// The restart-pending flag is consumed exactly once, on the next
    /// transition to `Stopped`.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::start`] errors when the session is already
    /// stopped.
    pub fn restart(self: &Arc<Self>) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Stopped => {
                drop(inner);
                self.start().map(|_| ())
            }
            SessionState::Starting => {
                inner.restart_pending = true;
                inner.stop_requested = true;
                Ok(())
            }
            SessionState::Started => {
                inner.restart_pending = true;
                self.terminate_locked(&mut inner);
                Ok(())
            }
            SessionState::Stopping => {
                inner.restart_pending = true;
                Ok(())
            }
        }
    }

    /// Queue a request for the tool.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`] if no connection is open, the session is
    /// stopping, or the writer has gone away.
    pub fn send(&self, request: Request) -> Result<()> {
        let inner = self.lock();
        if inner.state == SessionState::Stopping {
            return Err(AppError::Session("session is stopping".into()));
        }
        let Some(connection) = inner.connection.as_ref() else {
            return Err(AppError::Session("no build tool connection".into()));
        };
        let kind = request.type_name();
        connection
            .request_tx
            .send(request)
            .map_err(|_| AppError::Session(format!("writer closed; {kind} not sent")))
    }

    /// Claim an auto-resolve.
    ///
    /// Returns `true` if the session is started and the caller should
    /// resolve now; this also settles any earlier parked request. Otherwise
    /// the request is parked and released through
    /// [`Session::auto_resolve_released`] by the next transition to `Started`.
    pub fn request_auto_resolve(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == SessionState::Started {
            inner.auto_resolve_pending = false;
            inner.auto_resolve_released = false;
            return true;
        }
        debug!(state = %inner.state, "auto-resolve parked until the session starts");
        inner.auto_resolve_pending = true;
        false
    }

    /// Resolves when a parked auto-resolve is released.
    ///
    /// A wakeup may be stale; confirm it with
    /// [`Session::claim_released_auto_resolve`].
    pub fn auto_resolve_released(&self) -> Notified<'_> {
        self.auto_resolve_release.notified()
    }

    /// Take the released auto-resolve, if one is still outstanding and the
    /// session is started.
    pub fn claim_released_auto_resolve(&self) -> bool {
        let mut inner = self.lock();
        std::mem::take(&mut inner.auto_resolve_released) && inner.state == SessionState::Started
    }

    /// Wait until the session is `Started`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`] if the session is (or becomes) stopped
    /// first.
    pub async fn wait_until_started(&self) -> Result<()> {
        let mut rx = self.watch_state();
        let state = *rx
            .wait_for(|s| matches!(s, SessionState::Started | SessionState::Stopped))
            .await
            .map_err(|_| AppError::Session("session dropped".into()))?;
        if state == SessionState::Started {
            Ok(())
        } else {
            Err(AppError::Session("build tool session is not running".into()))
        }
    }

    /// Wait until the session is `Stopped`.
    pub async fn wait_until_stopped(&self) {
        let mut rx = self.watch_state();
        if rx.wait_for(|s| *s == SessionState::Stopped).await.is_err() {
            debug!("session state channel closed");
        }
    }

    // ── Connection internals ─────────────────────────────────────────────────

    fn terminate_locked(&self, inner: &mut Inner) {
        if let Some(terminate) = inner.connection.as_mut().and_then(|c| c.terminate.take()) {
            if terminate.send(()).is_err() {
                debug!("exit monitor already gone");
            }
        }
        self.set_state(inner, SessionState::Stopping);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    async fn pump(
        self: Arc<Self>,
        generation: u64,
        mut events: mpsc::Receiver<ChannelEvent>,
        mut exit: oneshot::Receiver<ExitInfo>,
    ) {
        let info = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(generation, event),
                    None => {
                        trace!(generation, "reader finished; waiting for process exit");
                        break (&mut exit).await.unwrap_or_else(|_| monitor_lost());
                    }
                },
                info = &mut exit => {
                    let info = info.unwrap_or_else(|_| monitor_lost());
                    let drain = async {
                        while let Some(event) = events.recv().await {
                            self.handle_event(generation, event);
                        }
                    };
                    if tokio::time::timeout(EXIT_DRAIN_GRACE, drain).await.is_err() {
                        debug!(generation, "reader still open after exit; remaining output dropped");
                    }
                    break info;
                }
            }
        };

        self.on_exit(generation, &info);
    }

    fn handle_event(&self, generation: u64, event: ChannelEvent) {
        match event {
            ChannelEvent::Activity => self.on_activity(generation),
            ChannelEvent::Message(message) => {
                if !self.is_current(generation) {
                    trace!(generation, message = message.type_name(), "stale message dropped");
                    return;
                }
                if let ResponseEvent::Hello(hello) = &message {
                    info!(
                        api_level = hello.api_level,
                        api_compat_level = hello.api_compat_level,
                        "build tool greeted"
                    );
                    self.lock().hello = Some(hello.clone());
                }
                if message.is_diagnostic() {
                    self.sink.forward(&message);
                }
                let delivered = self.bus.dispatch(&message);
                trace!(message = message.type_name(), delivered, "message dispatched");
            }
            ChannelEvent::Fatal(reason) => {
                error!(generation, reason, "channel failure; tearing down connection");
                let mut inner = self.lock();
                if inner.generation == generation
                    && matches!(inner.state, SessionState::Starting | SessionState::Started)
                {
                    self.terminate_locked(&mut inner);
                }
            }
        }
    }

    fn on_activity(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != SessionState::Starting {
            return;
        }
        self.set_state(&mut inner, SessionState::Started);

        if inner.stop_requested {
            inner.stop_requested = false;
            self.terminate_locked(&mut inner);
            return;
        }
        if std::mem::take(&mut inner.auto_resolve_pending) {
            inner.auto_resolve_released = true;
            drop(inner);
            debug!("releasing parked auto-resolve");
            self.auto_resolve_release.notify_one();
        }
    }

    fn on_exit(self: &Arc<Self>, generation: u64, info: &ExitInfo) {
        let restart = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            if let Some(connection) = inner.connection.take() {
                connection.cancel.cancel();
            }
            inner.hello = None;
            inner.stop_requested = false;
            inner.auto_resolve_released = false;
            self.set_state(&mut inner, SessionState::Stopped);
            std::mem::take(&mut inner.restart_pending)
        };

        info!(exit_code = ?info.exit_code, reason = %info.reason, "build tool session ended");

        if restart {
            info!("restarting build tool session");
            if let Err(e) = self.start() {
                warn!(error = %e, "restart failed");
            }
        }
    }

    async fn startup_watchdog(self: Arc<Self>, generation: u64, timeout: Duration) {
        tokio::time::sleep(timeout).await;
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == SessionState::Starting {
            warn!(
                timeout_secs = timeout.as_secs(),
                "build tool produced no output before the startup timeout; terminating"
            );
            self.terminate_locked(&mut inner);
        }
    }
}

fn monitor_lost() -> ExitInfo {
    ExitInfo {
        exit_code: None,
        reason: "exit monitor dropped".into(),
    }
}
