//! Packet channel to the build tool process.
//!
//! The tool runs as `<executable> session` and talks exclusively over its
//! stdio using length-prefixed, base64-encoded JSON packets. Each connection
//! owns a reader task (stdout → [`ChannelEvent`]s), a writer task
//! ([`Request`]s → stdin), and an exit monitor.
//!
//! Submodules:
//! - `codec`: [`PacketCodec`](codec::PacketCodec) framing for both directions.
//! - `reader`: inbound task that decodes packets into
//!   [`ResponseEvent`]s and reports first activity.
//! - `writer`: outbound task that encodes requests onto stdin.
//! - `spawner`: process launch and exit monitoring.

pub mod codec;
pub mod reader;
pub mod spawner;
pub mod writer;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

use crate::models::response::ResponseEvent;
use crate::Result;

/// Events a connection reports to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The first chunk of bytes arrived on stdout.
    ///
    /// This is the only evidence that the tool is alive; the protocol has no
    /// explicit readiness acknowledgement.
    Activity,
    /// A complete packet was decoded and parsed.
    Message(ResponseEvent),
    /// The inbound stream can no longer be decoded; the connection must be
    /// torn down.
    Fatal(String),
}

/// How the tool process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Human-readable reason.
    pub reason: String,
}

/// Boxed stdout of a connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed stdin of a connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A launched tool process, as seen by the session.
pub struct Connection {
    /// Process stdin (requests are written here).
    pub stdin: BoxedWriter,
    /// Process stdout (packets are read from here).
    pub stdout: BoxedReader,
    /// Resolves once the process has exited.
    pub exit: oneshot::Receiver<ExitInfo>,
    /// Send `()` to ask the process to terminate; dropping it kills the process.
    pub terminate: oneshot::Sender<()>,
    /// OS process id, if known.
    pub pid: Option<u32>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("pid", &self.pid).finish_non_exhaustive()
    }
}

/// Starts tool processes for a session.
pub trait Launcher: Send + Sync {
    /// Whether a tool executable is configured at all.
    ///
    /// Starting a session without one is a no-op.
    fn is_configured(&self) -> bool {
        true
    }

    /// Launch a new tool process.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`](crate::AppError::Spawn) if the process
    /// cannot be started.
    fn launch(&self) -> Result<Connection>;
}
