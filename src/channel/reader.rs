//! Channel reader task.
//!
//! Reads raw chunks from the tool's stdout into an accumulating buffer,
//! drains every complete packet with [`PacketCodec`], parses each payload
//! into a [`ResponseEvent`], and forwards the results through a tokio
//! [`mpsc`] channel.
//!
//! | Condition                      | Result                                   |
//! |--------------------------------|------------------------------------------|
//! | first non-empty chunk          | [`ChannelEvent::Activity`]               |
//! | complete packet, known `type`  | [`ChannelEvent::Message`]                |
//! | unknown `type` / bad JSON      | logged at `WARN`, skipped                |
//! | framing error                  | [`ChannelEvent::Fatal`], reader stops    |
//! | EOF                            | remaining packets flushed, reader stops  |

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::codec::PacketCodec;
use crate::channel::ChannelEvent;
use crate::models::response::ResponseEvent;
use crate::Result;

/// Initial read buffer capacity.
const READ_CHUNK: usize = 8 * 1024;

/// Parse one decoded payload.
///
/// Returns `None` (after logging) for payloads that are not a known message,
/// so that a single odd message never stops the stream.
#[must_use]
pub fn parse_payload(json: &str) -> Option<ResponseEvent> {
    match ResponseEvent::parse(json) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, payload = json, "channel reader: skipping unparseable message");
            None
        }
    }
}

/// Reader task: turns the tool's stdout into [`ChannelEvent`]s.
///
/// Returns when the stream ends, a framing error occurs, the event receiver
/// is dropped, or `cancel` fires.
///
/// # Errors
///
/// Always returns `Ok(())`; failures are reported as events.
pub async fn run_reader<R>(
    stdout: R,
    event_tx: mpsc::Sender<ChannelEvent>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut stdout = stdout;
    let mut codec = PacketCodec::new();
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut active = false;

    loop {
        buf.reserve(READ_CHUNK);
        let read = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("channel reader: cancellation received, stopping");
                break;
            }

            read = stdout.read_buf(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                debug!(buffered = buf.len(), "channel reader: EOF detected");
                loop {
                    match codec.decode_eof(&mut buf) {
                        Ok(Some(json)) => {
                            if !forward(&event_tx, &json).await {
                                return Ok(());
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            send(&event_tx, ChannelEvent::Fatal(e.to_string())).await;
                            break;
                        }
                    }
                }
                break;
            }
            Ok(n) => {
                if !active {
                    active = true;
                    debug!(bytes = n, "channel reader: first activity");
                    if !send(&event_tx, ChannelEvent::Activity).await {
                        break;
                    }
                }

                loop {
                    match codec.decode(&mut buf) {
                        Ok(Some(json)) => {
                            if !forward(&event_tx, &json).await {
                                return Ok(());
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "channel reader: framing error, stopping");
                            send(&event_tx, ChannelEvent::Fatal(e.to_string())).await;
                            return Ok(());
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "channel reader: IO error, stopping");
                send(&event_tx, ChannelEvent::Fatal(format!("read failed: {e}"))).await;
                break;
            }
        }
    }

    Ok(())
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Parse `json` and forward it; `false` once the receiver is gone.
async fn forward(event_tx: &mpsc::Sender<ChannelEvent>, json: &str) -> bool {
    match parse_payload(json) {
        Some(event) => send(event_tx, ChannelEvent::Message(event)).await,
        None => true,
    }
}

async fn send(event_tx: &mpsc::Sender<ChannelEvent>, event: ChannelEvent) -> bool {
    if event_tx.send(event).await.is_err() {
        debug!("channel reader: event_tx closed, stopping");
        return false;
    }
    true
}
