//! Channel writer task.
//!
//! Receives [`Request`]s from a tokio [`mpsc`] channel, frames each one with
//! [`PacketCodec`], and writes the packet to the tool's stdin. No response
//! correlation happens at this layer.

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::codec::PacketCodec;
use crate::models::request::Request;
use crate::Result;

/// Writer task: encodes queued requests onto `stdin`.
///
/// The task exits cleanly when:
/// - `cancel` is triggered, or
/// - `request_rx` is closed (all senders dropped).
///
/// # Errors
///
/// - [`AppError::Protocol`](crate::AppError::Protocol) if a request cannot
///   be serialised.
/// - [`AppError::Io`](crate::AppError::Io) if the write to `stdin` fails
///   (e.g. the tool process has exited).
pub async fn run_writer<W>(
    stdin: W,
    mut request_rx: mpsc::UnboundedReceiver<Request>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut framed = FramedWrite::new(stdin, PacketCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("channel writer: cancellation received, stopping");
                break;
            }

            request = request_rx.recv() => {
                let Some(request) = request else {
                    debug!("channel writer: request channel closed, stopping");
                    break;
                };

                let kind = request.type_name();
                if let Err(e) = framed.send(request).await {
                    warn!(request = kind, error = %e, "channel writer: write to stdin failed");
                    return Err(e);
                }
                debug!(request = kind, "channel writer: request sent");
            }
        }
    }

    Ok(())
}
