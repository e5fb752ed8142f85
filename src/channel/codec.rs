//! Length-prefixed packet codec for the build tool's session protocol.
//!
//! A packet is the preamble token, the ASCII decimal length of the payload,
//! a `\n`, and the base64-encoded UTF-8 JSON payload:
//!
//! ```text
//! qbsmsg:16\neyJ0eXBlIjoiaGkifQ==qbsmsg:...
//! ```
//!
//! The next packet's preamble follows the payload bytes directly; there is no
//! trailing delimiter. The decoder keeps any incomplete trailing fragment
//! (partial preamble, partial length, or partial payload) in the buffer until
//! more bytes arrive.
//!
//! # Usage
//!
//! [`PacketCodec`] implements [`Decoder`] with `Item = String` (the decoded
//! JSON text) and [`Encoder`] for both [`Request`] values and raw JSON
//! strings.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::models::request::Request;
use crate::{AppError, Result};

/// Token that starts every packet.
pub const PREAMBLE: &[u8] = b"qbsmsg:";

/// Largest payload the decoder accepts: 64 MiB.
///
/// Project data for large projects runs to several megabytes; anything
/// beyond this limit is treated as a corrupt length field.
pub const MAX_PACKET_BYTES: usize = 64 * 1024 * 1024;

/// Longest length field accepted before the newline (digits of `usize::MAX`).
const MAX_LENGTH_DIGITS: usize = 20;

/// Inbound payloads are decoded leniently with respect to padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Codec for `qbsmsg:` packets.
///
/// # Decoder
///
/// Returns `Ok(None)` while no complete packet is buffered. A malformed
/// length field, an oversize length, or a payload that is not base64-encoded
/// UTF-8 yields [`AppError::Framing`]; the connection cannot resynchronise
/// after that and must be torn down.
///
/// # Encoder
///
/// [`Request`]s are serialised to compact JSON first; `String` items are
/// taken as already-serialised JSON.
#[derive(Debug, Default)]
pub struct PacketCodec {
    _private: (),
}

impl PacketCodec {
    /// Create a new codec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for PacketCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(start) = find_preamble(src) else {
            // Keep a possible partial preamble at the tail; anything before it
            // can never become part of a packet.
            let keep = PREAMBLE.len() - 1;
            if src.len() > keep {
                let skipped = src.len() - keep;
                debug!(skipped, "packet codec: discarding bytes outside any packet");
                src.advance(skipped);
            }
            return Ok(None);
        };

        if start > 0 {
            debug!(skipped = start, "packet codec: discarding bytes before preamble");
            src.advance(start);
        }

        let header = &src[PREAMBLE.len()..];
        let Some(newline) = header.iter().position(|b| *b == b'\n') else {
            check_length_digits(header)?;
            return Ok(None);
        };

        let digits = &header[..newline];
        check_length_digits(digits)?;
        let length = parse_length(digits)?;

        let prefix = PREAMBLE.len() + newline + 1;
        let needed = prefix + length;
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }

        src.advance(prefix);
        let payload = src.split_to(length);
        decode_payload(&payload).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        if !src.is_empty() {
            debug!(
                remaining = src.len(),
                "packet codec: dropping incomplete packet at end of stream"
            );
            src.clear();
        }
        Ok(None)
    }
}

impl Encoder<String> for PacketCodec {
    type Error = AppError;

    fn encode(&mut self, json: String, dst: &mut BytesMut) -> Result<()> {
        let payload = STANDARD.encode(json.as_bytes());
        let length = payload.len().to_string();

        dst.reserve(PREAMBLE.len() + length.len() + 1 + payload.len());
        dst.put_slice(PREAMBLE);
        dst.put_slice(length.as_bytes());
        dst.put_u8(b'\n');
        dst.put_slice(payload.as_bytes());
        Ok(())
    }
}

impl Encoder<&Request> for PacketCodec {
    type Error = AppError;

    fn encode(&mut self, request: &Request, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_string(request).map_err(|e| {
            AppError::Protocol(format!(
                "failed to serialise {} request: {e}",
                request.type_name()
            ))
        })?;
        <Self as Encoder<String>>::encode(self, json, dst)
    }
}

impl Encoder<Request> for PacketCodec {
    type Error = AppError;

    fn encode(&mut self, request: Request, dst: &mut BytesMut) -> Result<()> {
        <Self as Encoder<&Request>>::encode(self, &request, dst)
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn find_preamble(buf: &[u8]) -> Option<usize> {
    buf.windows(PREAMBLE.len()).position(|w| w == PREAMBLE)
}

/// Reject a length field that can never become valid, even before its
/// newline arrives.
fn check_length_digits(digits: &[u8]) -> Result<()> {
    if let Some(bad) = digits.iter().find(|b| !b.is_ascii_digit()) {
        return Err(AppError::Framing(format!(
            "invalid byte 0x{bad:02x} in packet length field"
        )));
    }
    if digits.len() > MAX_LENGTH_DIGITS {
        return Err(AppError::Framing("packet length field too long".into()));
    }
    Ok(())
}

fn parse_length(digits: &[u8]) -> Result<usize> {
    if digits.is_empty() {
        return Err(AppError::Framing("empty packet length field".into()));
    }
    // Digits were validated above, so the text is ASCII.
    let text = String::from_utf8_lossy(digits);
    let length: usize = text
        .parse()
        .map_err(|e| AppError::Framing(format!("invalid packet length '{text}': {e}")))?;
    if length > MAX_PACKET_BYTES {
        return Err(AppError::Framing(format!(
            "packet length {length} exceeds {MAX_PACKET_BYTES} bytes"
        )));
    }
    Ok(length)
}

fn decode_payload(payload: &[u8]) -> Result<String> {
    let compact: Vec<u8> = payload
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let raw = LENIENT_BASE64
        .decode(compact)
        .map_err(|e| AppError::Framing(format!("payload is not valid base64: {e}")))?;
    String::from_utf8(raw).map_err(|e| AppError::Framing(format!("payload is not UTF-8: {e}")))
}
