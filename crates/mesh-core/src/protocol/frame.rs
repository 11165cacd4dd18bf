//! Serial framing for the companion radio link.
//!
//! Wire format:
//! ```text
//! [marker:1][payload_len:2 LE][payload:N]
//! ```
//! `marker` is `'<'` (0x3C) for frames written to the radio and `'>'` (0x3E)
//! for frames read from it.  The payload is an opaque [`Frame`]; nothing in
//! this crate interprets it.

use thiserror::Error;
use tracing::trace;

/// An opaque radio frame.  The bridge forwards these verbatim.
pub type Frame = Vec<u8>;

/// Marker byte prefixing frames sent from the host to the radio.
pub const TO_RADIO_MARKER: u8 = b'<';

/// Marker byte prefixing frames sent from the radio to the host.
pub const FROM_RADIO_MARKER: u8 = b'>';

/// Size of the marker + length header.
pub const HEADER_SIZE: usize = 3;

/// Largest payload the `u16` length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Errors that can occur while encoding or decoding serial frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer does not yet hold a complete frame.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The first byte is not a from-radio marker.
    #[error("unexpected frame marker: 0x{0:02X}")]
    UnexpectedMarker(u8),

    /// The payload does not fit in the `u16` length field.
    #[error("payload too large: {len} bytes (max {MAX_PAYLOAD_LEN})")]
    PayloadTooLarge { len: usize },
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Wraps `payload` in a to-radio header.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLarge`] if `payload` is longer than
/// [`MAX_PAYLOAD_LEN`].
///
/// # Examples
///
/// ```rust
/// use mesh_core::protocol::encode_to_radio;
///
/// let bytes = encode_to_radio(&[0x01, 0x02]).unwrap();
/// assert_eq!(bytes, vec![b'<', 0x02, 0x00, 0x01, 0x02]);
/// ```
pub fn encode_to_radio(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u16::try_from(payload.len())
        .map_err(|_| FrameError::PayloadTooLarge { len: payload.len() })?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(TO_RADIO_MARKER);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decodes one from-radio frame from the front of `buf`.
///
/// Returns the payload and the total number of bytes consumed (header
/// included).
///
/// # Errors
///
/// - [`FrameError::InsufficientData`] if `buf` holds only part of a frame.
/// - [`FrameError::UnexpectedMarker`] if `buf` does not start with
///   [`FROM_RADIO_MARKER`].
pub fn decode_from_radio(buf: &[u8]) -> Result<(Frame, usize), FrameError> {
    let Some(&marker) = buf.first() else {
        return Err(FrameError::InsufficientData {
            needed: HEADER_SIZE,
            available: 0,
        });
    };
    if marker != FROM_RADIO_MARKER {
        return Err(FrameError::UnexpectedMarker(marker));
    }
    if buf.len() < HEADER_SIZE {
        return Err(FrameError::InsufficientData {
            needed: HEADER_SIZE,
            available: buf.len(),
        });
    }

    let payload_len = u16::from_le_bytes([buf[1], buf[2]]) as usize;
    let total = HEADER_SIZE + payload_len;
    if buf.len() < total {
        return Err(FrameError::InsufficientData {
            needed: total,
            available: buf.len(),
        });
    }

    Ok((buf[HEADER_SIZE..total].to_vec(), total))
}

/// Streaming decoder that turns arbitrary serial reads into whole frames.
///
/// Serial reads split and coalesce frames freely, so bytes are accumulated
/// until [`decode_from_radio`] can produce a complete frame.  Bytes that do
/// not start a from-radio frame (line noise, boot banners) are discarded one
/// at a time until the stream realigns on a marker.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every frame that is now complete, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        loop {
            match decode_from_radio(&self.buf) {
                Ok((frame, consumed)) => {
                    self.buf.drain(..consumed);
                    frames.push(frame);
                }
                Err(FrameError::UnexpectedMarker(byte)) => {
                    trace!("discarding stray serial byte 0x{byte:02X}");
                    self.buf.drain(..1);
                }
                Err(_) => break,
            }
        }
        frames
    }

    /// Number of buffered bytes that do not yet form a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drops any partially received frame.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
