//! Frame codec for the newline-delimited JSON wire format.
//!
//! Wire format: one serialized [`Message`] per frame, terminated by `\n`.
//! A frame has no length prefix, so arbitrarily large messages stream through
//! without the reader ever needing to know the size up front; the decoder
//! only buffers up to the next delimiter.
//!
//! The codec performs no I/O. The socket owner appends whatever bytes arrive
//! to a [`FrameBuffer`] and drains complete frames out of it; partial frames
//! stay in the buffer until the delimiter shows up.

use thiserror::Error;
use tracing::warn;

use crate::protocol::messages::Message;

/// Frame terminator byte.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Errors produced while encoding or decoding a single frame.
///
/// A decode error invalidates only the offending frame: frames before and
/// after it in the same buffer still decode, and the error never terminates
/// the connection by itself.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame bytes are not a valid wire message.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The message could not be serialized.
    #[error("frame serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Encodes one [`Message`] as a delimiter-terminated frame.
///
/// # Errors
///
/// Returns [`FrameError::Serialize`] if the message cannot be serialized.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameError> {
    let mut buf = serde_json::to_vec(msg).map_err(FrameError::Serialize)?;
    buf.push(FRAME_DELIMITER);
    Ok(buf)
}

/// Streaming receive buffer that accumulates bytes until complete frames can
/// be split off.
///
/// A stream socket gives no message boundaries: a single read may deliver a
/// fraction of one frame or several frames at once. `extend` appends whatever
/// arrived (a zero-length read loses nothing) and `drain_frames` removes every
/// complete frame, leaving the unconsumed remainder in place.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Appends bytes received from the socket.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet consumed by a complete frame.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Splits off and decodes every complete frame currently buffered.
    ///
    /// Each frame decodes independently: a malformed frame yields one
    /// `Err(FrameError)` entry while its neighbours still come out as `Ok`.
    /// Frames are surfaced atomically — a partially received frame is never
    /// returned and its bytes remain buffered for the next call. Blank frames
    /// (a bare delimiter, or `\r\n` line endings) are skipped.
    pub fn drain_frames(&mut self) -> Vec<Result<Message, FrameError>> {
        let mut frames = Vec::new();
        let mut consumed = 0;

        while let Some(pos) = self.buf[consumed..]
            .iter()
            .position(|&b| b == FRAME_DELIMITER)
        {
            let line = &self.buf[consumed..consumed + pos];
            consumed += pos + 1;

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match serde_json::from_slice::<Message>(line) {
                Ok(msg) => frames.push(Ok(msg)),
                Err(e) => {
                    warn!("discarding malformed frame ({} bytes): {e}", line.len());
                    frames.push(Err(FrameError::Malformed(e)));
                }
            }
        }

        self.buf.drain(..consumed);
        frames
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
