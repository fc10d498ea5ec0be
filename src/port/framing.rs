//! Length-delimited wire framing.
//!
//! `[start_code: 1] [length: 2, big-endian] [payload: length]`. The payload
//! is opaque: in-band occurrences of the start code are not escaped. After a
//! corrupted length the receiver resynchronizes on its own once the bogus
//! span is consumed, because the scan always hunts for the next start code
//! before trusting a header.

use crate::error::{NodeLinkError, NodeLinkResult};

/// Largest payload the 16-bit length field can carry.
pub const MAX_PAYLOAD_LEN: usize = 0xFFFF;

/// Start code + two length bytes.
pub const HEADER_LEN: usize = 3;

/// Prepend the frame header to `payload`.
pub fn encode_frame(start_code: u8, payload: &[u8]) -> NodeLinkResult<Vec<u8>> {
    let len = payload.len();
    if len > MAX_PAYLOAD_LEN {
        return Err(NodeLinkError::FrameTooLarge { len });
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + len);
    frame.push(start_code);
    frame.push((len >> 8) as u8);
    frame.push((len & 0xFF) as u8);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Incremental receive-side framer.
///
/// Feed raw bytes with [`extend`](Self::extend), then drain completed
/// payloads with [`next_frame`](Self::next_frame) until it returns `None`.
#[derive(Debug)]
pub struct FrameAccumulator {
    start_code: u8,
    buf: Vec<u8>,
}

impl FrameAccumulator {
    pub fn new(start_code: u8) -> Self {
        Self {
            start_code,
            buf: Vec::new(),
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes currently buffered (pending or partial frame data).
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Advance the framing state machine one step:
    ///
    /// 1. Seek the next start code; with none present the buffer is noise
    ///    and is purged.
    /// 2. Drop bytes before the marker.
    /// 3. With fewer than three bytes buffered, wait for more data.
    /// 4. Read the big-endian length; wait until the whole frame arrived.
    /// 5. Emit the payload and delete the consumed prefix.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let Some(start) = self.buf.iter().position(|&b| b == self.start_code) else {
            if !self.buf.is_empty() {
                tracing::debug!("RX buffer cleared (no start code): {} bytes", self.buf.len());
                self.buf.clear();
            }
            return None;
        };
        if start > 0 {
            self.buf.drain(..start);
        }
        if self.buf.len() < HEADER_LEN {
            return None;
        }
        let length = ((self.buf[1] as usize) << 8) | self.buf[2] as usize;
        let total = HEADER_LEN + length;
        if self.buf.len() < total {
            return None;
        }
        let payload = self.buf[HEADER_LEN..total].to_vec();
        self.buf.drain(..total);
        tracing::debug!("frame received: {} bytes", length);
        Some(payload)
    }
}
