//! Reassembly of HDLC frames from a byte stream
//!
//! A TCP read may deliver half a frame, several frames, or line noise in
//! front of a frame. The reassembler keeps an accumulator per connection and
//! hands out complete, checksum-valid frames only. Corrupt frames are logged
//! and dropped here and never reach the association layer.

use crate::hdlc::frame::{Decoded, HdlcFrame, FLAG, MAX_FRAME_LENGTH};
use bytes::{Buf, BytesMut};

/// Accumulator size above which buffered bytes are discarded
const DEFAULT_MAX_BUFFERED: usize = 4 * (MAX_FRAME_LENGTH + 2);

/// Per-connection frame reassembler
#[derive(Debug)]
pub struct StreamReassembler {
    buffer: BytesMut,
    max_buffered: usize,
    dropped_bytes: u64,
    corrupt_frames: u64,
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(MAX_FRAME_LENGTH + 2),
            max_buffered: DEFAULT_MAX_BUFFERED,
            dropped_bytes: 0,
            corrupt_frames: 0,
        }
    }

    /// Feed bytes read from the socket and collect every complete frame
    pub fn push(&mut self, data: &[u8]) -> Vec<HdlcFrame> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        while !self.buffer.is_empty() {
            let (decoded, consumed) = HdlcFrame::parse(&self.buffer);
            match decoded {
                Decoded::Frame(frame) => {
                    log::debug!("<- {}", frame);
                    frames.push(frame);
                }
                Decoded::NeedMore => break,
                Decoded::Garbage => {
                    log::debug!("skipping {} byte(s) outside a frame", consumed);
                    self.dropped_bytes += consumed as u64;
                }
                Decoded::Corrupt(err) => {
                    log::warn!("dropping corrupt frame ({} byte(s)): {}", consumed, err);
                    self.corrupt_frames += 1;
                    self.dropped_bytes += consumed as u64;
                }
            }
            self.buffer.advance(consumed);
        }

        self.enforce_limit();
        frames
    }

    /// Drop a partial frame that has grown past any legal frame size
    fn enforce_limit(&mut self) {
        if self.buffer.len() <= self.max_buffered {
            return;
        }
        log::warn!(
            "lost frame sync, discarding {} buffered byte(s)",
            self.buffer.len()
        );
        self.dropped_bytes += self.buffer.len() as u64;
        self.buffer.clear();
    }

    /// Whether a partial frame is waiting for more bytes
    pub fn has_partial(&self) -> bool {
        self.buffer.first() == Some(&FLAG)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    pub fn corrupt_frames(&self) -> u64 {
        self.corrupt_frames
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
