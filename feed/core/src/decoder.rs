//! Frame Decoder
//!
//! Splits the feed's byte stream into frames and decodes each one into a
//! [`RawEvent`].
//!
//! # Frame Format
//!
//! ```text
//! +----------------+----------------------------------+--------+
//! | Prefix (6)     | JSON Payload (variable)          | "\n\n" |
//! | e.g. "data: "  | WireFrame                        |        |
//! +----------------+----------------------------------+--------+
//! ```
//!
//! Bytes are buffered until a terminator arrives, so frames may be split
//! across network chunks at any byte (including inside a UTF-8 sequence).
//! A frame that fails to decode is consumed and reported; the next frame
//! decodes normally.
//!
//! # Security
//!
//! - An unterminated frame larger than the configured maximum is discarded
//!   to prevent memory exhaustion from a misbehaving server

use crate::error::FeedError;
use crate::messages::{RawEvent, WireFrame};

/// Width of the marker stripped from every frame (`data: `)
pub const DEFAULT_PREFIX_LEN: usize = 6;

/// Maximum size of a single frame (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Frame terminator
const TERMINATOR: &[u8] = b"\n\n";

/// Decoder state machine for streaming frame parsing
///
/// One decoder lives for one connection attempt; a new attempt starts with a
/// fresh decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
    /// Position up to which the buffer is known to contain no terminator
    scan_pos: usize,
    prefix_len: usize,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder for `data: `-prefixed frames
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_PREFIX_LEN, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a decoder with a custom prefix width and frame size limit
    #[must_use]
    pub fn with_limits(prefix_len: usize, max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
            scan_pos: 0,
            prefix_len,
            max_frame_size,
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        // Compact buffer if we've consumed a lot
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.scan_pos -= self.read_pos;
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Get the number of buffered bytes not yet consumed
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to decode the next frame
    ///
    /// Returns:
    /// - `Ok(Some(event))` if a complete frame was decoded
    /// - `Ok(None)` if more data is needed
    /// - `Err(FeedError::Decode)` if the next frame is malformed; the frame
    ///   has been consumed and decoding may continue
    pub fn decode(&mut self) -> Result<Option<RawEvent>, FeedError> {
        loop {
            let Some(end) = self.find_terminator() else {
                if self.available() > self.max_frame_size {
                    let size = self.available();
                    self.clear();
                    return Err(FeedError::Decode(format!(
                        "Frame size {size} exceeds maximum {}",
                        self.max_frame_size
                    )));
                }
                return Ok(None);
            };

            let start = self.read_pos;
            self.read_pos = end + TERMINATOR.len();
            self.scan_pos = self.read_pos;

            if let Some(event) = self.parse_block(start, end)? {
                return Ok(Some(event));
            }
            // Blank block, keep going
        }
    }

    /// Decode whatever is left once the stream has ended
    ///
    /// Servers may omit the blank line after the final frame.
    pub fn finish(&mut self) -> Result<Option<RawEvent>, FeedError> {
        if let Some(event) = self.decode()? {
            return Ok(Some(event));
        }
        let tail = self.buffer.split_off(self.read_pos);
        self.clear();
        Self::parse(&tail, self.prefix_len)
    }

    /// Iterate over all frames currently decodable
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { decoder: self }
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
        self.scan_pos = 0;
    }

    fn find_terminator(&mut self) -> Option<usize> {
        // A terminator may straddle the previous scan boundary
        let from = self.scan_pos.saturating_sub(1).max(self.read_pos);
        let found = self.buffer[from..]
            .windows(TERMINATOR.len())
            .position(|w| w == TERMINATOR)
            .map(|offset| from + offset);
        if found.is_none() {
            self.scan_pos = self.buffer.len();
        }
        found
    }

    fn parse_block(&self, start: usize, end: usize) -> Result<Option<RawEvent>, FeedError> {
        Self::parse(&self.buffer[start..end], self.prefix_len)
    }

    fn parse(block: &[u8], prefix_len: usize) -> Result<Option<RawEvent>, FeedError> {
        let block = block.trim_ascii();
        if block.is_empty() {
            return Ok(None);
        }

        if block.len() < prefix_len {
            return Err(FeedError::Decode(format!(
                "Frame of {} bytes is shorter than its {prefix_len}-byte prefix",
                block.len()
            )));
        }

        let payload = std::str::from_utf8(&block[prefix_len..])
            .map_err(|e| FeedError::Decode(format!("Frame is not valid UTF-8: {e}")))?;

        let frame: WireFrame = serde_json::from_str(payload)?;
        Ok(Some(RawEvent::from(frame)))
    }
}

/// Iterator over decodable frames, see [`FrameDecoder::frames`]
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Result<RawEvent, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.decode().transpose()
    }
}
