//! Frame reassembly for event-stream text.
//!
//! Provides [`FrameReassembler`], which buffers decoded text and splits it
//! into complete frames on blank lines. Because the whole unconsumed tail is
//! kept, a delimiter split across two network chunks is found as soon as
//! the second chunk arrives.

/// Primary frame delimiter.
const FRAME_DELIMITER: &str = "\n\n";

/// Default upper bound on text buffered without a delimiter.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// A single frame grew past the buffer limit without a delimiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("event frame exceeded {limit} bytes without a delimiter")]
pub struct FrameOverflow {
    pub limit: usize,
}

/// Splits a text stream into frames.
#[derive(Debug)]
pub struct FrameReassembler {
    buffer: String,
    max_frame_bytes: usize,
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_frame_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            max_frame_bytes,
        }
    }

    /// Append decoded text and return every frame it completes, in order.
    ///
    /// Fails once the unterminated tail outgrows the limit; the partial
    /// frame is kept so nothing is silently dropped.
    pub fn push(&mut self, text: &str) -> Result<Vec<String>, FrameOverflow> {
        self.buffer.push_str(text);
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some(pos) = self.buffer[consumed..].find(FRAME_DELIMITER) {
            let end = consumed + pos;
            frames.push(self.buffer[consumed..end].to_string());
            consumed = end + FRAME_DELIMITER.len();
        }
        if consumed > 0 {
            self.buffer.drain(..consumed);
        }

        if self.buffer.len() > self.max_frame_bytes {
            return Err(FrameOverflow {
                limit: self.max_frame_bytes,
            });
        }

        Ok(frames)
    }

    /// Recover frames a provider terminated without a final blank line.
    ///
    /// Consumes the reassembler, so this single-newline pass runs at most
    /// once and only over what the primary pass left behind.
    pub fn finish(self) -> Vec<String> {
        let mut rest = self.buffer;
        if rest.trim().is_empty() {
            return Vec::new();
        }
        rest.push('\n');

        rest.split('\n')
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
