//! Line framing for `data: <JSON>` streams.
//!
//! Bytes are buffered until a full line is available and only complete lines
//! are decoded, so multi-byte UTF-8 sequences split across buffers survive.

use crate::types::Chunk;

/// Literal prefix that marks a record line.
pub const DATA_PREFIX: &str = "data: ";

/// Classification of one non-blank line.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedLine {
    /// A `data: ` line whose payload parsed as a chunk.
    Chunk(Chunk),
    /// A `data: ` line that could not be decoded.
    Malformed { reason: String },
    /// Any other non-blank line.
    Ignored,
}

/// Incremental splitter that turns byte buffers into decoded lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
    scanned: usize,
}

impl LineDecoder {
    /// Appends a buffer and returns every line it completes, in order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<DecodedLine> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            if let Some(line) = decode_line(&self.buf[start..end]) {
                lines.push(line);
            }
            start = end + 1;
            self.scanned = start;
        }
        // consumed lines are removed in one shift
        self.buf.drain(..start);
        self.scanned = self.buf.len();
        lines
    }

    /// Flushes an unterminated trailing line at end of stream.
    pub fn finish(&mut self) -> Option<DecodedLine> {
        self.scanned = 0;
        let raw = std::mem::take(&mut self.buf);
        decode_line(&raw)
    }

    /// Number of bytes held back waiting for a newline.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Decodes a single line without its terminating `\n`.
///
/// Returns `None` for blank lines.
pub fn decode_line(raw: &[u8]) -> Option<DecodedLine> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => {
            if raw.iter().all(u8::is_ascii_whitespace) {
                return None;
            }
            if raw.starts_with(DATA_PREFIX.as_bytes()) {
                return Some(DecodedLine::Malformed {
                    reason: format!("invalid UTF-8 in record: {e}"),
                });
            }
            return Some(DecodedLine::Ignored);
        }
    };
    if text.trim().is_empty() {
        return None;
    }
    let Some(payload) = text.strip_prefix(DATA_PREFIX) else {
        return Some(DecodedLine::Ignored);
    };
    let value = match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => value,
        Err(e) => {
            return Some(DecodedLine::Malformed {
                reason: format!("invalid JSON record: {e}"),
            });
        }
    };
    Some(match Chunk::try_from(value) {
        Ok(chunk) => DecodedLine::Chunk(chunk),
        Err(reason) => DecodedLine::Malformed { reason },
    })
}
