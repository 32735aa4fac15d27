//! Incremental decoding of newline-delimited JSON stream records.

use serde::Deserialize;

use super::errors::UpstreamError;

/// One record of the streamed reply body.
#[derive(Debug, Deserialize)]
struct StreamRecord {
    content: String,
}

/// Longest accepted record, in bytes.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Splits a byte stream into lines, across arbitrary chunk boundaries.
///
/// A line longer than [`MAX_LINE_BYTES`] or not valid UTF-8 comes out as
/// [`UpstreamError::MalformedReply`]; the rest of an oversized line is
/// dropped up to its newline.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    discarding: bool,
}

impl LineDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            discarding: false,
        }
    }

    /// Feed a chunk and return every complete, non-blank line it finishes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<String, UpstreamError>> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let head = &rest[..pos];
            rest = &rest[pos + 1..];
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if self.buffer.len() + head.len() > MAX_LINE_BYTES {
                self.buffer.clear();
                lines.push(Err(oversized()));
                continue;
            }
            self.buffer.extend_from_slice(head);
            let raw = std::mem::take(&mut self.buffer);
            if let Some(line) = clean_line(&raw) {
                lines.push(line);
            }
        }

        if !self.discarding {
            if self.buffer.len() + rest.len() > MAX_LINE_BYTES {
                self.buffer.clear();
                self.discarding = true;
                lines.push(Err(oversized()));
            } else {
                self.buffer.extend_from_slice(rest);
            }
        }
        lines
    }

    /// Return the trailing unterminated line, if any, at clean end-of-stream.
    pub fn finish(&mut self) -> Option<Result<String, UpstreamError>> {
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        clean_line(&rest)
    }
}

fn oversized() -> UpstreamError {
    UpstreamError::MalformedReply(format!("record longer than {MAX_LINE_BYTES} bytes"))
}

fn clean_line(raw: &[u8]) -> Option<Result<String, UpstreamError>> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(err) => {
            return Some(Err(UpstreamError::MalformedReply(format!(
                "record is not UTF-8: {err}"
            ))));
        }
    };
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| Ok(trimmed.to_string()))
}

/// Decode one `{"content": ...}` record into its fragment.
///
/// # Errors
/// Returns [`UpstreamError::MalformedReply`] if the line is not such a record.
pub fn decode_record(line: &str) -> Result<String, UpstreamError> {
    serde_json::from_str::<StreamRecord>(line)
        .map(|record| record.content)
        .map_err(|err| UpstreamError::MalformedReply(format!("{err}: {line}")))
}
