//! Line-buffered decoding of newline-delimited JSON completion records.
//!
//! Each line is one object such as `{"response": "Hi", "done": false}`.
//! Bytes arrive in arbitrary chunks, so partial lines (including split UTF-8
//! sequences) are held until their newline shows up.

use super::BackendChunk;
use crate::preview;
use serde::Deserialize;
use tracing::{trace, warn};

#[derive(Deserialize, Debug)]
struct Record {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Longest unterminated line the decoder will hold.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental NDJSON decoder.
#[derive(Debug)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
    max_line_bytes: usize,
}

impl Default for NdjsonDecoder {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }

    /// Feed bytes and return every record completed by them.
    ///
    /// A record carrying an `error` field decodes to `Err`. Lines that are
    /// not valid records are logged and skipped. A partial line longer than
    /// the cap is dropped and reported as `Err`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<BackendChunk, String>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(item) = decode_line(&line) {
                out.push(item);
            }
        }
        if self.buffer.len() > self.max_line_bytes {
            warn!("Dropping {} bytes of unterminated backend record", self.buffer.len());
            self.buffer.clear();
            out.push(Err(format!(
                "LLM backend record exceeded {} bytes",
                self.max_line_bytes
            )));
        }
        out
    }

    /// Flush a trailing line that had no newline.
    pub fn finish(&mut self) -> Option<Result<BackendChunk, String>> {
        let line = std::mem::take(&mut self.buffer);
        decode_line(&line)
    }
}

fn decode_line(line: &[u8]) -> Option<Result<BackendChunk, String>> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    trace!("backend record: {}", preview(line, 200));

    let record: Record = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            warn!("Skipping malformed backend record ({e}): {}", preview(line, 120));
            return None;
        }
    };

    if let Some(error) = record.error {
        return Some(Err(format!("LLM backend error: {error}")));
    }

    Some(Ok(BackendChunk {
        text: record.response.filter(|t| !t.is_empty()),
        done: record.done,
    }))
}
