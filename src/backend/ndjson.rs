//! Newline-delimited JSON framing.
//!
//! Ollama streams one JSON object per line, but HTTP chunk boundaries fall
//! anywhere. [`LineDecoder`] buffers partial lines between chunks.

use thiserror::Error;

/// Default upper bound on a single record.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("NDJSON line exceeds {limit} bytes")]
pub struct LineTooLong {
    pub limit: usize,
}

/// Incremental splitter for newline-terminated records.
#[derive(Debug)]
pub struct LineDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to hold no newline.
    scanned: usize,
    max_line_bytes: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_line_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_line_bytes,
        }
    }

    /// Feed a chunk and return every line it completes, without the newline.
    ///
    /// Blank lines are skipped and surrounding ASCII whitespace (including
    /// `\r`) is trimmed. A line longer than the limit, complete or not, is an
    /// error and discards the buffer.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, LineTooLong> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut search = self.scanned;
        while let Some(pos) = self.buf[search..].iter().position(|&b| b == b'\n') {
            let end = search + pos;
            if end - start > self.max_line_bytes {
                return Err(self.overflow());
            }
            let line = self.buf[start..end].trim_ascii();
            if !line.is_empty() {
                lines.push(line.to_vec());
            }
            start = end + 1;
            search = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();

        if self.buf.len() > self.max_line_bytes {
            return Err(self.overflow());
        }
        Ok(lines)
    }

    /// Take whatever is left once the input has ended.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.scanned = 0;
        let rest = std::mem::take(&mut self.buf);
        let line = rest.trim_ascii();
        (!line.is_empty()).then(|| line.to_vec())
    }

    /// Bytes buffered waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn overflow(&mut self) -> LineTooLong {
        self.buf = Vec::new();
        self.scanned = 0;
        LineTooLong {
            limit: self.max_line_bytes,
        }
    }
}
