//! NDJSON codec for agent stdout.
//!
//! Splits the stream on `\n` with a maximum line length so a misbehaving
//! agent cannot make the runner buffer an unbounded line. No single line
//! can end the stream: oversized lines are discarded through their newline
//! and bytes that are not UTF-8 are replaced, leaving rejection of the
//! content to the line parser.
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use agent_session_runner::process::codec::NdjsonCodec;
//!
//! let lines = FramedRead::new(child_stdout, NdjsonCodec::new());
//! ```

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::warn;

use crate::{AppError, Result};

/// Maximum accepted line length: 4 MiB.
///
/// Tool results embedded in assistant output can be large, so this is
/// looser than a typical control-protocol limit.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Line-framing codec for agent NDJSON streams.
///
/// `decode` only fails on I/O errors surfaced by the underlying reader.
#[derive(Debug)]
pub struct NdjsonCodec {
    max_length: usize,
    /// Bytes already scanned for a newline.
    next_index: usize,
    /// Inside an oversized line; drop bytes through the next newline.
    discarding: bool,
}

impl NdjsonCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Default for NdjsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NdjsonCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let read_to = src.len().min(self.max_length.saturating_add(1));
            let newline = src[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            match (self.discarding, newline) {
                (true, Some(end)) => {
                    src.advance(end + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(end)) => {
                    let line = src.split_to(end + 1);
                    self.next_index = 0;
                    return Ok(Some(decode_line(&line[..end])));
                }
                (false, None) if src.len() > self.max_length => {
                    warn!(limit = self.max_length, "discarding oversized agent line");
                    self.discarding = true;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if self.discarding || src.is_empty() {
            self.discarding = false;
            src.clear();
            return Ok(None);
        }
        let line = src.split_to(src.len());
        Ok(Some(decode_line(&line)))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
