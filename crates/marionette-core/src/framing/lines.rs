//! Newline-delimited JSON framing for the code helper.

use tracing::{debug, warn};

use super::Framer;
use crate::protocol::CodeResponse;

/// Extracts the response record for one request from a JSON-lines stream.
///
/// Lines that fail to decode are dropped and scanning continues with the next
/// line, so a partial or interleaved write cannot wedge the stream. Records
/// carrying a different id are stale answers to abandoned requests and are
/// dropped as well.
#[derive(Debug)]
pub struct LineFramer {
    token: u64,
    buffer: Vec<u8>,
    discarded: usize,
}

impl LineFramer {
    /// Create a framer for the request with the given token.
    pub fn new(token: u64) -> Self {
        Self {
            token,
            buffer: Vec::new(),
            discarded: 0,
        }
    }

    /// Number of lines dropped so far (malformed or stale).
    pub fn discarded(&self) -> usize {
        self.discarded
    }
}

impl Framer for LineFramer {
    type Output = CodeResponse;

    fn feed(&mut self, chunk: &[u8]) -> Option<CodeResponse> {
        self.buffer.extend_from_slice(chunk);

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_slice::<CodeResponse>(line) {
                Ok(response) if response.answers(self.token) => return Some(response),
                Ok(response) => {
                    warn!(
                        expected = self.token,
                        got = ?response.id,
                        "Discarding stale code helper response"
                    );
                    self.discarded += 1;
                }
                Err(e) => {
                    debug!(
                        "Discarding undecodable code helper line ({}): {}",
                        e,
                        String::from_utf8_lossy(line)
                    );
                    self.discarded += 1;
                }
            }
        }

        None
    }
}
