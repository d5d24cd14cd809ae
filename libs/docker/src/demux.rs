//! Decoder for the Docker log stream.
//!
//! Containers without a TTY emit a multiplexed stream of frames:
//!
//! ```text
//! +--------+-------+-------+-------+----------------+---------+
//! | stream |   0   |   0   |   0   | size (u32, BE) | payload |
//! +--------+-------+-------+-------+----------------+---------+
//! ```
//!
//! where `stream` is 0 (stdin), 1 (stdout) or 2 (stderr). TTY containers emit
//! raw bytes. The framing is sniffed from the first header.

use bytes::{Buf, BytesMut};

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Multiplexed,
    Raw,
}

/// Incremental log decoder: feed body chunks, pull complete lines.
#[derive(Debug, Default)]
pub struct LogDecoder {
    buf: BytesMut,
    pending: Vec<u8>,
    framing: Option<Framing>,
}

impl LogDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of the response body.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        self.unframe();
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Flush at end of stream: returns any unterminated trailing line.
    pub fn finish(&mut self) -> Option<String> {
        if self.framing.is_none() && !self.buf.is_empty() {
            self.framing = Some(Framing::Raw);
        }
        if let Some(line) = self.next_line() {
            return Some(line);
        }
        if self.framing == Some(Framing::Multiplexed) && !self.buf.is_empty() {
            // Truncated frame: keep what arrived.
            let rest = self.buf.split();
            self.pending.extend_from_slice(&rest[HEADER_LEN.min(rest.len())..]);
        }
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    fn unframe(&mut self) {
        if self.framing.is_none() {
            if self.buf.len() < HEADER_LEN {
                return;
            }
            self.framing = Some(if looks_like_header(&self.buf) {
                Framing::Multiplexed
            } else {
                Framing::Raw
            });
        }

        match self.framing {
            Some(Framing::Raw) => {
                let chunk = self.buf.split();
                self.pending.extend_from_slice(&chunk);
            }
            Some(Framing::Multiplexed) => {
                while self.buf.len() >= HEADER_LEN {
                    let size =
                        u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]])
                            as usize;
                    if self.buf.len() < HEADER_LEN + size {
                        break;
                    }
                    self.buf.advance(HEADER_LEN);
                    let payload = self.buf.split_to(size);
                    self.pending.extend_from_slice(&payload);
                }
            }
            None => {}
        }
    }
}

fn looks_like_header(buf: &[u8]) -> bool {
    buf[0] <= 2 && buf[1..4] == [0, 0, 0]
}
