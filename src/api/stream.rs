use crate::types::{Decoded, StreamEvent};

/// Reassembles complete protocol lines from arbitrarily chunked network
/// reads. The carry-over buffer holds raw bytes, not decoded text, so a
/// multi-byte UTF-8 sequence split across two reads is never corrupted.
#[derive(Default)]
pub struct LineReassembler {
    buffer: Vec<u8>,
}

impl LineReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and collect every line it completed, in order. Lines
    /// are trimmed; blank lines are dropped and never reach the decoder.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        lines
    }

    /// Drain the trailing partial line once the transport signals end of
    /// stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&raw);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Classify one trimmed line. Decode failures are not errors: garbled or
/// non-protocol output degrades to literal text instead of aborting the
/// response.
pub fn decode_line(line: &str) -> Decoded {
    match serde_json::from_str::<StreamEvent>(line) {
        Ok(event) => Decoded::Event(event),
        Err(error) => {
            tracing::debug!(%error, line, "line is not a stream event, keeping it as text");
            Decoded::Literal(line.to_string())
        }
    }
}
