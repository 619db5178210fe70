use super::stream::{decode_line, LineReassembler};
use crate::error::SendError;
use crate::types::Decoded;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, SendError>> + Send>>;

/// Returned in place of an empty body so a successful request never yields an
/// empty assistant message.
pub const EMPTY_RESPONSE_TEXT: &str = "(empty response)";

/// Inter-fragment pause when replaying a fully buffered event body, so the
/// caller still sees incremental progress.
const REPLAY_DELAY: Duration = Duration::from_millis(20);

/// How one response body is interpreted. Resolved exactly once per request:
/// from the content-type, then (for buffered bodies) from a single content
/// sniff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Live newline-delimited body, read incrementally.
    Streamed,
    /// Buffered body that nevertheless carries the line-event format.
    EventLines,
    /// Buffered body treated as one JSON envelope (or plain text).
    Envelope,
}

impl ResponseShape {
    /// Shape decidable from the content-type alone. `None` means the body
    /// must be buffered and sniffed first.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let normalized = content_type.to_ascii_lowercase();
        let streamed = ["text/event-stream", "application/x-ndjson", "text/plain"]
            .iter()
            .any(|marker| normalized.contains(marker));
        streamed.then_some(Self::Streamed)
    }

    /// The inherited compatibility sniff: webhook backends that ignore
    /// content-type still emit line events, recognizable by their `type` tag.
    pub fn from_buffered_text(text: &str) -> Self {
        if text.contains("{\"type\":\"begin\"") || text.contains("{\"type\":\"item\"") {
            Self::EventLines
        } else {
            Self::Envelope
        }
    }
}

/// Drives the full body of one request through the line/event pipeline and
/// returns the authoritative response text. `on_fragment` is invoked once per
/// fragment, in arrival order, with the delta only.
///
/// Transport failures surface as errors; malformed lines inside the body are
/// absorbed by the decoder's literal fallback.
pub async fn aggregate(
    content_type: &str,
    body: ByteStream,
    on_fragment: &mut dyn FnMut(&str),
) -> Result<String, SendError> {
    if let Some(ResponseShape::Streamed) = ResponseShape::from_content_type(content_type) {
        tracing::debug!(content_type, "reading response as a live stream");
        return drain_stream(body, on_fragment).await;
    }

    let text = buffer_body(body).await?;
    let shape = ResponseShape::from_buffered_text(&text);
    tracing::debug!(content_type, ?shape, "buffered response classified");
    let result = match shape {
        ResponseShape::EventLines => replay_event_lines(&text, on_fragment).await,
        ResponseShape::Envelope => extract_envelope_output(&text),
        ResponseShape::Streamed => unreachable!("sniff never yields Streamed"),
    };

    if result.is_empty() {
        Ok(EMPTY_RESPONSE_TEXT.to_string())
    } else {
        Ok(result)
    }
}

async fn drain_stream(
    mut body: ByteStream,
    on_fragment: &mut dyn FnMut(&str),
) -> Result<String, SendError> {
    let mut reassembler = LineReassembler::new();
    let mut full = String::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for line in reassembler.push(&chunk) {
            emit(decode_line(&line), &mut full, on_fragment);
        }
    }
    // The read loop is done; whatever the reassembler still holds is the
    // final (newline-less) line.
    if let Some(line) = reassembler.finish() {
        emit(decode_line(&line), &mut full, on_fragment);
    }

    tracing::debug!(content_length = full.len(), "stream fully drained");
    if full.is_empty() {
        Ok(EMPTY_RESPONSE_TEXT.to_string())
    } else {
        Ok(full)
    }
}

/// A body that arrived in one piece but carries line events: replay it
/// through the same decoder, pacing fragments so the caller keeps its
/// incremental rendering.
async fn replay_event_lines(text: &str, on_fragment: &mut dyn FnMut(&str)) -> String {
    let mut full = String::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(fragment) = decode_line(trimmed).into_fragment() {
            tokio::time::sleep(REPLAY_DELAY).await;
            full.push_str(&fragment);
            on_fragment(&fragment);
        }
    }

    if full.is_empty() {
        // Sniff matched but nothing decoded to content; the raw text is
        // still more useful than a placeholder.
        text.to_string()
    } else {
        full
    }
}

fn extract_envelope_output(text: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => value
            .get("output")
            .and_then(|output| output.as_str())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| text.to_string()),
        Err(_) => text.to_string(),
    }
}

fn emit(decoded: Decoded, full: &mut String, on_fragment: &mut dyn FnMut(&str)) {
    if let Some(fragment) = decoded.into_fragment() {
        full.push_str(&fragment);
        on_fragment(&fragment);
    }
}

async fn buffer_body(mut body: ByteStream) -> Result<String, SendError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_from_content_type() {
        assert_eq!(
            ResponseShape::from_content_type("text/event-stream; charset=utf-8"),
            Some(ResponseShape::Streamed)
        );
        assert_eq!(
            ResponseShape::from_content_type("application/x-ndjson"),
            Some(ResponseShape::Streamed)
        );
        assert_eq!(
            ResponseShape::from_content_type("Text/Plain"),
            Some(ResponseShape::Streamed)
        );
        assert_eq!(ResponseShape::from_content_type("application/json"), None);
        assert_eq!(ResponseShape::from_content_type(""), None);
    }

    #[test]
    fn test_shape_from_buffered_text() {
        assert_eq!(
            ResponseShape::from_buffered_text("{\"type\":\"begin\"}\n{\"type\":\"item\",\"content\":\"x\"}"),
            ResponseShape::EventLines
        );
        assert_eq!(
            ResponseShape::from_buffered_text("{\"output\":\"42\"}"),
            ResponseShape::Envelope
        );
    }

    #[test]
    fn test_envelope_extraction_falls_back_to_raw_text() {
        assert_eq!(extract_envelope_output("{\"output\":\"42\"}"), "42");
        assert_eq!(extract_envelope_output("{\"other\":\"x\"}"), "{\"other\":\"x\"}");
        assert_eq!(extract_envelope_output("not json"), "not json");
        assert_eq!(extract_envelope_output("{\"output\":7}"), "{\"output\":7}");
    }
}
