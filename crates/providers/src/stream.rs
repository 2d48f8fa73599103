//! Incremental decoding of streamed chat completions.
//!
//! Endpoints stream either Server-Sent Events (`data: {...}` lines ended by
//! `data: [DONE]`) or newline-delimited JSON (Ollama style, ended by
//! `"done": true`). Both carry one JSON payload per line; the payload is either
//! an OpenAI-style `choices[0].delta` or an Ollama-style `message`.

use reagent_core::provider::{StreamChunk, Usage};
use serde_json::Value;

/// Wire format of a streamed response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    Sse,
    Ndjson,
}

impl StreamFormat {
    /// `text/event-stream` means SSE; anything else is read as NDJSON.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.contains("text/event-stream") => StreamFormat::Sse,
            _ => StreamFormat::Ndjson,
        }
    }
}

/// What a single line of the body means.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    Chunk(StreamChunk),
    Done,
    /// Blank lines, SSE comments (`: ping`), other SSE fields, unparsable data
    Skip,
}

/// Decode one complete line.
pub fn parse_line(format: StreamFormat, line: &str) -> LineEvent {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return LineEvent::Skip;
    }

    let data = match format {
        StreamFormat::Sse => {
            if line.starts_with(':') {
                return LineEvent::Skip;
            }
            match line.strip_prefix("data:") {
                Some(data) => data.trim(),
                None => return LineEvent::Skip,
            }
        }
        StreamFormat::Ndjson => line.trim(),
    };

    if data == "[DONE]" {
        return LineEvent::Done;
    }

    match serde_json::from_str::<Value>(data) {
        Ok(payload) => match parse_payload(&payload) {
            Some(chunk) if chunk.done && chunk.content.is_none() && chunk.reasoning.is_none() => {
                LineEvent::Done
            }
            Some(chunk) => LineEvent::Chunk(chunk),
            None => LineEvent::Skip,
        },
        Err(e) => {
            tracing::trace!(data = %data, error = %e, "Ignoring unparseable stream line");
            LineEvent::Skip
        }
    }
}

/// Extract the delta carried by one payload.
///
/// Reasoning (`reasoning_content`) and answer (`content`) deltas are kept
/// apart; only the latter becomes part of the final text.
pub fn parse_payload(payload: &Value) -> Option<StreamChunk> {
    let usage = payload
        .get("usage")
        .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok());

    if let Some(message) = payload.get("message") {
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let done = payload.get("done").and_then(Value::as_bool).unwrap_or(false);
        return Some(StreamChunk {
            content,
            reasoning: None,
            done,
            usage,
        });
    }

    let choice = payload.get("choices").and_then(|c| c.get(0));
    let Some(delta) = choice.and_then(|c| c.get("delta")) else {
        return usage.map(|usage| StreamChunk {
            usage: Some(usage),
            ..Default::default()
        });
    };
    let text = |key: &str| {
        delta
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Some(StreamChunk {
        content: text("content"),
        reasoning: text("reasoning_content"),
        done: false,
        usage,
    })
}

/// Splits an arbitrary byte stream into complete lines.
///
/// Bytes are held until a newline arrives, so a character split across two
/// network chunks is decoded whole.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and drain every complete line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            lines.push(String::from_utf8_lossy(&line).trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    /// Whatever is left once the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
        (!rest.trim().is_empty()).then_some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_selects_format() {
        assert_eq!(
            StreamFormat::from_content_type(Some("text/event-stream; charset=utf-8")),
            StreamFormat::Sse
        );
        assert_eq!(
            StreamFormat::from_content_type(Some("application/x-ndjson")),
            StreamFormat::Ndjson
        );
        assert_eq!(StreamFormat::from_content_type(None), StreamFormat::Ndjson);
    }

    #[test]
    fn sse_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        assert_eq!(
            parse_line(StreamFormat::Sse, line),
            LineEvent::Chunk(StreamChunk::text("Hello"))
        );
    }

    #[test]
    fn sse_without_space_after_colon() {
        let line = r#"data:{"choices":[{"delta":{"content":"x"}}]}"#;
        assert_eq!(
            parse_line(StreamFormat::Sse, line),
            LineEvent::Chunk(StreamChunk::text("x"))
        );
    }

    #[test]
    fn sse_done_and_comments() {
        assert_eq!(parse_line(StreamFormat::Sse, "data: [DONE]"), LineEvent::Done);
        assert_eq!(parse_line(StreamFormat::Sse, ": ping"), LineEvent::Skip);
        assert_eq!(parse_line(StreamFormat::Sse, "event: message"), LineEvent::Skip);
        assert_eq!(parse_line(StreamFormat::Sse, ""), LineEvent::Skip);
        assert_eq!(parse_line(StreamFormat::Sse, "data: {broken"), LineEvent::Skip);
    }

    #[test]
    fn reasoning_and_content_in_one_delta() {
        let line = r#"data: {"choices":[{"delta":{"reasoning_content":"so","content":"Yes"}}]}"#;
        match parse_line(StreamFormat::Sse, line) {
            LineEvent::Chunk(chunk) => {
                assert_eq!(chunk.reasoning.as_deref(), Some("so"));
                assert_eq!(chunk.content.as_deref(), Some("Yes"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reasoning_is_kept_apart() {
        let line = r#"data: {"choices":[{"delta":{"reasoning_content":"hmm","content":""}}]}"#;
        match parse_line(StreamFormat::Sse, line) {
            LineEvent::Chunk(chunk) => {
                assert_eq!(chunk.reasoning.as_deref(), Some("hmm"));
                assert!(chunk.content.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ndjson_ollama_messages() {
        let line = r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#;
        assert_eq!(
            parse_line(StreamFormat::Ndjson, line),
            LineEvent::Chunk(StreamChunk::text("Hi"))
        );
        let last = r#"{"message":{"role":"assistant","content":""},"done":true}"#;
        assert_eq!(parse_line(StreamFormat::Ndjson, last), LineEvent::Done);
    }

    #[test]
    fn line_buffer_handles_split_lines() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"data: {\"a\"").is_empty());
        let lines = buffer.push(b":1}\r\ndata: [DONE]\n");
        assert_eq!(lines, vec!["data: {\"a\":1}", "data: [DONE]"]);
        assert!(buffer.finish().is_none());

        buffer.push(b"{\"tail\":true}");
        assert_eq!(buffer.finish().as_deref(), Some("{\"tail\":true}"));
    }

    #[test]
    fn line_buffer_keeps_split_characters_whole() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"列表\"}}]}\n".as_bytes();
        // Cut inside the three bytes of the first character
        let cut = line.iter().position(|&b| b >= 0x80).unwrap() + 1;
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(&line[..cut]).is_empty());
        let lines = buffer.push(&line[cut..]);

        assert_eq!(lines.len(), 1);
        assert!(!lines[0].contains('\u{FFFD}'));
        assert_eq!(
            parse_line(StreamFormat::Sse, &lines[0]),
            LineEvent::Chunk(StreamChunk::text("列表"))
        );
    }
}
