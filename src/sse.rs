//! Decoding of OpenAI-compatible SSE lines into content deltas.
//!
//! Works on one line at a time. Splitting the byte stream into lines is the
//! job of [`crate::stream::pump`].

use serde::Deserialize;
use thiserror::Error;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// A `data:` payload that was not valid JSON. Expected at chunk boundaries;
/// callers skip the line and carry on.
#[derive(Error, Debug)]
#[error("malformed SSE frame: {source}")]
pub struct ParseError {
    #[source]
    source: serde_json::Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Blank, comment, non-data, or a frame without content.
    Skip,
    Token(String),
    /// The `[DONE]` end-of-stream marker.
    Done,
}

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

pub fn decode_line(line: &str) -> Result<SseFrame, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(SseFrame::Skip);
    }

    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(SseFrame::Skip);
    };
    let data = data.trim();

    if data == DONE_SENTINEL {
        return Ok(SseFrame::Done);
    }

    let payload: ChunkPayload =
        serde_json::from_str(data).map_err(|source| ParseError { source })?;

    let content = payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty());

    Ok(match content {
        Some(token) => SseFrame::Token(token),
        None => SseFrame::Skip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_delta_content() {
        let frame = decode_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap();
        assert_eq!(frame, SseFrame::Token("Hi".to_string()));
    }

    #[test]
    fn done_sentinel_ends_the_stream() {
        assert_eq!(decode_line("data: [DONE]").unwrap(), SseFrame::Done);
        assert_eq!(decode_line("  data: [DONE]  \r").unwrap(), SseFrame::Done);
    }

    #[test]
    fn blank_comment_and_foreign_lines_are_skipped() {
        assert_eq!(decode_line("").unwrap(), SseFrame::Skip);
        assert_eq!(decode_line("   ").unwrap(), SseFrame::Skip);
        assert_eq!(decode_line(": OPENROUTER PROCESSING").unwrap(), SseFrame::Skip);
        assert_eq!(decode_line("event: message").unwrap(), SseFrame::Skip);
    }

    #[test]
    fn frames_without_content_are_skipped() {
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(decode_line(role_only).unwrap(), SseFrame::Skip);

        let empty = r#"data: {"choices":[{"delta":{"content":""}}]}"#;
        assert_eq!(decode_line(empty).unwrap(), SseFrame::Skip);

        let null = r#"data: {"choices":[{"delta":{"content":null},"finish_reason":"stop"}]}"#;
        assert_eq!(decode_line(null).unwrap(), SseFrame::Skip);

        assert_eq!(decode_line(r#"data: {"choices":[]}"#).unwrap(), SseFrame::Skip);
    }

    #[test]
    fn only_the_first_choice_counts() {
        let line = r#"data: {"choices":[{"delta":{"content":"a"}},{"delta":{"content":"b"}}]}"#;
        assert_eq!(decode_line(line).unwrap(), SseFrame::Token("a".to_string()));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(decode_line("data: not-json").is_err());
        assert!(decode_line(r#"data: {"choices":[{"delta":{"content":"unterminated"#).is_err());
    }

    #[test]
    fn whitespace_in_tokens_is_preserved() {
        let frame = decode_line(r#"data: {"choices":[{"delta":{"content":" world\n"}}]}"#).unwrap();
        assert_eq!(frame, SseFrame::Token(" world\n".to_string()));
    }
}
