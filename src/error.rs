//! Error taxonomy for a single chat request.
//!
//! Every variant is terminal for the request it belongs to; nothing in the
//! request path retries. Malformed SSE frames are not represented here: the
//! frame decoder returns its own [`crate::sse::ParseError`] and the stream pump
//! skips those lines.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    /// Missing credential or unusable configuration. The request is never sent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Non-success answer from the provider (or from the relay in front of it).
    #[error("Error: {status} - {body}")]
    Upstream { status: u16, body: String },

    /// The user stopped generation.
    #[error("Generation stopped")]
    Cancelled,

    #[error("Connection error: {0}")]
    Http(#[from] reqwest::Error),

    /// The byte stream broke mid-way (reset connection, oversized line).
    #[error("Stream error: {0}")]
    Stream(String),
}

impl ChatError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn upstream(status: u16, body: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            body: body.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_displays_status_and_body() {
        let err = ChatError::upstream(401, "{\"error\":\"No auth credentials found\"}");
        assert_eq!(
            err.to_string(),
            "Error: 401 - {\"error\":\"No auth credentials found\"}"
        );
    }

    #[test]
    fn cancellation_is_distinguished() {
        assert!(ChatError::Cancelled.is_cancelled());
        assert!(!ChatError::config("missing key").is_cancelled());
        assert!(ChatError::config("missing key").is_config());
    }
}
