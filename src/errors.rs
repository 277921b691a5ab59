use std::time::Duration;

use thiserror::Error;

/// Wire marker the assistant endpoint uses for an exhausted conversation budget.
pub const TOKEN_LIMIT_MARKER: &str = "token_limit_exceeded";

/// Top-level client error.
/// All variants carry enough context for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Transport errors ─────────────────────────────────────────────────────
    #[error("Transport failure (status {status:?}): {body}")]
    Transport { status: Option<u16>, body: String },

    #[error("Conversation reached its token limit")]
    TokenLimitExceeded,

    #[error("No data received for {after:?}")]
    Timeout { after: Duration },

    // ── Stream errors ────────────────────────────────────────────────────────
    #[error("Malformed stream record '{record}': {reason}")]
    ParseAnomaly { record: String, reason: String },

    #[error("Assistant reported a stream error: {reason}")]
    Stream { reason: String },

    // ── Persistence errors ───────────────────────────────────────────────────
    #[error("Persistence call failed: {message}")]
    Persistence { message: String },

    #[error("Conversation '{id}' not found")]
    ConversationNotFound { id: String },

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Field '{field_name}' exceeds max length of {max_length} (actual: {actual_length})")]
    FieldTooLong { field_name: String, max_length: usize, actual_length: usize },

    #[error("Conversation '{id}' no longer accepts messages; start a new conversation")]
    ConversationNotAppendable { id: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn transport(status: Option<u16>, body: impl Into<String>) -> Self {
        AppError::Transport { status, body: body.into() }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        AppError::Persistence { message: message.into() }
    }

    /// Maps a reqwest failure that happened before any response was available.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        AppError::Transport {
            status: err.status().map(|s| s.as_u16()),
            body: err.to_string(),
        }
    }

    /// Reclassifies a non-2xx chat reply whose body carries the token-limit
    /// marker. Every other error is returned unchanged.
    pub fn classify_chat_failure(self) -> Self {
        match self {
            AppError::Transport { status: Some(_), ref body } if body_marks_token_limit(body) => {
                AppError::TokenLimitExceeded
            }
            other => other,
        }
    }

    pub fn is_token_limit(&self) -> bool {
        matches!(self, AppError::TokenLimitExceeded)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::ConversationNotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::EmptyField { .. }
                | AppError::FieldTooLong { .. }
                | AppError::ConversationNotAppendable { .. }
        )
    }
}

fn body_marks_token_limit(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(|e| e == TOKEN_LIMIT_MARKER))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_limit_is_read_from_error_body() {
        let err = AppError::transport(
            Some(403),
            r#"{"error":"token_limit_exceeded","tokens_used":1990,"tokens_limit":2000}"#,
        )
        .classify_chat_failure();
        assert!(matches!(err, AppError::TokenLimitExceeded));
        assert!(err.is_token_limit());
    }

    #[test]
    fn other_bodies_stay_transport_failures() {
        let err = AppError::transport(Some(500), r#"{"error":"boom"}"#).classify_chat_failure();
        assert!(matches!(err, AppError::Transport { status: Some(500), .. }));

        let not_json = AppError::transport(Some(502), "Bad Gateway").classify_chat_failure();
        assert!(!not_json.is_token_limit());

        let refused = AppError::transport(None, r#"{"error":"token_limit_exceeded"}"#).classify_chat_failure();
        assert!(!refused.is_token_limit());

        let raw = AppError::transport(Some(403), r#"{"error":"token_limit_exceeded"}"#);
        assert!(!raw.is_token_limit());
    }

    #[test]
    fn validation_predicates() {
        assert!(AppError::EmptyField { field_name: "message".into() }.is_validation());
        assert!(AppError::ConversationNotAppendable { id: "c1".into() }.is_validation());
        assert!(!AppError::TokenLimitExceeded.is_validation());
    }
}
