use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    RateLimited,
    Internal,
}

impl ErrorCode {
    /// Maps the platform's `error` string from a `{ "ok": false }` response.
    pub fn classify(raw: &str) -> Self {
        match raw {
            "ratelimited" | "rate_limited" => Self::RateLimited,
            "not_authed" | "invalid_auth" | "account_inactive" | "token_revoked"
            | "token_expired" => Self::Unauthorized,
            "not_in_channel" | "is_archived" | "cant_update_message" | "cant_delete_message"
            | "restricted_action" | "missing_scope" | "edit_window_closed" => Self::Forbidden,
            "channel_not_found" | "message_not_found" | "thread_not_found" | "user_not_found" => {
                Self::NotFound
            }
            "already_reacted" | "no_reaction" | "invalid_name" | "invalid_cursor"
            | "invalid_timestamp" | "no_text" | "msg_too_long" | "too_many_reactions" => {
                Self::Validation
            }
            _ => Self::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_platform(raw: &str) -> Self {
        Self::new(ErrorCode::classify(raw), raw)
    }
}
