use std::time::Duration;

use shared::{domain::ConversationId, error::ApiError};
use thiserror::Error;

use crate::retry::RateLimitSignal;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{endpoint} is rate limited; retry after {retry_after:?}")]
    RateLimited {
        endpoint: String,
        retry_after: Duration,
    },
    #[error("{endpoint} failed: {error}")]
    Api { endpoint: String, error: ApiError },
    #[error("transport failure calling {endpoint}: {source}")]
    Transport {
        endpoint: String,
        source: reqwest::Error,
    },
    #[error("malformed payload from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
    #[error("history unavailable for conversation {conversation_id}: {source}")]
    HistoryUnavailable {
        conversation_id: ConversationId,
        source: Box<SyncError>,
    },
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("websocket connection failed: {0}")]
    Connection(String),
    #[error("no conversation is open")]
    NoConversationOpen,
    #[error("no thread is open")]
    NoThreadOpen,
}

impl SyncError {
    pub fn transport(endpoint: &str, source: reqwest::Error) -> Self {
        Self::Transport {
            endpoint: endpoint.to_string(),
            source,
        }
    }

    pub fn decode(endpoint: &str, message: impl Into<String>) -> Self {
        Self::Decode {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl RateLimitSignal for SyncError {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
