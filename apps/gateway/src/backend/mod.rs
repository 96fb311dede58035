//! The backend service the gateway forwards to.
//!
//! The backend owns credentials, chat membership and persistence. The gateway
//! only ever makes one attempt per client action and relays the failure
//! reason verbatim.

pub mod http;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::gateway::events::SendMessagePayload;
use crate::models::{ChatMember, User};

pub use http::HttpBackend;

/// Failure of a backend call. `Display` is the reason shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Non-success status with an `{"error": ...}` body.
    #[error("backend error: {0}")]
    Rejected(String),
    /// Non-success status without a readable error body.
    #[error("backend error: status {0}")]
    Status(u16),
    #[error("invalid token")]
    InvalidToken,
    #[error("backend request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Transport(String),
    #[error("invalid backend response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Request/response operations the gateway needs from the backend.
///
/// Backed by [`HttpBackend`] in production and an in-memory fake in tests.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Resolve a bearer token to its user.
    async fn validate_credential(&self, token: &str) -> Result<User, BackendError>;

    async fn list_chat_members(&self, chat_id: i64) -> Result<Vec<ChatMember>, BackendError>;

    /// Persist a new message on behalf of `token`'s user. Returns the
    /// backend's representation of the created message, untouched.
    async fn forward_message(
        &self,
        token: &str,
        message: &SendMessagePayload,
    ) -> Result<Value, BackendError>;

    async fn forward_reaction(
        &self,
        token: &str,
        message_id: i64,
        emoji: &str,
    ) -> Result<(), BackendError>;

    async fn forward_read_receipt(
        &self,
        token: &str,
        message_ids: &[i64],
    ) -> Result<(), BackendError>;
}
