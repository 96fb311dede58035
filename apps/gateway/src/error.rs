use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;
use crate::gateway::events::ClientEventKind;

/// A recoverable failure while handling one client event.
///
/// Each of these becomes exactly one `error` envelope to the session that sent
/// the event; the connection stays open. `Display` is the client-visible
/// message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("Invalid message format")]
    InvalidEnvelope,
    #[error("Invalid {} data", .0.label())]
    InvalidPayload(ClientEventKind),
    #[error("Unknown event type: {0}")]
    UnknownEvent(String),
    #[error("Authentication required")]
    AuthRequired,
    #[error("Token is required")]
    TokenRequired,
    #[error("Authentication failed: {0}")]
    AuthFailed(BackendError),
    #[error("Already authenticated as another user")]
    IdentityConflict,
    #[error("Invalid chat_id")]
    InvalidChatId,
    #[error("Failed to {action}: {source}")]
    Backend {
        action: &'static str,
        source: BackendError,
    },
}

impl EventError {
    /// Machine-readable code carried next to the message, if any.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::AuthFailed(_) => Some("auth_failed"),
            Self::Backend { .. } => Some("backend_error"),
            _ => None,
        }
    }

    pub fn backend(action: &'static str, source: BackendError) -> Self {
        Self::Backend { action, source }
    }
}

/// Why a connection ended. Always fatal for the session and never sent to
/// the client.
#[derive(Debug, Error)]
pub enum TransportFault {
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("socket read failed: {0}")]
    Read(axum::Error),
    #[error("socket write failed: {0}")]
    Write(axum::Error),
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
    #[error("no pong within {0:?}")]
    LivenessTimeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_reason_is_relayed_verbatim() {
        let err = EventError::backend(
            "send message",
            BackendError::Rejected("chat is archived".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "Failed to send message: backend error: chat is archived"
        );
        assert_eq!(err.code(), Some("backend_error"));
    }

    #[test]
    fn gate_errors_carry_no_code() {
        assert_eq!(EventError::AuthRequired.code(), None);
        assert_eq!(EventError::UnknownEvent("x".into()).to_string(), "Unknown event type: x");
        assert_eq!(
            EventError::AuthFailed(BackendError::InvalidToken).to_string(),
            "Authentication failed: invalid token"
        );
    }
}
