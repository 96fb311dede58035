//! Inbound event dispatch: auth gate plus one handler per client event.

use std::sync::Arc;

use crate::backend::ChatBackend;
use crate::error::EventError;

use super::events::{
    AddReactionPayload, AuthPayload, AuthSuccessPayload, ClientEvent, ClientEventKind, Envelope,
    EventName, MarkReadPayload, MessageReadPayload, NewReactionPayload, SendMessagePayload,
    TypingPayload, UserTypingPayload,
};
use super::registry::Registry;
use super::session::{IdentityUpdate, Session};

/// Routes decoded client events to the backend and the registry.
#[derive(Clone)]
pub struct EventRouter {
    registry: Registry,
    backend: Arc<dyn ChatBackend>,
}

impl EventRouter {
    pub fn new(registry: Registry, backend: Arc<dyn ChatBackend>) -> Self {
        Self { registry, backend }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Handle one inbound text frame. Failures are answered with a single
    /// `error` envelope and never end the connection.
    pub async fn handle_frame(&self, session: &Arc<Session>, text: &str) {
        if let Err(err) = self.route(session, text).await {
            tracing::debug!(session_id = %session.id(), %err, "event rejected");
            session.reply_error(&err);
        }
    }

    async fn route(&self, session: &Arc<Session>, text: &str) -> Result<(), EventError> {
        let envelope = Envelope::parse(text)?;

        // `auth` is always accepted; everything else needs an identity.
        if envelope.event != ClientEventKind::AUTH_TAG && !session.is_authenticated() {
            return Err(EventError::AuthRequired);
        }

        let kind = ClientEventKind::from_tag(&envelope.event)
            .ok_or_else(|| EventError::UnknownEvent(envelope.event.clone()))?;

        match ClientEvent::decode(kind, envelope.data)? {
            ClientEvent::Auth(payload) => self.handle_auth(session, payload).await,
            ClientEvent::SendMessage(payload) => self.handle_send_message(session, payload).await,
            ClientEvent::Typing(payload) => self.handle_typing(session, payload).await,
            ClientEvent::AddReaction(payload) => self.handle_add_reaction(session, payload).await,
            ClientEvent::MarkRead(payload) => self.handle_mark_read(session, payload).await,
        }
    }

    async fn handle_auth(&self, session: &Arc<Session>, payload: AuthPayload) -> Result<(), EventError> {
        if payload.token.is_empty() {
            return Err(EventError::TokenRequired);
        }

        let user = self
            .backend
            .validate_credential(&payload.token)
            .await
            .map_err(|e| {
                tracing::info!(session_id = %session.id(), %e, "auth failed");
                EventError::AuthFailed(e)
            })?;

        if session.set_identity(user.clone(), payload.token) == IdentityUpdate::Conflict {
            return Err(EventError::IdentityConflict);
        }
        self.registry.register(session).await;

        session.enqueue(
            EventName::AUTH_SUCCESS,
            &AuthSuccessPayload {
                user_id: user.id,
                name: &user.name,
                phone: &user.phone,
            },
        );
        tracing::info!(session_id = %session.id(), user_id = user.id, name = %user.name, "user authenticated");
        Ok(())
    }

    async fn handle_send_message(
        &self,
        session: &Arc<Session>,
        payload: SendMessagePayload,
    ) -> Result<(), EventError> {
        if payload.chat_id <= 0 {
            return Err(EventError::InvalidChatId);
        }
        let token = session.credential().ok_or(EventError::AuthRequired)?;

        let created = self
            .backend
            .forward_message(&token, &payload)
            .await
            .map_err(|e| {
                tracing::warn!(session_id = %session.id(), chat_id = payload.chat_id, %e, "send message failed");
                EventError::backend("send message", e)
            })?;

        self.registry
            .broadcast_to_chat_members(payload.chat_id, EventName::NEW_MESSAGE, &created, None)
            .await;
        Ok(())
    }

    async fn handle_typing(&self, session: &Arc<Session>, payload: TypingPayload) -> Result<(), EventError> {
        let user = session.user().ok_or(EventError::AuthRequired)?;
        let typing = UserTypingPayload {
            chat_id: payload.chat_id,
            user_id: user.id,
            name: &user.name,
            is_typing: payload.is_typing,
        };

        self.registry
            .broadcast_to_chat_members(payload.chat_id, EventName::USER_TYPING, &typing, Some(user.id))
            .await;
        Ok(())
    }

    /// Reactions are confirmed to the sender only: the chat a message belongs
    /// to is not known at this layer, so there is no membership to fan out to.
    async fn handle_add_reaction(
        &self,
        session: &Arc<Session>,
        payload: AddReactionPayload,
    ) -> Result<(), EventError> {
        let user = session.user().ok_or(EventError::AuthRequired)?;
        let token = session.credential().ok_or(EventError::AuthRequired)?;

        self.backend
            .forward_reaction(&token, payload.message_id, &payload.emoji)
            .await
            .map_err(|e| {
                tracing::warn!(session_id = %session.id(), message_id = payload.message_id, %e, "add reaction failed");
                EventError::backend("add reaction", e)
            })?;

        session.enqueue(
            EventName::NEW_REACTION,
            &NewReactionPayload {
                message_id: payload.message_id,
                user_id: user.id,
                name: &user.name,
                emoji: &payload.emoji,
            },
        );
        Ok(())
    }

    /// Read receipts are confirmed to the sender only, same as reactions.
    async fn handle_mark_read(&self, session: &Arc<Session>, payload: MarkReadPayload) -> Result<(), EventError> {
        let user = session.user().ok_or(EventError::AuthRequired)?;
        let token = session.credential().ok_or(EventError::AuthRequired)?;

        self.backend
            .forward_read_receipt(&token, &payload.message_ids)
            .await
            .map_err(|e| {
                tracing::warn!(session_id = %session.id(), %e, "mark as read failed");
                EventError::backend("mark as read", e)
            })?;

        session.enqueue(
            EventName::MESSAGE_READ,
            &MessageReadPayload {
                message_ids: &payload.message_ids,
                user_id: user.id,
                name: &user.name,
            },
        );
        Ok(())
    }
}
