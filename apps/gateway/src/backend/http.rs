//! REST client for the backend API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::gateway::events::SendMessagePayload;
use crate::models::{ChatMember, User};

use super::{BackendError, ChatBackend};

/// Header carrying the shared secret on internal endpoints.
const INTERNAL_KEY_HEADER: &str = "X-Internal-API-Key";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    valid: bool,
    #[serde(default)]
    user: Option<User>,
}

#[derive(Debug, Deserialize)]
struct MembersResponse {
    #[serde(default)]
    members: Vec<ChatMember>,
}

/// `ChatBackend` over HTTP. Internal endpoints authenticate with the shared
/// secret, user-scoped endpoints with the session's bearer token.
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, BackendError> {
        Self::new(
            &config.backend_url,
            &config.internal_api_key,
            config.backend_timeout,
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Pass `resp` through if its status is one of `accepted`, otherwise turn it
/// into the matching `BackendError`.
async fn ensure_status(
    resp: reqwest::Response,
    accepted: &[StatusCode],
) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if accepted.contains(&status) {
        return Ok(resp);
    }

    let body = resp.bytes().await.unwrap_or_default();
    Err(match serde_json::from_slice::<ErrorBody>(&body) {
        Ok(ErrorBody { error }) => BackendError::Rejected(error),
        Err(_) => BackendError::Status(status.as_u16()),
    })
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn validate_credential(&self, token: &str) -> Result<User, BackendError> {
        let resp = self
            .http
            .post(self.url("/api/internal/v1/auth/validate"))
            .header(INTERNAL_KEY_HEADER, &self.api_key)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await?;

        let body: ValidateResponse = ensure_status(resp, &[StatusCode::OK]).await?.json().await?;
        match body {
            ValidateResponse {
                valid: true,
                user: Some(user),
            } => Ok(user),
            _ => Err(BackendError::InvalidToken),
        }
    }

    async fn list_chat_members(&self, chat_id: i64) -> Result<Vec<ChatMember>, BackendError> {
        let resp = self
            .http
            .get(self.url(&format!("/api/internal/v1/chats/{chat_id}/members")))
            .header(INTERNAL_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        let body: MembersResponse = ensure_status(resp, &[StatusCode::OK]).await?.json().await?;
        Ok(body.members)
    }

    async fn forward_message(
        &self,
        token: &str,
        message: &SendMessagePayload,
    ) -> Result<Value, BackendError> {
        let resp = self
            .http
            .post(self.url("/api/v1/messages"))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "chatId": message.chat_id,
                "text": message.text,
                "replyToId": message.reply_to_id,
                "attachmentIds": message.attachment_ids,
            }))
            .send()
            .await?;

        let created = ensure_status(resp, &[StatusCode::OK, StatusCode::CREATED])
            .await?
            .json()
            .await?;
        Ok(created)
    }

    async fn forward_reaction(
        &self,
        token: &str,
        message_id: i64,
        emoji: &str,
    ) -> Result<(), BackendError> {
        let resp = self
            .http
            .post(self.url(&format!("/api/v1/messages/{message_id}/reactions")))
            .bearer_auth(token)
            .json(&serde_json::json!({ "emoji": emoji }))
            .send()
            .await?;

        ensure_status(resp, &[StatusCode::OK, StatusCode::CREATED]).await?;
        Ok(())
    }

    async fn forward_read_receipt(
        &self,
        token: &str,
        message_ids: &[i64],
    ) -> Result<(), BackendError> {
        let resp = self
            .http
            .post(self.url("/api/v1/messages/read"))
            .bearer_auth(token)
            .json(&serde_json::json!({ "messageIds": message_ids }))
            .send()
            .await?;

        ensure_status(resp, &[StatusCode::OK]).await?;
        Ok(())
    }
}
