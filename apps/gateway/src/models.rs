//! Records the gateway receives from the backend.

use serde::{Deserialize, Serialize};

/// An authenticated chat user, as resolved from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub active: bool,
}

/// One member of a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMember {
    pub user_id: i64,
    pub name: String,
}
