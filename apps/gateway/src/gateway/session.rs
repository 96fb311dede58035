//! Per-connection gateway session state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gateway_common::SessionId;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::EventError;
use crate::models::User;

use super::events::{encode, ErrorPayload, EventName};

/// Default outbound queue capacity per session.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Closed,
}

/// Result of [`Session::set_identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityUpdate {
    /// First successful auth on this connection.
    Set,
    /// Same user authenticated again; the credential was replaced.
    Refreshed,
    /// A different user is already bound to this connection. Nothing changed.
    Conflict,
}

#[derive(Debug)]
struct Identity {
    user: User,
    credential: String,
}

/// State for a single WebSocket connection.
///
/// The socket halves live in the connection's two tasks; everything else
/// reaches the client only through [`Session::enqueue`] and
/// [`Session::push_frame`].
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    /// Sending half of the outbound queue. `None` once closed.
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    identity: RwLock<Option<Identity>>,
    authenticated: AtomicBool,
    closed: AtomicBool,
}

impl Session {
    /// Create a session and the receiving half of its outbound queue.
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let session = Self {
            id: SessionId::generate(),
            outbound: Mutex::new(Some(tx)),
            identity: RwLock::new(None),
            authenticated: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        (Arc::new(session), rx)
    }

    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// Time since the connection was accepted.
    pub fn connected_for(&self) -> Duration {
        self.id.age()
    }

    /// Bind the authenticated user and their bearer credential.
    ///
    /// Concurrent calls are serialized on the identity lock, so readers
    /// always see a matching user/credential pair.
    pub fn set_identity(&self, user: User, credential: String) -> IdentityUpdate {
        let mut identity = self.identity.write();
        let update = match identity.as_ref() {
            None => IdentityUpdate::Set,
            Some(current) if current.user.id == user.id => IdentityUpdate::Refreshed,
            Some(_) => return IdentityUpdate::Conflict,
        };
        *identity = Some(Identity { user, credential });
        self.authenticated.store(true, Ordering::Release);
        update
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SessionState {
        if self.closed.load(Ordering::Acquire) {
            SessionState::Closed
        } else if self.is_authenticated() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    pub fn user(&self) -> Option<User> {
        self.identity.read().as_ref().map(|i| i.user.clone())
    }

    pub fn user_id(&self) -> Option<i64> {
        self.identity.read().as_ref().map(|i| i.user.id)
    }

    pub fn credential(&self) -> Option<String> {
        self.identity.read().as_ref().map(|i| i.credential.clone())
    }

    /// Serialize `{event, data}` and queue it for this client.
    ///
    /// Never blocks: a full or closed queue drops the frame.
    pub fn enqueue<T: Serialize + ?Sized>(&self, event: &str, data: &T) {
        match encode(event, data) {
            Ok(frame) => self.push_frame(frame),
            Err(e) => tracing::error!(?e, session_id = %self.id, %event, "failed to encode frame"),
        }
    }

    /// Queue an already serialized frame. Same drop policy as [`Session::enqueue`].
    pub fn push_frame(&self, frame: String) {
        let outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(frame) {
            tracing::trace!(session_id = %self.id, "outbound queue full, frame dropped");
        }
    }

    /// Send a plain `error` envelope to this client.
    pub fn send_error(&self, message: &str) {
        self.enqueue(EventName::ERROR, &ErrorPayload { message, code: None });
    }

    /// Report a failed event back to this client.
    pub fn reply_error(&self, err: &EventError) {
        let message = err.to_string();
        self.enqueue(
            EventName::ERROR,
            &ErrorPayload {
                message: &message,
                code: err.code(),
            },
        );
    }

    /// Close the outbound queue. The writer drains what is left, sends a
    /// close frame and exits. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.outbound.lock().take();
    }
}
