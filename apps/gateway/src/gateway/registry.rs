//! Registry of live sessions, keyed by user.
//!
//! Structural changes (register/unregister) go through one control loop task
//! and are applied one at a time. Fan-out only needs the shared side of the
//! index lock, so any number of broadcasts run concurrently with each other.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::backend::ChatBackend;

use super::events::encode;
use super::session::{Session, SessionState};

/// Capacity of the register/unregister command channel.
const COMMAND_BUFFER: usize = 1024;

/// user id → (session id → session). A user key exists only while its map is
/// non-empty.
type Index = HashMap<i64, HashMap<String, Arc<Session>>>;

enum Command {
    Register {
        session: Arc<Session>,
        done: oneshot::Sender<()>,
    },
    Unregister {
        session: Arc<Session>,
        done: oneshot::Sender<()>,
    },
}

/// Handle to the process-wide session registry. Cheap to clone.
#[derive(Clone)]
pub struct Registry {
    index: Arc<RwLock<Index>>,
    commands: mpsc::Sender<Command>,
    backend: Arc<dyn ChatBackend>,
}

/// The control loop that owns all index mutation. Run it exactly once.
pub struct RegistryLoop {
    index: Arc<RwLock<Index>>,
    commands: mpsc::Receiver<Command>,
}

impl Registry {
    pub fn new(backend: Arc<dyn ChatBackend>) -> (Self, RegistryLoop) {
        let index = Arc::new(RwLock::new(Index::new()));
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let registry = Self {
            index: index.clone(),
            commands: tx,
            backend,
        };
        let control = RegistryLoop {
            index,
            commands: rx,
        };
        (registry, control)
    }

    /// Build a registry and spawn its control loop on the current runtime.
    pub fn spawn(backend: Arc<dyn ChatBackend>) -> Self {
        let (registry, control) = Self::new(backend);
        tokio::spawn(control.run());
        registry
    }

    /// Add an authenticated session under its user. Idempotent. Sessions
    /// that are unauthenticated or already closed are ignored.
    pub async fn register(&self, session: &Arc<Session>) {
        let (done, applied) = oneshot::channel();
        let cmd = Command::Register {
            session: session.clone(),
            done,
        };
        if self.commands.send(cmd).await.is_err() {
            tracing::warn!(session_id = %session.id(), "registry loop stopped, register skipped");
            return;
        }
        let _ = applied.await;
    }

    /// Remove a session and close it. Always closes, even if the session was
    /// never registered.
    pub async fn unregister(&self, session: &Arc<Session>) {
        let (done, applied) = oneshot::channel();
        let cmd = Command::Unregister {
            session: session.clone(),
            done,
        };
        if self.commands.send(cmd).await.is_err() {
            tracing::warn!(session_id = %session.id(), "registry loop stopped, closing session directly");
            session.close();
            return;
        }
        let _ = applied.await;
    }

    /// Deliver `{event, data}` to every live session of every chat member,
    /// skipping `exclude_user_id`.
    ///
    /// Membership is fetched from the backend on every call. If that fails
    /// the broadcast is dropped.
    pub async fn broadcast_to_chat_members<T: Serialize + ?Sized>(
        &self,
        chat_id: i64,
        event: &str,
        data: &T,
        exclude_user_id: Option<i64>,
    ) {
        let frame = match encode(event, data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(?e, %event, "failed to encode broadcast");
                return;
            }
        };

        let members = match self.backend.list_chat_members(chat_id).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(%e, chat_id, %event, "chat member lookup failed, broadcast dropped");
                return;
            }
        };

        let index = self.index.read();
        let mut reached = 0usize;
        for member in members
            .iter()
            .filter(|m| Some(m.user_id) != exclude_user_id)
        {
            if let Some(sessions) = index.get(&member.user_id) {
                for session in sessions.values() {
                    session.push_frame(frame.clone());
                    reached += 1;
                }
            }
        }
        tracing::debug!(chat_id, %event, members = members.len(), sessions = reached, "broadcast");
    }

    /// Deliver `{event, data}` to every live session of one user.
    pub fn send_to_user<T: Serialize + ?Sized>(&self, user_id: i64, event: &str, data: &T) {
        let frame = match encode(event, data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(?e, %event, user_id, "failed to encode user message");
                return;
            }
        };

        let index = self.index.read();
        if let Some(sessions) = index.get(&user_id) {
            for session in sessions.values() {
                session.push_frame(frame.clone());
            }
        }
    }

    /// Number of users with at least one live session.
    pub fn user_count(&self) -> usize {
        self.index.read().len()
    }

    /// Total number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.index.read().values().map(HashMap::len).sum()
    }

    pub fn contains_user(&self, user_id: i64) -> bool {
        self.index.read().contains_key(&user_id)
    }

    /// Live sessions of one user.
    pub fn sessions_for(&self, user_id: i64) -> Vec<Arc<Session>> {
        self.index
            .read()
            .get(&user_id)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl RegistryLoop {
    /// Apply commands until every [`Registry`] handle is dropped.
    pub async fn run(mut self) {
        while let Some(cmd) = self.commands.recv().await {
            match cmd {
                Command::Register { session, done } => {
                    register_session(&self.index, &session);
                    let _ = done.send(());
                }
                Command::Unregister { session, done } => {
                    unregister_session(&self.index, &session);
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!("registry control loop stopped");
    }
}

fn register_session(index: &RwLock<Index>, session: &Arc<Session>) {
    if session.state() != SessionState::Authenticated {
        tracing::debug!(session_id = %session.id(), state = ?session.state(), "register ignored");
        return;
    }
    let Some(user) = session.user() else {
        return;
    };

    let mut index = index.write();
    let sessions = index.entry(user.id).or_default();
    if sessions
        .insert(session.id().to_string(), session.clone())
        .is_none()
    {
        tracing::info!(
            user_id = user.id,
            name = %user.name,
            session_id = %session.id(),
            connections = sessions.len(),
            "user connected"
        );
    }
}

fn unregister_session(index: &RwLock<Index>, session: &Arc<Session>) {
    if let Some(user_id) = session.user_id() {
        let mut index = index.write();
        if let Some(sessions) = index.get_mut(&user_id) {
            if sessions.remove(session.id()).is_some() {
                let remaining = sessions.len();
                if remaining == 0 {
                    index.remove(&user_id);
                }
                tracing::info!(
                    user_id,
                    session_id = %session.id(),
                    remaining,
                    "user disconnected"
                );
            }
        }
    }
    session.close();
}
