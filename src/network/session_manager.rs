use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::network::message::{Message, SessionId};
use crate::network::options::SendCallback;
use crate::network::session::Session;
use crate::{AppError, AppResult};

/// Registry of live sessions plus the session-id allocator.
///
/// Ids start at 1 and are never reused within a process lifetime. The map is
/// sharded, so lookups from the acceptor and from user code do not serialize
/// behind one lock.
pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<Session>>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn gen_session_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add(&self, session: Arc<Session>) {
        self.sessions.insert(session.id(), session);
    }

    /// Closes the session and removes it from the registry.
    pub async fn remove(&self, session_id: SessionId) {
        if let Some((_, session)) = self.sessions.remove(&session_id) {
            session.close().await;
        }
    }

    /// Drops the registry entry without driving the close sequence; used by
    /// a session that is already closing itself.
    pub(crate) fn detach(&self, session_id: SessionId) {
        self.sessions.remove(&session_id);
    }

    pub fn lookup(&self, session_id: SessionId) -> AppResult<Arc<Session>> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.value().clone())
            .ok_or(AppError::SessionNotFound(session_id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub async fn send(&self, session_id: SessionId, message: Message) -> AppResult<()> {
        self.lookup(session_id)?.send(message).await
    }

    pub async fn send_callback(
        &self,
        session_id: SessionId,
        message: Message,
        callback: SendCallback,
    ) -> AppResult<()> {
        self.lookup(session_id)?
            .send_callback(message, callback)
            .await
    }

    /// Sends to every live session; individual failures are skipped.
    pub async fn send_all(&self, message: Message) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for session in sessions {
            if let Err(e) = session.send(message.clone()).await {
                debug!(session_id = session.id(), "send_all skipped: {}", e);
            }
        }
    }

    /// Closes every session and clears the registry.
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for session in sessions {
            session.close().await;
        }
        self.sessions.clear();
    }
}
