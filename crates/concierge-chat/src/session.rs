//! In-memory conversation sessions with inactivity expiry.
//!
//! A session is active while `now - last_activity < timeout`. Expired
//! sessions are deleted the moment any accessor sees them, and a background
//! sweep reclaims the ones nobody touches again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use concierge_core::config::SessionConfig;
use concierge_core::{
    duration_from_secs, ChatRole, Clock, ConversationSession, HistoryEntry, SessionMessage,
};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ChatError;

/// Aggregate counters over live sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub total_messages: usize,
}

/// Process-wide store of conversation sessions.
pub struct ConversationSessionStore {
    sessions: Mutex<HashMap<String, ConversationSession>>,
    timeout: Duration,
    max_messages: usize,
    clock: Arc<dyn Clock>,
}

impl ConversationSessionStore {
    pub fn new(timeout: Duration, max_messages: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout,
            max_messages,
            clock,
        }
    }

    pub fn from_config(config: &SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            duration_from_secs(config.timeout_secs),
            config.max_messages,
            clock,
        )
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConversationSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_active(&self, session: &ConversationSession, now: DateTime<Utc>) -> bool {
        now - session.last_activity < self.timeout
    }

    /// Look up a session, deleting it if it has expired.
    fn live_mut<'a>(
        &self,
        sessions: &'a mut HashMap<String, ConversationSession>,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a mut ConversationSession> {
        let expired = match sessions.get(session_id) {
            Some(session) => !self.is_active(session, now),
            None => return None,
        };
        if expired {
            sessions.remove(session_id);
            debug!(session_id, "Expired session removed on access");
            return None;
        }
        sessions.get_mut(session_id)
    }

    /// Allocate a new empty session.
    pub fn create_session(&self, user_id: &str) -> ConversationSession {
        let now = self.clock.now();
        let session = ConversationSession {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            last_activity: now,
            messages: Vec::new(),
        };
        self.lock().insert(session.id.clone(), session.clone());
        debug!(session_id = %session.id, user_id, "Session created");
        session
    }

    /// Resume `session_id` if it is still active, otherwise start fresh.
    pub fn get_or_create_session(
        &self,
        user_id: &str,
        session_id: Option<&str>,
    ) -> ConversationSession {
        if let Some(id) = session_id {
            let now = self.clock.now();
            let mut sessions = self.lock();
            if let Some(session) = self.live_mut(&mut sessions, id, now) {
                session.last_activity = now;
                return session.clone();
            }
        }
        self.create_session(user_id)
    }

    /// Snapshot of an active session.
    pub fn get_session(&self, session_id: &str) -> Option<ConversationSession> {
        let now = self.clock.now();
        let mut sessions = self.lock();
        self.live_mut(&mut sessions, session_id, now)
            .map(|s| s.clone())
    }

    /// Append a message, evicting the oldest past the cap.
    pub fn add_message(
        &self,
        session_id: &str,
        role: ChatRole,
        content: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<SessionMessage, ChatError> {
        let now = self.clock.now();
        let mut sessions = self.lock();
        let session = self
            .live_mut(&mut sessions, session_id, now)
            .ok_or_else(|| ChatError::SessionNotFound(session_id.to_string()))?;

        let message = SessionMessage {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: now,
            metadata,
        };
        session.messages.push(message.clone());
        if session.messages.len() > self.max_messages {
            let excess = session.messages.len() - self.max_messages;
            session.messages.drain(..excess);
        }
        session.last_activity = now;
        Ok(message)
    }

    /// Role/content pairs in chronological order; empty for unknown sessions.
    pub fn get_session_history(&self, session_id: &str) -> Vec<HistoryEntry> {
        self.get_session(session_id)
            .map(|session| {
                session
                    .messages
                    .into_iter()
                    .map(|m| HistoryEntry {
                        role: m.role,
                        content: m.content,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Refresh `last_activity`. Returns false if the session is gone.
    pub fn touch(&self, session_id: &str) -> bool {
        let now = self.clock.now();
        let mut sessions = self.lock();
        match self.live_mut(&mut sessions, session_id, now) {
            Some(session) => {
                session.last_activity = now;
                true
            }
            None => false,
        }
    }

    pub fn delete_session(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }

    /// Active sessions owned by `user_id`, oldest first.
    pub fn user_sessions(&self, user_id: &str) -> Vec<ConversationSession> {
        let now = self.clock.now();
        let mut found: Vec<ConversationSession> = self
            .lock()
            .values()
            .filter(|s| s.user_id == user_id && self.is_active(s, now))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.created_at);
        found
    }

    /// Evict every expired session. Returns how many were removed.
    pub fn cleanup_expired_sessions(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| self.is_active(s, now));
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, remaining = sessions.len(), "Expired sessions cleaned up");
        }
        removed
    }

    /// Counters over sessions that are still active.
    pub fn stats(&self) -> SessionStats {
        let now = self.clock.now();
        self.lock()
            .values()
            .filter(|s| self.is_active(s, now))
            .fold(SessionStats::default(), |mut acc, s| {
                acc.active_sessions += 1;
                acc.total_messages += s.messages.len();
                acc
            })
    }

    /// Run [`cleanup_expired_sessions`](Self::cleanup_expired_sessions) every
    /// `interval` on a background task.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: std::time::Duration) -> CleanupHandle {
        let store = Arc::clone(self);
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        store.cleanup_expired_sessions();
                    }
                    _ = signal.notified() => {
                        debug!("Session cleanup stopped");
                        return;
                    }
                }
            }
        });

        CleanupHandle { shutdown, task }
    }
}

/// Handle to the background session sweep.
pub struct CleanupHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl CleanupHandle {
    /// Stop the sweep and wait for the task to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
