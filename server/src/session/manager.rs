use crate::session::archive::SessionArchive;
use crate::session::state::{
    ChatMessage, SessionConfig, SessionId, generate_session_id, now_millis, validate_session_id,
};
use crate::session::store::{SessionSnapshot, SessionStore};
use crate::session::transition::{StateChange, Transition};
use metrics::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};

/// Session manager errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("Too many active sessions (max {0})")]
    TooManySessions(usize),
}

/// A live store plus bookkeeping
struct SessionEntry {
    store: SessionStore,
    created_at: u64,
    last_active_at: u64,
}

type SharedEntry = Arc<Mutex<SessionEntry>>;

/// Registry of live session stores, one per UI instance.
///
/// The map lock is only held to look up, insert or remove entries. Each
/// session has its own lock, so archiving one session never stalls another.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<SessionId, SharedEntry>>>,
    config: SessionConfig,
    archive: Option<SessionArchive>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
            archive: None,
        }
    }

    /// Archive chat histories before they are reset, expired or removed
    pub fn with_archive(mut self, archive: SessionArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a new session with default state
    pub async fn create_session(&self) -> Result<(SessionId, SessionSnapshot), SessionError> {
        let mut sessions = self.sessions.write().await;

        if sessions.len() >= self.config.max_sessions {
            warn!(
                "Rejecting new session: {} sessions active",
                self.config.max_sessions
            );
            return Err(SessionError::TooManySessions(self.config.max_sessions));
        }

        let mut session_id = generate_session_id();
        while sessions.contains_key(&session_id) {
            session_id = generate_session_id();
        }

        let now = now_millis();
        let store = SessionStore::with_capacity(self.config.subscriber_capacity);
        let snapshot = store.snapshot();
        sessions.insert(
            session_id.clone(),
            Arc::new(Mutex::new(SessionEntry {
                store,
                created_at: now,
                last_active_at: now,
            })),
        );

        counter!("chatsession_sessions_created_total").increment(1);
        info!("Created session {}", session_id);

        Ok((session_id, snapshot))
    }

    /// Look up a session's entry, holding the map lock only for the lookup
    async fn entry(&self, session_id: &str) -> Result<SharedEntry, SessionError> {
        check_session_id(session_id)?;
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Apply a transition to a session
    pub async fn dispatch(
        &self,
        session_id: &str,
        transition: Transition,
    ) -> Result<StateChange, SessionError> {
        let entry = self.entry(session_id).await?;
        let start = Instant::now();
        let kind = transition.kind();

        // Archive and reset happen under this session's lock only
        let mut entry = entry.lock().await;
        if matches!(transition, Transition::ResetSession) {
            self.archive_history(session_id, &entry).await;
        }

        let change = entry.store.apply(transition);
        entry.last_active_at = now_millis();

        counter!("chatsession_transitions_total", "transition" => kind).increment(1);
        histogram!("chatsession_dispatch_duration_seconds").record(start.elapsed());
        debug!(
            "Session {} applied {} (rev {})",
            session_id, kind, change.rev
        );

        Ok(change)
    }

    /// Get session snapshot
    pub async fn get_session(&self, session_id: &str) -> Result<SessionSnapshot, SessionError> {
        let entry = self.entry(session_id).await?;
        let entry = entry.lock().await;
        Ok(entry.store.snapshot())
    }

    /// Last `limit` chat messages of a session
    pub async fn recent_chats(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, SessionError> {
        let entry = self.entry(session_id).await?;
        let entry = entry.lock().await;
        Ok(entry.store.recent_chats(limit))
    }

    /// Subscribe to a session's changes, together with the snapshot they start after
    pub async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<(SessionSnapshot, broadcast::Receiver<StateChange>), SessionError> {
        let entry = self.entry(session_id).await?;
        // Both taken under the session lock so no change falls between them
        let entry = entry.lock().await;
        Ok((entry.store.snapshot(), entry.store.subscribe()))
    }

    /// Archive and drop a session. Subscribers see their channel close.
    pub async fn remove_session(&self, session_id: &str) -> Result<(), SessionError> {
        check_session_id(session_id)?;
        let entry = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        let entry = entry.lock().await;
        self.archive_history(session_id, &entry).await;
        info!(
            "Removed session {} after {} ms",
            session_id,
            now_millis().saturating_sub(entry.created_at)
        );
        Ok(())
    }

    /// Archive and remove sessions idle for longer than the configured timeout
    pub async fn cleanup_idle(&self) -> usize {
        let now = now_millis();
        let idle_ms = self.config.idle_timeout.as_millis() as u64;

        let expired: Vec<(SessionId, SharedEntry)> = {
            let mut sessions = self.sessions.write().await;
            // A session whose lock is held is in use, so not idle
            let ids: Vec<SessionId> = sessions
                .iter()
                .filter(|(_, entry)| {
                    entry
                        .try_lock()
                        .is_ok_and(|e| now.saturating_sub(e.last_active_at) > idle_ms)
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        for (id, entry) in &expired {
            info!("Removing idle session: {}", id);
            let entry = entry.lock().await;
            self.archive_history(id, &entry).await;
            counter!("chatsession_sessions_expired_total").increment(1);
        }

        expired.len()
    }

    /// Get count of active sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Write the session's chat history to the archive, if one is configured.
    /// Failures are logged; the caller carries on.
    async fn archive_history(&self, session_id: &str, entry: &SessionEntry) {
        let Some(archive) = &self.archive else {
            return;
        };
        match archive.archive(session_id, entry.store.state()).await {
            Ok(0) => {}
            Ok(_) => counter!("chatsession_sessions_archived_total").increment(1),
            Err(e) => warn!("Failed to archive session {}: {}", session_id, e),
        }
    }

    #[cfg(test)]
    async fn backdate(&self, session_id: &str, millis: u64) {
        if let Ok(entry) = self.entry(session_id).await {
            let mut entry = entry.lock().await;
            entry.last_active_at = entry.last_active_at.saturating_sub(millis);
        }
    }

    #[cfg(test)]
    async fn hold_session(&self, session_id: &str) -> tokio::sync::OwnedMutexGuard<SessionEntry> {
        self.entry(session_id).await.unwrap().lock_owned().await
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn check_session_id(session_id: &str) -> Result<(), SessionError> {
    if validate_session_id(session_id) {
        Ok(())
    } else {
        Err(SessionError::InvalidSessionId(session_id.to_string()))
    }
}
