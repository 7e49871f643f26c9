use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Session ID: 10-character base32 string (lowercase, a-z + 2-7)
pub type SessionId = String;

/// Charset for session IDs: lowercase base32 (a-z, 2-7) to avoid 0/1 confusion
const SESSION_ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";
const SESSION_ID_LENGTH: usize = 10;

/// Generate a random session ID
pub fn generate_session_id() -> SessionId {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut id = String::with_capacity(SESSION_ID_LENGTH);
    let hasher = RandomState::new();

    for i in 0..SESSION_ID_LENGTH {
        let mut h = hasher.build_hasher();
        h.write_usize(i);
        h.write_u128(Uuid::new_v4().as_u128());

        let idx = (h.finish() as usize) % SESSION_ID_CHARSET.len();
        id.push(SESSION_ID_CHARSET[idx] as char);
    }

    id
}

/// Validation rules
pub fn validate_session_id(id: &str) -> bool {
    if id.len() != SESSION_ID_LENGTH {
        return false;
    }
    id.chars().all(|c| SESSION_ID_CHARSET.contains(&(c as u8)))
}

/// Get current timestamp in milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A single chat entry, kept exactly as the UI host handed it over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatMessage(pub serde_json::Value);

impl ChatMessage {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl From<serde_json::Value> for ChatMessage {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

impl From<&str> for ChatMessage {
    fn from(text: &str) -> Self {
        Self(serde_json::Value::String(text.to_string()))
    }
}

impl From<String> for ChatMessage {
    fn from(text: String) -> Self {
        Self(serde_json::Value::String(text))
    }
}

/// Session-scoped UI state.
///
/// `Default` is the initial state and also what `reset_session` restores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Chat entries in insertion order
    pub chat_history: Vec<ChatMessage>,
    /// Set once some external check accepted `email`
    pub email_validated: bool,
    pub email: String,
    pub name: String,
}

impl Session {
    /// Last `limit` chat entries, oldest first
    pub fn recent_chats(&self, limit: usize) -> &[ChatMessage] {
        let start = self.chat_history.len().saturating_sub(limit);
        &self.chat_history[start..]
    }

    pub fn is_pristine(&self) -> bool {
        *self == Self::default()
    }
}

/// Session lifetime limits used by the manager
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub idle_timeout: Duration,
    pub subscriber_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1000,
            idle_timeout: Duration::from_secs(30 * 60), // 30 minutes
            subscriber_capacity: 64,
        }
    }
}
