//! Server configuration
//!
//! Configuration is loaded from environment variables. Unset or unparsable
//! values keep their defaults.

use crate::email::DEFAULT_EMAIL_PATTERN;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,

    /// Session configuration
    pub session: SessionConfig,

    /// Email policy configuration
    pub email: EmailConfig,

    /// Archive configuration
    pub archive: ArchiveConfig,
}

/// Session-related configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum concurrent sessions
    pub max_sessions: usize,
    /// Sessions without a transition for this long are dropped
    pub idle_timeout: Duration,
    /// Broadcast buffer per session
    pub subscriber_capacity: usize,
    /// Default number of chats returned by the history endpoint
    pub history_window: usize,
}

/// Email policy configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub pattern: String,
    pub allowlist: Vec<String>,
}

/// Archive configuration
#[derive(Debug, Clone, Default)]
pub struct ArchiveConfig {
    /// JSON Lines file; archiving is off when unset
    pub path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            session: SessionConfig::default(),
            email: EmailConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1000,
            idle_timeout: Duration::from_secs(30 * 60), // 30 minutes
            subscriber_capacity: 64,
            history_window: 5,
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_EMAIL_PATTERN.to_string(),
            allowlist: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Limits consumed by the session manager
    pub fn to_state_config(&self) -> crate::session::state::SessionConfig {
        crate::session::state::SessionConfig {
            max_sessions: self.max_sessions,
            idle_timeout: self.idle_timeout,
            subscriber_capacity: self.subscriber_capacity,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Server config
        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        // Session config
        if let Some(val) = lookup("MAX_SESSIONS")
            && let Ok(v) = val.parse()
        {
            config.session.max_sessions = v;
        }
        if let Some(val) = lookup("SESSION_IDLE_TIMEOUT_MINS")
            && let Ok(mins) = val.parse::<u64>()
        {
            config.session.idle_timeout = Duration::from_secs(mins.saturating_mul(60));
        }
        if let Some(val) = lookup("SUBSCRIBER_CAPACITY")
            && let Ok(v) = val.parse::<usize>()
            && v > 0
        {
            config.session.subscriber_capacity = v;
        }
        if let Some(val) = lookup("HISTORY_WINDOW")
            && let Ok(v) = val.parse()
        {
            config.session.history_window = v;
        }

        // Email config
        if let Some(pattern) = lookup("EMAIL_PATTERN")
            && !pattern.is_empty()
        {
            config.email.pattern = pattern;
        }
        if let Some(list) = lookup("EMAIL_ALLOWLIST") {
            config.email.allowlist = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        // Archive config
        if let Some(path) = lookup("SESSION_ARCHIVE_PATH")
            && !path.is_empty()
        {
            config.archive.path = Some(PathBuf::from(path));
        }

        config
    }
}
