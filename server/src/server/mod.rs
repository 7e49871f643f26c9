//! Network host for session stores
//!
//! - `AppState` shared by every handler
//! - HTTP routes for sessions, transitions and email checks
//! - WebSocket handler that streams state changes to attached clients

pub mod routes;
pub mod websocket;

use crate::email::EmailPolicy;
use crate::session::SessionManager;
use std::sync::Arc;

pub use routes::api_routes;
pub use websocket::{Connection, ConnectionRegistry, ws_handler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub session_manager: SessionManager,
    pub email_policy: Arc<EmailPolicy>,
    pub connections: ConnectionRegistry,
    /// Default chat count for the history endpoint
    pub history_window: usize,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            session_manager: SessionManager::new(),
            email_policy: Arc::new(EmailPolicy::default()),
            connections: ConnectionRegistry::default(),
            history_window: 5,
        }
    }

    pub fn with_session_manager(mut self, manager: SessionManager) -> Self {
        self.session_manager = manager;
        self
    }

    pub fn with_email_policy(mut self, policy: EmailPolicy) -> Self {
        self.email_policy = Arc::new(policy);
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// (active sessions, open WebSocket connections)
    pub async fn get_stats(&self) -> (usize, usize) {
        let sessions = self.session_manager.session_count().await;
        let connections = self.connections.read().await.len();
        (sessions, connections)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
