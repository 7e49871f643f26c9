//! chatsession server library
//!
//! An observable session store (chat history, validated email, name) and the
//! HTTP/WebSocket host that lets UI clients dispatch transitions and follow
//! state changes.

pub mod config;
pub mod email;
pub mod protocol;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use email::EmailPolicy;
pub use protocol::{ClientMessage, ServerMessage};
pub use server::{AppState, api_routes, ws_handler};
pub use session::{
    ChatMessage, Session, SessionManager, SessionSnapshot, SessionStore, StateChange, Transition,
};
