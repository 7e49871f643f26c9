use crate::session::{SessionError, SessionSnapshot, StateChange, Transition};
use serde::{Deserialize, Serialize};

/// Client to Server messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create a new session and attach to it
    CreateSession { seq: u64 },
    /// Attach to an existing session
    AttachSession { session_id: String, seq: u64 },
    /// Apply a transition to the attached session
    Dispatch { transition: Transition, seq: u64 },
    /// Request the current snapshot of the attached session
    GetState { seq: u64 },
    /// Ping for keepalive
    Ping { seq: u64 },
}

/// Server to Client messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session was created and this connection is attached to it
    SessionCreated {
        session_id: String,
        snapshot: SessionSnapshot,
    },
    /// Successfully attached to an existing session
    SessionAttached {
        session_id: String,
        snapshot: SessionSnapshot,
    },
    /// A transition was applied to the attached session
    StateChanged { change: StateChange },
    /// Full state, sent on request or after missed changes
    State { snapshot: SessionSnapshot },
    /// Acknowledgment of client action
    Ack {
        ack_seq: u64,
        status: AckStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Session error
    SessionError { code: ErrorCode, message: String },
    /// Pong response (to client's Ping)
    Pong,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    SessionNotFound,
    InvalidSessionId,
    TooManySessions,
    NotAttached,
    InvalidMessage,
}

impl From<&SessionError> for ErrorCode {
    fn from(e: &SessionError) -> Self {
        match e {
            SessionError::NotFound(_) => ErrorCode::SessionNotFound,
            SessionError::InvalidSessionId(_) => ErrorCode::InvalidSessionId,
            SessionError::TooManySessions(_) => ErrorCode::TooManySessions,
        }
    }
}

impl ClientMessage {
    /// Get the message type name for metrics
    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::CreateSession { .. } => "create_session",
            ClientMessage::AttachSession { .. } => "attach_session",
            ClientMessage::Dispatch { .. } => "dispatch",
            ClientMessage::GetState { .. } => "get_state",
            ClientMessage::Ping { .. } => "ping",
        }
    }
}

impl ServerMessage {
    /// Get the message type name for metrics
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::SessionCreated { .. } => "session_created",
            ServerMessage::SessionAttached { .. } => "session_attached",
            ServerMessage::StateChanged { .. } => "state_changed",
            ServerMessage::State { .. } => "state",
            ServerMessage::Ack { .. } => "ack",
            ServerMessage::SessionError { .. } => "session_error",
            ServerMessage::Pong => "pong",
        }
    }

    pub fn ack(seq: u64) -> Self {
        ServerMessage::Ack {
            ack_seq: seq,
            status: AckStatus::Ok,
            reason: None,
        }
    }

    pub fn reject(seq: u64, reason: impl Into<String>) -> Self {
        ServerMessage::Ack {
            ack_seq: seq,
            status: AckStatus::Rejected,
            reason: Some(reason.into()),
        }
    }
}
