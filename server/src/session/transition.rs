use super::state::{ChatMessage, Session};
use serde::{Deserialize, Serialize};

/// Named state transitions, the only way a session is mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    /// Append a message to the chat history
    AddChat { message: ChatMessage },
    /// Record an address that was validated elsewhere
    ValidateEmail { email: String },
    /// Replace the display name
    SetName { name: String },
    /// Restore every field to its default
    ResetSession,
}

impl Transition {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AddChat { .. } => "add_chat",
            Self::ValidateEmail { .. } => "validate_email",
            Self::SetName { .. } => "set_name",
            Self::ResetSession => "reset_session",
        }
    }

    /// Apply in place. Never fails.
    pub(crate) fn apply_to(&self, session: &mut Session) {
        match self {
            Self::AddChat { message } => session.chat_history.push(message.clone()),
            Self::ValidateEmail { email } => {
                session.email_validated = true;
                session.email = email.clone();
            }
            Self::SetName { name } => session.name = name.clone(),
            Self::ResetSession => *session = Session::default(),
        }
    }
}

/// Notification emitted after each applied transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    /// Store revision after the transition
    pub rev: u64,
    pub transition: Transition,
    pub state: Session,
}
