//! Session state, its store, and the registry of live stores

pub mod archive;
pub mod manager;
pub mod state;
pub mod store;
pub mod transition;

pub use archive::{ArchiveError, ArchiveRecord, SessionArchive};
pub use manager::{SessionError, SessionManager};
pub use state::{ChatMessage, Session, SessionId};
pub use store::{ObserverId, SessionSnapshot, SessionStore};
pub use transition::{StateChange, Transition};
