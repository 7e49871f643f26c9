use super::state::{ChatMessage, Session};
use super::transition::{StateChange, Transition};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Handle returned by [`SessionStore::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn Fn(&StateChange) + Send + Sync>;

/// Read-only copy of a store's state at a given revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub rev: u64,
    pub state: Session,
}

/// Owns one [`Session`] and publishes every change to it.
///
/// Transitions take `&mut self`, so there is exactly one writer at a time.
/// Readers either borrow the state, take a snapshot, subscribe to the
/// broadcast channel or register a synchronous observer.
pub struct SessionStore {
    session: Session,
    rev: u64,
    events: broadcast::Sender<StateChange>,
    observers: Vec<(ObserverId, Observer)>,
    next_observer_id: u64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// `capacity` bounds how far a broadcast subscriber may lag
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            session: Session::default(),
            rev: 0,
            events,
            observers: Vec::new(),
            next_observer_id: 0,
        }
    }

    pub fn add_chat(&mut self, message: impl Into<ChatMessage>) -> StateChange {
        self.apply(Transition::AddChat {
            message: message.into(),
        })
    }

    /// Marks the address as validated. No syntax check happens here.
    pub fn validate_email(&mut self, email: impl Into<String>) -> StateChange {
        self.apply(Transition::ValidateEmail {
            email: email.into(),
        })
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> StateChange {
        self.apply(Transition::SetName { name: name.into() })
    }

    pub fn reset_session(&mut self) -> StateChange {
        self.apply(Transition::ResetSession)
    }

    /// Apply a transition and notify every subscriber once
    pub fn apply(&mut self, transition: Transition) -> StateChange {
        transition.apply_to(&mut self.session);
        self.rev += 1;

        let change = StateChange {
            rev: self.rev,
            transition,
            state: self.session.clone(),
        };

        debug!(
            rev = change.rev,
            transition = change.transition.kind(),
            "Applied session transition"
        );

        for (_, observer) in &self.observers {
            observer(&change);
        }
        // No receivers is fine
        let _ = self.events.send(change.clone());

        change
    }

    pub fn state(&self) -> &Session {
        &self.session
    }

    pub fn rev(&self) -> u64 {
        self.rev
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            rev: self.rev,
            state: self.session.clone(),
        }
    }

    pub fn recent_chats(&self, limit: usize) -> Vec<ChatMessage> {
        self.session.recent_chats(limit).to_vec()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    /// Register a callback run synchronously after each transition
    pub fn observe<F>(&mut self, callback: F) -> ObserverId
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_observer_id);
        self.next_observer_id += 1;
        self.observers.push((id, Box::new(callback)));
        id
    }

    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        self.observers.len() != before
    }

    /// Broadcast receivers plus registered observers
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count() + self.observers.len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("session", &self.session)
            .field("rev", &self.rev)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_add_chat_preserves_order() {
        let mut store = SessionStore::new();
        let messages = ["one", "two", "three", "four"];
        for m in messages {
            store.add_chat(m);
        }

        let expected: Vec<ChatMessage> = messages.iter().map(|m| ChatMessage::from(*m)).collect();
        assert_eq!(store.state().chat_history, expected);
    }

    #[test]
    fn test_add_chat_appends_exactly_one() {
        let mut store = SessionStore::new();
        store.add_chat("first");
        let before = store.state().chat_history.clone();

        store.add_chat(serde_json::json!({"question": "q", "answer": "a"}));

        let after = &store.state().chat_history;
        assert_eq!(after.len(), before.len() + 1);
        assert_eq!(&after[..before.len()], &before[..]);
        assert_eq!(
            after.last().unwrap().as_value(),
            &serde_json::json!({"question": "q", "answer": "a"})
        );
    }

    #[test]
    fn test_validate_email_sets_both_fields() {
        let mut store = SessionStore::new();
        store.validate_email("not an address");
        assert!(store.state().email_validated);
        assert_eq!(store.state().email, "not an address");

        store.validate_email("");
        assert!(store.state().email_validated);
        assert_eq!(store.state().email, "");
    }

    #[test]
    fn test_set_name_overwrites() {
        let mut store = SessionStore::new();
        store.set_name("Ada");
        store.set_name("Grace");
        assert_eq!(store.state().name, "Grace");
    }

    #[test]
    fn test_reset_after_any_sequence_restores_defaults() {
        let mut store = SessionStore::new();
        store.add_chat("hi");
        store.set_name("Ada");
        store.validate_email("ada@example.com");
        store.add_chat("bye");

        store.reset_session();
        assert_eq!(store.state(), &Session::default());
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut store = SessionStore::new();
        store.add_chat("hi");
        store.reset_session();
        let once = store.state().clone();
        store.reset_session();
        assert_eq!(store.state(), &once);
        assert!(store.state().is_pristine());
    }

    #[test]
    fn test_scenario_from_initial_state() {
        let mut store = SessionStore::new();
        store.add_chat("hi");
        store.add_chat("there");
        assert_eq!(
            store.state().chat_history,
            vec![ChatMessage::from("hi"), ChatMessage::from("there")]
        );

        store.validate_email("a@b.com");
        assert!(store.state().email_validated);
        assert_eq!(store.state().email, "a@b.com");

        store.reset_session();
        let state = store.state();
        assert!(state.chat_history.is_empty());
        assert!(!state.email_validated);
        assert_eq!(state.email, "");
        assert_eq!(state.name, "");
    }

    #[test]
    fn test_revision_increments_per_transition() {
        let mut store = SessionStore::new();
        assert_eq!(store.rev(), 0);
        assert_eq!(store.add_chat("a").rev, 1);
        assert_eq!(store.set_name("n").rev, 2);
        assert_eq!(store.reset_session().rev, 3);
        assert_eq!(store.snapshot().rev, 3);
    }

    #[test]
    fn test_observers_notified_in_order() {
        let mut store = SessionStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        store.observe(move |change| {
            sink.lock().unwrap().push((change.rev, change.transition.kind()));
        });

        store.add_chat("hi");
        store.validate_email("a@b.com");
        store.reset_session();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, "add_chat"), (2, "validate_email"), (3, "reset_session")]
        );
    }

    #[test]
    fn test_unobserve_stops_notifications() {
        let mut store = SessionStore::new();
        let count = Arc::new(Mutex::new(0));

        let sink = count.clone();
        let id = store.observe(move |_| *sink.lock().unwrap() += 1);
        store.set_name("a");
        assert!(store.unobserve(id));
        assert!(!store.unobserve(id));
        store.set_name("b");

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_subscriber_receives_new_state() {
        let mut store = SessionStore::new();
        let mut rx = store.subscribe();
        assert_eq!(store.subscriber_count(), 1);

        store.add_chat("hi");
        store.set_name("Ada");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.rev, 1);
        assert_eq!(first.state.chat_history, vec![ChatMessage::from("hi")]);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.rev, 2);
        assert_eq!(second.state.name, "Ada");
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_told_it_lagged() {
        let mut store = SessionStore::with_capacity(2);
        let mut rx = store.subscribe();

        for i in 0..5 {
            store.add_chat(format!("m{i}"));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[test]
    fn test_recent_chats_returns_tail() {
        let mut store = SessionStore::new();
        for i in 0..6 {
            store.add_chat(format!("m{i}"));
        }
        assert_eq!(
            store.recent_chats(2),
            vec![ChatMessage::from("m4"), ChatMessage::from("m5")]
        );
    }
}
