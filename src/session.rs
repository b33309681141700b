//! Chat sessions, newest first, mirrored to a [`KeyValueStore`].
//!
//! A temporary session lives beside the saved list and never reaches storage.

use anyhow::{anyhow, Result};

use crate::state::{ChatMessage, ChatRole, Session, TEMPORARY_SESSION_ID};
use crate::storage::{KeyValueStore, SELECTED_MODEL_KEY, SESSIONS_KEY};

/// How many trailing messages are sent upstream with each request.
pub const MAX_CONTEXT_MESSAGES: usize = 10;

const TITLE_LENGTH: usize = 25;

pub struct SessionStore<S: KeyValueStore> {
    storage: S,
    sessions: Vec<Session>,
    active_id: String,
    temporary: Option<Session>,
}

/// First 25 characters of `text`, with `...` appended when it was longer.
pub fn title_from_first_message(text: &str) -> String {
    let mut title: String = text.chars().take(TITLE_LENGTH).collect();
    if text.chars().count() > TITLE_LENGTH {
        title.push_str("...");
    }
    title
}

impl<S: KeyValueStore> SessionStore<S> {
    /// Load saved sessions. Creates one when nothing usable is stored.
    pub fn load(storage: S) -> Result<Self> {
        let sessions: Vec<Session> = match storage.get(SESSIONS_KEY) {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("Discarding unreadable saved sessions: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };

        let active_id = sessions.first().map(|s| s.id.clone()).unwrap_or_default();
        let mut store = Self {
            storage,
            sessions,
            active_id,
            temporary: None,
        };

        if store.sessions.is_empty() {
            store.create_session()?;
        }

        tracing::debug!("Loaded {} sessions", store.sessions.len());
        Ok(store)
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn persist(&mut self) -> Result<()> {
        let raw = serde_json::to_string(&self.sessions)?;
        self.storage.set(SESSIONS_KEY, raw)
    }

    /// Start a new saved session at the front of the list and make it active.
    pub fn create_session(&mut self) -> Result<String> {
        self.temporary = None;
        self.insert_session()
    }

    /// Leaves a temporary chat in place.
    fn insert_session(&mut self) -> Result<String> {
        let session = Session::new();
        let id = session.id.clone();
        self.sessions.insert(0, session);
        self.active_id = id.clone();
        self.persist()?;
        Ok(id)
    }

    pub fn list_sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Switch to a saved session. Leaving a temporary chat discards it.
    pub fn select_session(&mut self, id: &str) -> bool {
        if !self.sessions.iter().any(|s| s.id == id) {
            return false;
        }
        self.active_id = id.to_string();
        self.temporary = None;
        true
    }

    pub fn delete_session(&mut self, id: &str) -> Result<()> {
        let Some(index) = self.sessions.iter().position(|s| s.id == id) else {
            return Err(anyhow!("No session with id {}", id));
        };
        self.sessions.remove(index);
        self.persist()?;

        if self.active_id == id {
            match self.sessions.first() {
                Some(next) => self.active_id = next.id.clone(),
                None => {
                    self.insert_session()?;
                }
            }
        }
        Ok(())
    }

    /// Replace the active view with a fresh temporary session.
    pub fn start_temporary(&mut self) {
        self.temporary = Some(Session::temporary());
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary.is_some()
    }

    pub fn active_id(&self) -> &str {
        match &self.temporary {
            Some(session) => &session.id,
            None => &self.active_id,
        }
    }

    pub fn active_session(&self) -> Option<&Session> {
        match &self.temporary {
            Some(session) => Some(session),
            None => self.sessions.iter().find(|s| s.id == self.active_id),
        }
    }

    /// Append to a session, titling it from the first user message.
    pub fn append_message(&mut self, session_id: &str, message: ChatMessage) -> Result<()> {
        let temporary = session_id == TEMPORARY_SESSION_ID;
        let session = if temporary {
            self.temporary.as_mut()
        } else {
            self.sessions.iter_mut().find(|s| s.id == session_id)
        }
        .ok_or_else(|| anyhow!("No session with id {}", session_id))?;

        let titled = message.role == ChatRole::User;
        let first_message = message.content.clone();
        session.push(message);
        if titled && session.messages().len() <= 1 {
            session.title = title_from_first_message(&first_message);
        }

        if temporary {
            return Ok(());
        }
        self.persist()
    }

    /// The most recent messages of the active session, oldest first.
    pub fn context_window(&self) -> &[ChatMessage] {
        let messages = self.active_session().map(|s| s.messages()).unwrap_or_default();
        &messages[messages.len().saturating_sub(MAX_CONTEXT_MESSAGES)..]
    }

    pub fn selected_model(&self) -> Option<String> {
        self.storage.get(SELECTED_MODEL_KEY)
    }

    pub fn set_selected_model(&mut self, model: &str) -> Result<()> {
        self.storage.set(SELECTED_MODEL_KEY, model.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn saved_sessions(store: &SessionStore<MemoryStore>) -> Vec<Session> {
        serde_json::from_str(&store.storage().get(SESSIONS_KEY).unwrap()).unwrap()
    }

    #[test]
    fn load_creates_a_session_when_empty() {
        let store = SessionStore::load(MemoryStore::new()).unwrap();
        assert_eq!(store.list_sessions().len(), 1);
        assert_eq!(store.active_id(), store.list_sessions()[0].id);
        assert_eq!(saved_sessions(&store).len(), 1);
    }

    #[test]
    fn corrupt_sessions_are_treated_as_empty() {
        let mut storage = MemoryStore::new();
        storage.set(SESSIONS_KEY, "not json".to_string()).unwrap();

        let store = SessionStore::load(storage).unwrap();
        assert_eq!(store.list_sessions().len(), 1);
        assert!(store.list_sessions()[0].messages().is_empty());
    }

    #[test]
    fn sessions_survive_reload_and_newest_is_active() {
        let mut store = SessionStore::load(MemoryStore::new()).unwrap();
        let first = store.active_id().to_string();
        store.append_message(&first, ChatMessage::user("hello")).unwrap();
        let second = store.create_session().unwrap();

        let reloaded = SessionStore::load(store.storage().clone()).unwrap();
        let ids: Vec<&str> = reloaded.list_sessions().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![second.as_str(), first.as_str()]);
        assert_eq!(reloaded.active_id(), second);
        assert_eq!(reloaded.list_sessions()[1].messages(), &[ChatMessage::user("hello")]);
    }

    #[test]
    fn new_sessions_go_to_the_front() {
        let mut store = SessionStore::load(MemoryStore::new()).unwrap();
        let older = store.active_id().to_string();
        let newer = store.create_session().unwrap();

        assert_eq!(store.list_sessions()[0].id, newer);
        assert_eq!(store.list_sessions()[1].id, older);
        assert_eq!(store.active_id(), newer);
    }

    #[test]
    fn title_is_truncated_at_25_chars() {
        assert_eq!(title_from_first_message("short"), "short");
        assert_eq!(
            title_from_first_message("exactly twenty-five chars"),
            "exactly twenty-five chars"
        );
        assert_eq!(
            title_from_first_message("this message is definitely too long"),
            "this message is definitel..."
        );
        assert_eq!(title_from_first_message("ñññññññññññññññññññññññññx"), "ñññññññññññññññññññññññññ...");
    }

    #[test]
    fn title_comes_from_the_first_user_message_only() {
        let mut store = SessionStore::load(MemoryStore::new()).unwrap();
        let id = store.active_id().to_string();

        store.append_message(&id, ChatMessage::user("What is Rust?")).unwrap();
        store.append_message(&id, ChatMessage::assistant("A language.")).unwrap();
        store.append_message(&id, ChatMessage::user("Tell me more")).unwrap();

        let session = store.active_session().unwrap();
        assert_eq!(session.title, "What is Rust?");
        assert_eq!(session.messages().len(), 3);
    }

    #[test]
    fn messages_are_append_only() {
        let mut store = SessionStore::load(MemoryStore::new()).unwrap();
        let id = store.active_id().to_string();
        let sent = [
            ChatMessage::user("a"),
            ChatMessage::assistant("b"),
            ChatMessage::user("c"),
        ];
        for message in &sent {
            store.append_message(&id, message.clone()).unwrap();
        }
        assert_eq!(store.active_session().unwrap().messages(), &sent);
    }

    #[test]
    fn context_window_is_the_last_ten_in_order() {
        let mut store = SessionStore::load(MemoryStore::new()).unwrap();
        let id = store.active_id().to_string();
        assert!(store.context_window().is_empty());

        for i in 0..3 {
            store.append_message(&id, ChatMessage::user(format!("m{}", i))).unwrap();
        }
        assert_eq!(store.context_window().len(), 3);

        for i in 3..14 {
            store.append_message(&id, ChatMessage::user(format!("m{}", i))).unwrap();
        }
        let window = store.context_window();
        assert_eq!(window.len(), MAX_CONTEXT_MESSAGES);
        assert_eq!(window[0].content, "m4");
        assert_eq!(window[9].content, "m13");
    }

    #[test]
    fn deleting_the_only_session_creates_exactly_one() {
        let mut store = SessionStore::load(MemoryStore::new()).unwrap();
        let only = store.active_id().to_string();

        store.delete_session(&only).unwrap();

        assert_eq!(store.list_sessions().len(), 1);
        assert_ne!(store.active_id(), only);
        assert!(store.active_session().unwrap().messages().is_empty());
        assert_eq!(saved_sessions(&store).len(), 1);
    }

    #[test]
    fn deleting_the_active_session_falls_back_to_the_newest() {
        let mut store = SessionStore::load(MemoryStore::new()).unwrap();
        let oldest = store.active_id().to_string();
        let middle = store.create_session().unwrap();
        let newest = store.create_session().unwrap();

        store.select_session(&middle);
        store.delete_session(&middle).unwrap();
        assert_eq!(store.active_id(), newest);

        store.delete_session(&oldest).unwrap();
        assert_eq!(store.active_id(), newest);
        assert_eq!(store.list_sessions().len(), 1);
    }

    #[test]
    fn deleting_unknown_session_fails() {
        let mut store = SessionStore::load(MemoryStore::new()).unwrap();
        assert!(store.delete_session("missing").is_err());
    }

    #[test]
    fn temporary_messages_are_never_persisted() {
        let mut store = SessionStore::load(MemoryStore::new()).unwrap();
        let writes = store.storage().writes();

        store.start_temporary();
        assert!(store.is_temporary());
        assert_eq!(store.active_id(), TEMPORARY_SESSION_ID);

        store
            .append_message(TEMPORARY_SESSION_ID, ChatMessage::user("secret"))
            .unwrap();
        store
            .append_message(TEMPORARY_SESSION_ID, ChatMessage::assistant("noted"))
            .unwrap();

        assert_eq!(store.storage().writes(), writes);
        assert_eq!(store.context_window().len(), 2);
        let saved = saved_sessions(&store);
        assert!(saved.iter().all(|s| s.messages().is_empty()));
        assert!(saved.iter().all(|s| !s.is_temporary()));
    }

    #[test]
    fn selecting_a_saved_session_discards_the_temporary_one() {
        let mut store = SessionStore::load(MemoryStore::new()).unwrap();
        let saved = store.active_id().to_string();

        store.start_temporary();
        store
            .append_message(TEMPORARY_SESSION_ID, ChatMessage::user("gone"))
            .unwrap();
        assert!(store.select_session(&saved));

        assert!(!store.is_temporary());
        assert_eq!(store.active_id(), saved);
        assert!(store.context_window().is_empty());
        assert!(!store.select_session("missing"));
    }

    #[test]
    fn deleting_the_last_saved_session_keeps_the_temporary_chat() {
        let mut store = SessionStore::load(MemoryStore::new()).unwrap();
        let only = store.active_id().to_string();

        store.start_temporary();
        store
            .append_message(TEMPORARY_SESSION_ID, ChatMessage::user("still here"))
            .unwrap();
        store.delete_session(&only).unwrap();

        assert!(store.is_temporary());
        assert_eq!(store.active_id(), TEMPORARY_SESSION_ID);
        assert_eq!(store.context_window().len(), 1);
        assert_eq!(store.list_sessions().len(), 1);
        assert_ne!(store.list_sessions()[0].id, only);
    }

    #[test]
    fn selected_model_is_persisted() {
        let mut store = SessionStore::load(MemoryStore::new()).unwrap();
        assert_eq!(store.selected_model(), None);
        store.set_selected_model("openrouter/aurora-alpha").unwrap();
        assert_eq!(store.selected_model().as_deref(), Some("openrouter/aurora-alpha"));
    }
}
