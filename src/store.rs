//! Conversation store: the single source of truth for threads and history.
//!
//! Three producers mutate it (stream router, generation manager, session
//! controller); all of them go through `append`/`rewrite_last` so the
//! `last_message_at` bookkeeping and persistence triggers stay consistent.

use std::collections::HashMap;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::models::{Conversation, Message, MessageRole, Snapshot};
use crate::storage::Storage;

/// Title given to synthesized conversations
pub const DEFAULT_TITLE: &str = "New Conversation";

pub struct ConversationStore {
    conversations: HashMap<String, Conversation>,
    current_id: String,
    storage: Box<dyn Storage>,
}

impl ConversationStore {
    /// Hydrate from the persistence collaborator.
    ///
    /// Missing optional fields default during deserialization; an empty
    /// hydrated set synthesizes one default conversation. A persisted
    /// current id that no longer exists falls back to the most recently
    /// active conversation.
    pub fn load(storage: Box<dyn Storage>) -> Self {
        let snapshot = match storage.load() {
            Ok(snapshot) => snapshot.unwrap_or_default(),
            Err(e) => {
                warn!("failed to load conversation snapshot: {e:#}");
                Snapshot::default()
            }
        };

        let mut store = Self {
            conversations: snapshot.chats,
            current_id: String::new(),
            storage,
        };

        if store.conversations.is_empty() {
            let conv = Conversation::new(new_conversation_id(), DEFAULT_TITLE);
            store.current_id = conv.id.clone();
            store.conversations.insert(conv.id.clone(), conv);
            store.persist();
            return store;
        }

        store.current_id = snapshot
            .current_chat_id
            .filter(|id| store.conversations.contains_key(id))
            .unwrap_or_else(|| store.most_recently_active().expect("non-empty store"));
        store
    }

    pub fn current_id(&self) -> &str {
        &self.current_id
    }

    /// Persist a new current conversation id. Returns false for unknown ids.
    pub fn set_current(&mut self, id: &str) -> bool {
        if !self.conversations.contains_key(id) {
            warn!(conversation_id = %id, "set_current for unknown conversation");
            return false;
        }
        self.current_id = id.to_string();
        self.persist();
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.conversations.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    /// Insert an empty conversation and return its id
    pub fn create(&mut self, title: &str) -> String {
        let conv = Conversation::new(new_conversation_id(), title);
        let id = conv.id.clone();
        self.conversations.insert(id.clone(), conv);
        self.persist();
        id
    }

    /// Push a message, stamp `last_message_at`, trigger a save.
    /// Unknown ids are a logged no-op.
    pub fn append(&mut self, id: &str, role: MessageRole, content: &str) {
        self.append_message(id, Message::new(role, content));
    }

    pub fn append_message(&mut self, id: &str, message: Message) {
        let Some(conv) = self.conversations.get_mut(id) else {
            warn!(conversation_id = %id, "append to unknown conversation");
            return;
        };
        conv.last_message_at = Some(Utc::now());
        conv.messages.push(message);
        self.persist();
    }

    /// Overwrite the content of the most recent message satisfying
    /// `predicate`. Returns whether a message was found.
    pub fn update_last(
        &mut self,
        id: &str,
        predicate: impl Fn(&Message) -> bool,
        new_content: &str,
    ) -> bool {
        self.rewrite_last(id, predicate, |msg| {
            msg.content = new_content.to_string();
        })
    }

    /// Like `update_last` but with full access to the message, so the
    /// generation manager can keep content and structured state in step.
    pub fn rewrite_last(
        &mut self,
        id: &str,
        predicate: impl Fn(&Message) -> bool,
        rewrite: impl FnOnce(&mut Message),
    ) -> bool {
        let Some(conv) = self.conversations.get_mut(id) else {
            warn!(conversation_id = %id, "rewrite_last on unknown conversation");
            return false;
        };
        let Some(msg) = conv.messages.iter_mut().rev().find(|m| predicate(m)) else {
            return false;
        };
        rewrite(msg);
        self.persist();
        true
    }

    /// Remove a conversation. Ownership checks happen in the session
    /// controller; here we only handle reselection: if the removed
    /// conversation was current, the most recently active remaining one
    /// becomes current, or a fresh default is created when none remain.
    pub fn remove(&mut self, id: &str) -> bool {
        if self.conversations.remove(id).is_none() {
            warn!(conversation_id = %id, "remove of unknown conversation");
            return false;
        }

        if self.current_id == id {
            self.current_id = match self.most_recently_active() {
                Some(next) => next,
                None => {
                    let conv = Conversation::new(new_conversation_id(), DEFAULT_TITLE);
                    let next = conv.id.clone();
                    self.conversations.insert(next.clone(), conv);
                    next
                }
            };
        }
        self.persist();
        true
    }

    /// Conversations sorted descending by last activity
    pub fn list(&self) -> Vec<&Conversation> {
        let mut all: Vec<&Conversation> = self.conversations.values().collect();
        all.sort_by(|a, b| b.activity_at().cmp(&a.activity_at()));
        all
    }

    fn most_recently_active(&self) -> Option<String> {
        self.conversations
            .values()
            .max_by_key(|c| c.activity_at())
            .map(|c| c.id.clone())
    }

    fn persist(&self) {
        let snapshot = Snapshot {
            chats: self.conversations.clone(),
            current_chat_id: Some(self.current_id.clone()),
        };
        if let Err(e) = self.storage.save(&snapshot) {
            // In-memory state stays authoritative for the running session
            warn!("failed to persist conversation snapshot: {e:#}");
        }
    }
}

fn new_conversation_id() -> String {
    format!("chat_{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn fresh_store() -> ConversationStore {
        ConversationStore::load(Box::new(MemoryStorage::new()))
    }

    #[test]
    fn test_load_empty_synthesizes_default_conversation() {
        let store = fresh_store();
        assert_eq!(store.list().len(), 1);
        let current = store.get(store.current_id()).unwrap();
        assert_eq!(current.title, DEFAULT_TITLE);
        assert!(current.messages.is_empty());
        assert!(current.last_message_at.is_none());
    }

    #[test]
    fn test_create_and_append() {
        let mut store = fresh_store();
        let id = store.create("Cats");

        store.append(&id, MessageRole::User, "hello");
        let conv = store.get(&id).unwrap();
        assert_eq!(conv.messages.len(), 1);
        assert!(conv.last_message_at.is_some());
    }

    #[test]
    fn test_append_unknown_is_noop() {
        let mut store = fresh_store();
        store.append("nope", MessageRole::User, "hello");
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_update_last_targets_most_recent_match() {
        let mut store = fresh_store();
        let id = store.create("Test");
        store.append(&id, MessageRole::Assistant, "first");
        store.append(&id, MessageRole::User, "question");
        store.append(&id, MessageRole::Assistant, "second");

        let updated = store.update_last(
            &id,
            |m| m.role == MessageRole::Assistant,
            "rewritten",
        );
        assert!(updated);

        let conv = store.get(&id).unwrap();
        assert_eq!(conv.messages[0].content, "first");
        assert_eq!(conv.messages[2].content, "rewritten");
    }

    #[test]
    fn test_update_last_no_match() {
        let mut store = fresh_store();
        let id = store.create("Test");
        store.append(&id, MessageRole::User, "hi");
        assert!(!store.update_last(&id, |m| m.role == MessageRole::Assistant, "x"));
    }

    #[test]
    fn test_list_sorted_by_activity_descending() {
        let mut store = fresh_store();
        let a = store.create("A");
        let b = store.create("B");
        store.append(&a, MessageRole::User, "hello");

        let ids: Vec<&str> = store.list().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids[0], a);
        assert!(ids.contains(&b.as_str()));
    }

    #[test]
    fn test_remove_current_selects_most_recently_active() {
        let mut store = fresh_store();
        let a = store.create("A");
        let b = store.create("B");
        store.append(&b, MessageRole::User, "recent activity");
        store.set_current(&a);

        assert!(store.remove(&a));
        assert_eq!(store.current_id(), b);
    }

    #[test]
    fn test_remove_last_conversation_creates_fresh_default() {
        let mut store = fresh_store();
        let only = store.current_id().to_string();

        assert!(store.remove(&only));
        assert_ne!(store.current_id(), only);
        let current = store.get(store.current_id()).unwrap();
        assert_eq!(current.title, DEFAULT_TITLE);
        assert!(current.messages.is_empty());
    }

    #[test]
    fn test_remove_non_current_keeps_current() {
        let mut store = fresh_store();
        let a = store.create("A");
        let b = store.create("B");
        store.set_current(&a);

        assert!(store.remove(&b));
        assert_eq!(store.current_id(), a);
    }

    #[test]
    fn test_persistence_round_trip_through_storage() {
        let storage = MemoryStorage::new();
        let saved_view;
        {
            let mut store = ConversationStore::load(Box::new(storage));
            let id = store.create("Persisted");
            store.append(&id, MessageRole::User, "hello");
            store.set_current(&id);
            saved_view = (id, store.current_id().to_string());
        }
        assert_eq!(saved_view.0, saved_view.1);
    }

    #[test]
    fn test_load_restores_current_id() {
        let mut snapshot = Snapshot::default();
        let mut conv = Conversation::new("c1", "Restored");
        conv.messages.push(Message::new(MessageRole::User, "hi"));
        snapshot.chats.insert("c1".to_string(), conv);
        snapshot
            .chats
            .insert("c2".to_string(), Conversation::new("c2", "Other"));
        snapshot.current_chat_id = Some("c2".to_string());

        let store = ConversationStore::load(Box::new(MemoryStorage::with_snapshot(snapshot)));
        assert_eq!(store.current_id(), "c2");
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn test_load_with_stale_current_falls_back_to_most_recent() {
        let mut snapshot = Snapshot::default();
        let mut conv = Conversation::new("c1", "Only");
        conv.last_message_at = Some(Utc::now());
        snapshot.chats.insert("c1".to_string(), conv);
        snapshot.current_chat_id = Some("deleted".to_string());

        let store = ConversationStore::load(Box::new(MemoryStorage::with_snapshot(snapshot)));
        assert_eq!(store.current_id(), "c1");
    }

    #[test]
    fn test_storage_failure_keeps_memory_authoritative() {
        let mut storage = MemoryStorage::new();
        storage.fail_saves = true;
        let mut store = ConversationStore::load(Box::new(storage));

        let id = store.create("Unpersisted");
        store.append(&id, MessageRole::User, "still here");
        assert_eq!(store.get(&id).unwrap().messages.len(), 1);
    }
}
