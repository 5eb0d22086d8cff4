use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use time::macros::format_description;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum Payload {
    Text(String),
    Image(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Message {
    pub fn user_text(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            payload: Payload::Text(content.into()),
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            payload: Payload::Text(content.into()),
        }
    }

    pub fn assistant_image(bytes: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            payload: Payload::Image(bytes),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    created_seq: u64,
    pub messages: Vec<Message>,
}

/// In-memory conversation map plus the active-conversation pointer.
/// Nothing here survives the process; persistence is deliberately absent.
#[derive(Debug, Default)]
pub struct ChatStore {
    conversations: DashMap<String, Conversation>,
    active: Mutex<Option<String>>,
    seq: AtomicU64,
}

fn timestamp_label() -> String {
    let fmt = format_description!("[hour]:[minute]:[second]");
    OffsetDateTime::now_utc().format(&fmt).unwrap_or_default()
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty conversation named after the wall clock and makes
    /// it active. Second-granularity names can repeat, so a counter suffix
    /// keeps identifiers unique within the process run.
    pub fn create_conversation(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let base = format!("Conversa {}", timestamp_label());
        let mut id = base.clone();
        let mut n = 2u64;
        while self.conversations.contains_key(&id) {
            id = format!("{} ({})", base, n);
            n += 1;
        }
        self.conversations.insert(
            id.clone(),
            Conversation {
                id: id.clone(),
                created_seq: seq,
                messages: Vec::new(),
            },
        );
        *self.active.lock().unwrap() = Some(id.clone());
        id
    }

    pub fn set_active(&self, id: &str) -> Result<(), StoreError> {
        if !self.conversations.contains_key(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        *self.active.lock().unwrap() = Some(id.to_string());
        Ok(())
    }

    pub fn active_id(&self) -> Option<String> {
        self.active.lock().unwrap().clone()
    }

    /// The active conversation id, creating a fresh conversation when none
    /// is active (first submission, or right after `clear_all`).
    pub fn active_or_create(&self) -> String {
        let current = self.active.lock().unwrap().clone();
        match current {
            Some(id) if self.conversations.contains_key(&id) => id,
            _ => self.create_conversation(),
        }
    }

    pub fn append(&self, id: &str, message: Message) -> Result<(), StoreError> {
        let mut conversation = self
            .conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        conversation.messages.push(message);
        Ok(())
    }

    pub fn messages(&self, id: &str) -> Result<Vec<Message>, StoreError> {
        self.conversations
            .get(id)
            .map(|c| c.messages.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Identifiers in reverse creation order, most recent first.
    pub fn list_ids(&self) -> Vec<String> {
        let mut entries: Vec<(u64, String)> = self
            .conversations
            .iter()
            .map(|c| (c.created_seq, c.id.clone()))
            .collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        entries.into_iter().map(|(_, id)| id).collect()
    }

    pub fn clear_all(&self) {
        self.conversations.clear();
        *self.active.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_sets_active_and_inserts_empty_conversation() {
        let store = ChatStore::new();
        let id = store.create_conversation();
        assert_eq!(store.active_id().as_deref(), Some(id.as_str()));
        assert!(store.messages(&id).unwrap().is_empty());
    }

    #[test]
    fn ids_are_distinct_even_within_the_same_second() {
        let store = ChatStore::new();
        let mut ids: Vec<String> = (0..50).map(|_| store.create_conversation()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn set_active_unknown_id_leaves_store_unchanged() {
        let store = ChatStore::new();
        let id = store.create_conversation();
        let err = store.set_active("Conversa 99:99:99").unwrap_err();
        assert_eq!(err, StoreError::NotFound("Conversa 99:99:99".to_string()));
        assert_eq!(store.active_id().as_deref(), Some(id.as_str()));
        assert_eq!(store.list_ids().len(), 1);
    }

    #[test]
    fn append_preserves_order_and_grows_by_one() {
        let store = ChatStore::new();
        let id = store.create_conversation();
        store.append(&id, Message::user_text("oi")).unwrap();
        store.append(&id, Message::assistant_text("olá")).unwrap();
        store.append(&id, Message::user_text("tudo bem?")).unwrap();
        let messages = store.messages(&id).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].payload, Payload::Text("oi".into()));
        assert_eq!(messages[1].payload, Payload::Text("olá".into()));
        assert_eq!(messages[2].payload, Payload::Text("tudo bem?".into()));
    }

    #[test]
    fn append_to_unknown_conversation_fails() {
        let store = ChatStore::new();
        let err = store.append("nope", Message::user_text("x")).unwrap_err();
        assert_eq!(err, StoreError::NotFound("nope".to_string()));
    }

    #[test]
    fn list_ids_most_recent_first_and_idempotent() {
        let store = ChatStore::new();
        let a = store.create_conversation();
        let b = store.create_conversation();
        let c = store.create_conversation();
        let first = store.list_ids();
        assert_eq!(first, vec![c.clone(), b.clone(), a.clone()]);
        assert_eq!(store.list_ids(), first);
    }

    #[test]
    fn clear_all_empties_map_and_active() {
        let store = ChatStore::new();
        store.create_conversation();
        store.create_conversation();
        store.clear_all();
        assert!(store.list_ids().is_empty());
        assert_eq!(store.active_id(), None);
    }

    #[test]
    fn active_or_create_recreates_after_clear() {
        let store = ChatStore::new();
        store.create_conversation();
        store.clear_all();
        let id = store.active_or_create();
        assert_eq!(store.active_id().as_deref(), Some(id.as_str()));
        assert_eq!(store.list_ids(), vec![id]);
    }

    #[test]
    fn message_serializes_with_role_type_and_content() {
        let msg = Message::user_text("oi");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "user");
        assert_eq!(v["type"], "text");
        assert_eq!(v["content"], "oi");
    }
}
