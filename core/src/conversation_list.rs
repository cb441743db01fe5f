/// Conversation list: paged growth plus recency promotion
use crate::api::ChatApi;
use crate::chat_types::Conversation;
use crate::error::Result;
use std::collections::HashSet;
use tracing::debug;

/// Ordered, duplicate-free list of conversations, most recently active first
#[derive(Debug, Default, Clone)]
pub struct ConversationListStore {
    conversations: Vec<Conversation>,
}

impl ConversationListStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch one page and merge it. Returns `has_more`.
    pub async fn load_page(&mut self, api: &dyn ChatApi, page: u32, page_size: usize) -> Result<bool> {
        let items = api.list_conversations(page, page_size).await?;
        Ok(self.apply_page(page, page_size, items))
    }

    /// Merge a fetched page. Page 1 replaces the list; later pages only
    /// append ids not already present, leaving existing entries untouched.
    pub fn apply_page(&mut self, page: u32, page_size: usize, items: Vec<Conversation>) -> bool {
        let has_more = items.len() == page_size;

        if page <= 1 {
            let mut seen = HashSet::new();
            self.conversations = items.into_iter().filter(|c| seen.insert(c.id.clone())).collect();
        } else {
            let mut seen: HashSet<String> = self.conversations.iter().map(|c| c.id.clone()).collect();
            let before = self.conversations.len();
            for conversation in items {
                if seen.insert(conversation.id.clone()) {
                    self.conversations.push(conversation);
                }
            }
            debug!(
                "Conversation page {}: {} new entries",
                page,
                self.conversations.len() - before
            );
        }

        has_more
    }

    /// Move `conversation` to the head. An existing entry keeps its own
    /// payload; only unseen conversations use the supplied one.
    pub fn upsert_and_promote(&mut self, conversation: Conversation) {
        let entry = match self.position(&conversation.id) {
            Some(idx) => self.conversations.remove(idx),
            None => conversation,
        };
        self.conversations.insert(0, entry);
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.conversations.iter().position(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
    }
}
