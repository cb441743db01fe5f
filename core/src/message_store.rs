/// Message buffer for the active conversation
use crate::api::ChatApi;
use crate::chat_types::Message;
use crate::error::Result;
use std::collections::HashSet;
use tracing::debug;

/// Identifies one load issued by `begin_load`; completions carrying an
/// outdated ticket are stale and get dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub conversation_id: String,
    pub generation: u64,
}

/// Ordered, duplicate-free messages of the active conversation
#[derive(Debug, Default)]
pub struct MessageStore {
    conversation_id: Option<String>,
    messages: Vec<Message>,
    ids: HashSet<String>,
    generation: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to `conversation_id`: discard the buffer and issue a new ticket
    pub fn begin_load(&mut self, conversation_id: &str) -> LoadTicket {
        self.generation += 1;
        self.conversation_id = Some(conversation_id.to_string());
        self.messages.clear();
        self.ids.clear();
        LoadTicket {
            conversation_id: conversation_id.to_string(),
            generation: self.generation,
        }
    }

    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.generation == self.generation
            && self.conversation_id.as_deref() == Some(ticket.conversation_id.as_str())
    }

    /// Fetch and store the most recent page of `conversation_id`
    pub async fn load_initial(
        &mut self,
        api: &dyn ChatApi,
        conversation_id: &str,
        page_size: usize,
    ) -> Result<()> {
        let ticket = self.begin_load(conversation_id);
        let page = api.list_messages(conversation_id, 1, page_size).await?;
        self.replace(&ticket, page);
        Ok(())
    }

    /// Install a newest-first page fetched for `ticket`, in ascending order.
    ///
    /// Pushes that arrived after `begin_load` but are missing from the page
    /// stay at the tail. Returns false if the ticket is stale.
    pub fn replace(&mut self, ticket: &LoadTicket, mut newest_first: Vec<Message>) -> bool {
        if !self.is_current(ticket) {
            debug!(
                "Dropping stale message page for {} (generation {})",
                ticket.conversation_id, ticket.generation
            );
            return false;
        }

        newest_first.reverse();
        let early_pushes = std::mem::take(&mut self.messages);
        self.ids.clear();

        for mut msg in newest_first.into_iter().chain(early_pushes) {
            if msg.conversation_id.is_empty() {
                msg.conversation_id = ticket.conversation_id.clone();
            }
            if self.ids.insert(msg.id.clone()) {
                self.messages.push(msg);
            }
        }
        true
    }

    /// Tail-insert an optimistic message before the network confirms it
    pub fn append_local_echo(&mut self, message: Message) {
        if self.ids.insert(message.id.clone()) {
            self.messages.push(message);
        }
    }

    /// Tail-insert a realtime message unless its id is already buffered or it
    /// belongs to another conversation. Returns whether it was inserted.
    pub fn ingest_push(&mut self, mut message: Message) -> bool {
        let Some(active) = self.conversation_id.as_deref() else {
            return false;
        };
        if message.conversation_id.is_empty() {
            message.conversation_id = active.to_string();
        } else if message.conversation_id != active {
            debug!(
                "Ignoring push for {} while {} is active",
                message.conversation_id, active
            );
            return false;
        }
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Supersede the echo `local_id` after a successful send.
    ///
    /// With a server copy, the echo takes the server id in place (or is
    /// dropped if a push with that id already arrived). Without one, the
    /// echo is only marked delivered. Returns false if the echo is gone.
    pub fn confirm_echo(&mut self, local_id: &str, confirmed: Option<Message>) -> bool {
        let Some(idx) = self.messages.iter().position(|m| m.id == local_id) else {
            return false;
        };

        match confirmed {
            Some(mut server_copy) => {
                self.ids.remove(local_id);
                if self.ids.contains(&server_copy.id) {
                    self.messages.remove(idx);
                } else {
                    let echo = &self.messages[idx];
                    if server_copy.conversation_id.is_empty() {
                        server_copy.conversation_id = echo.conversation_id.clone();
                    }
                    // Keep the client timestamp so the tail stays ordered
                    server_copy.created_at = server_copy.created_at.max(echo.created_at);
                    server_copy.delivered = true;
                    self.ids.insert(server_copy.id.clone());
                    self.messages[idx] = server_copy;
                }
            }
            None => {
                self.messages[idx].delivered = true;
            }
        }
        true
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Forget the active conversation (logout)
    pub fn clear(&mut self) {
        self.generation += 1;
        self.conversation_id = None;
        self.messages.clear();
        self.ids.clear();
    }
}
