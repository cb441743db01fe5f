/// Friend search and new-conversation drafts
use crate::api::{ChatApi, CreateConversationRequest};
use crate::chat_types::{ConversationKind, Friend};
use crate::error::{Result, SyncError};
use std::collections::HashSet;

/// One friend-page request; results for an outdated query are discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendQuery {
    pub keyword: Option<String>,
    pub page: u32,
    generation: u64,
}

/// Paged friend search results plus the current selection
#[derive(Debug)]
pub struct FriendDirectory {
    page_size: usize,
    keyword: Option<String>,
    friends: Vec<Friend>,
    page: u32,
    has_more: bool,
    generation: u64,
    selected: Vec<String>,
}

impl FriendDirectory {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            keyword: None,
            friends: Vec::new(),
            page: 0,
            has_more: true,
            generation: 0,
            selected: Vec::new(),
        }
    }

    /// Start a new search; results restart at page 1
    pub fn search(&mut self, keyword: &str) -> FriendQuery {
        let keyword = keyword.trim();
        self.keyword = (!keyword.is_empty()).then(|| keyword.to_string());
        self.generation += 1;
        self.friends.clear();
        self.page = 0;
        self.has_more = true;
        FriendQuery {
            keyword: self.keyword.clone(),
            page: 1,
            generation: self.generation,
        }
    }

    /// Query for the page after the last one applied, while more exist
    pub fn next_query(&self) -> Option<FriendQuery> {
        self.has_more.then(|| FriendQuery {
            keyword: self.keyword.clone(),
            page: self.page + 1,
            generation: self.generation,
        })
    }

    /// Merge a fetched page. Returns false for a stale query.
    pub fn apply_page(&mut self, query: &FriendQuery, items: Vec<Friend>) -> bool {
        if query.generation != self.generation {
            return false;
        }
        self.has_more = items.len() == self.page_size;
        if query.page <= 1 {
            self.friends.clear();
        }
        let mut seen: HashSet<String> = self.friends.iter().map(|f| f.user_id.clone()).collect();
        for friend in items {
            if seen.insert(friend.user_id.clone()) {
                self.friends.push(friend);
            }
        }
        self.page = query.page;
        true
    }

    pub async fn load(&mut self, api: &dyn ChatApi, query: &FriendQuery) -> Result<bool> {
        let items = api
            .list_friends(query.page, self.page_size, query.keyword.as_deref())
            .await?;
        Ok(self.apply_page(query, items))
    }

    /// Select or deselect a friend for the draft
    pub fn toggle(&mut self, user_id: &str) {
        if let Some(idx) = self.selected.iter().position(|id| id == user_id) {
            self.selected.remove(idx);
        } else {
            self.selected.push(user_id.to_string());
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    pub fn friends(&self) -> &[Friend] {
        &self.friends
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn display_name(&self, user_id: &str) -> Option<&str> {
        self.friends
            .iter()
            .find(|f| f.user_id == user_id)
            .map(|f| f.display_name.as_str())
    }
}

/// A conversation about to be created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationDraft {
    pub kind: ConversationKind,
    /// Required for groups; direct conversations are named after the friend
    pub name: String,
    pub members: Vec<String>,
}

impl ConversationDraft {
    pub fn direct(friend_id: &str) -> Self {
        Self {
            kind: ConversationKind::Direct,
            name: String::new(),
            members: vec![friend_id.to_string()],
        }
    }

    pub fn group(name: &str, members: Vec<String>) -> Self {
        Self {
            kind: ConversationKind::Group,
            name: name.to_string(),
            members,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.kind {
            ConversationKind::Direct if self.members.len() != 1 => Err(SyncError::Validation(
                "Please select one friend for personal chat".to_string(),
            )),
            ConversationKind::Group if self.name.trim().is_empty() || self.members.is_empty() => {
                Err(SyncError::Validation(
                    "Please provide group name and select at least one friend".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Validate and build the create request. Direct conversations take the
    /// friend's display name when known, else the user id.
    pub fn to_request(&self, directory: Option<&FriendDirectory>) -> Result<CreateConversationRequest> {
        self.validate()?;
        let name = match self.kind {
            ConversationKind::Group => self.name.trim().to_string(),
            ConversationKind::Direct => {
                let friend_id = &self.members[0];
                directory
                    .and_then(|d| d.display_name(friend_id))
                    .map(str::to_string)
                    .unwrap_or_else(|| friend_id.clone())
            }
        };
        Ok(CreateConversationRequest {
            name,
            members: self.members.clone(),
            kind: self.kind,
        })
    }
}
