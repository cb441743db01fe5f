/// Sync controller: reconciles REST pages and realtime pushes into the
/// conversation list and the active message buffer.
///
/// All state is mutated on one loop. REST calls run as spawned tasks whose
/// results come back as `Completion`s tagged with what they were issued for,
/// so a response that arrives after the user moved on is recognised as stale.
use crate::api::{ChatApi, CreateConversationRequest};
use crate::chat_types::{Conversation, Friend, Message, SyncUpdate, UserProfile};
use crate::config::Config;
use crate::conversation_list::ConversationListStore;
use crate::error::{Result, SyncError};
use crate::friends::{ConversationDraft, FriendDirectory, FriendQuery};
use crate::message_store::{LoadTicket, MessageStore};
use crate::realtime::{
    ConnectionState, InboundEvent, InboundEventKind, OutboundEvent, RealtimeChannel, Subscription,
};
use crate::session::Session;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Requests from the presentation layer
#[derive(Debug, Clone)]
pub enum Command {
    LoadMoreConversations,
    Select(String),
    /// Select the n-th listed conversation (0-based)
    SelectIndex(usize),
    Send(String),
    SearchFriends(String),
    LoadMoreFriends,
    ToggleFriend(String),
    CreateConversation(ConversationDraft),
    /// Create a group from the friends currently selected
    CreateGroupWithSelected(String),
    /// Reopen the realtime channel after it was lost
    Reconnect,
    Logout,
    Shutdown,
}

/// Result of a spawned REST call
enum Completion {
    ConversationPage {
        page: u32,
        result: Result<Vec<Conversation>>,
    },
    Messages {
        ticket: LoadTicket,
        result: Result<Vec<Message>>,
    },
    Sent {
        local_id: String,
        result: Result<Option<Message>>,
    },
    Friends {
        query: FriendQuery,
        result: Result<Vec<Friend>>,
    },
    Created {
        request: CreateConversationRequest,
        result: Result<String>,
    },
}

pub struct SyncController {
    config: Config,
    session: Session,
    user: UserProfile,
    api: Arc<dyn ChatApi>,
    channel: RealtimeChannel,

    conversations: ConversationListStore,
    messages: MessageStore,
    friends: FriendDirectory,
    active: Option<Conversation>,

    /// Conversation pages merged so far
    pages_loaded: u32,
    has_more: bool,
    page_in_flight: bool,

    subscriptions: Vec<Subscription>,
    channel_states: broadcast::Receiver<ConnectionState>,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    inbound_rx: mpsc::UnboundedReceiver<InboundEvent>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    in_flight: usize,

    updates: broadcast::Sender<SyncUpdate>,
    ended: bool,
}

impl SyncController {
    pub fn new(
        config: Config,
        session: Session,
        user: UserProfile,
        api: Arc<dyn ChatApi>,
        channel: RealtimeChannel,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(256);
        let friends = FriendDirectory::new(config.page_size);
        let channel_states = channel.watch_state();

        Self {
            config,
            session,
            user,
            api,
            channel,
            conversations: ConversationListStore::new(),
            messages: MessageStore::new(),
            friends,
            active: None,
            pages_loaded: 0,
            has_more: true,
            page_in_flight: false,
            subscriptions: Vec::new(),
            channel_states,
            inbound_tx,
            inbound_rx,
            completion_tx,
            completion_rx,
            in_flight: 0,
            updates,
            ended: false,
        }
    }

    /// Change notifications for the presentation layer
    pub fn subscribe_updates(&self) -> broadcast::Receiver<SyncUpdate> {
        self.updates.subscribe()
    }

    pub fn conversations(&self) -> &ConversationListStore {
        &self.conversations
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn friends(&self) -> &FriendDirectory {
        &self.friends
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active.as_ref()
    }

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    pub fn has_more_conversations(&self) -> bool {
        self.has_more
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Register push handlers and request the first conversation page
    pub async fn start(&mut self) {
        self.subscribe_pushes().await;
        self.request_conversation_page(1);
    }

    /// Register both push handlers unless they are already registered.
    /// Returns whether anything was registered.
    async fn subscribe_pushes(&mut self) -> bool {
        if !self.subscriptions.is_empty() {
            return false;
        }
        for kind in [InboundEventKind::NewMessage, InboundEventKind::GroupNewMessage] {
            let sub = self.channel.subscribe(kind, self.inbound_tx.clone()).await;
            self.subscriptions.push(sub);
        }
        true
    }

    /// Reconnect with the current session, then resubscribe and rejoin the
    /// active conversation. A no-op while connected.
    pub async fn restore_channel(&mut self) -> Result<()> {
        if self.channel.is_connected().await {
            self.subscribe_pushes().await;
            return Ok(());
        }
        // Handles from before the loss are dead or about to be replaced
        for sub in self.subscriptions.drain(..) {
            self.channel.unsubscribe(&sub).await;
        }
        self.channel.connect(&self.session).await?;
        self.subscribe_pushes().await;
        self.rejoin_active().await;
        Ok(())
    }

    async fn rejoin_active(&mut self) {
        if let Some(active) = self.active.as_ref() {
            let join = OutboundEvent::JoinGroup {
                conversation_id: active.id.clone(),
            };
            self.emit(join).await;
        }
        info!("Realtime channel restored");
        self.notify(SyncUpdate::ChannelRestored);
    }

    async fn on_channel_state(&mut self, state: ConnectionState) {
        if self.ended {
            return;
        }
        match state {
            ConnectionState::Disconnected => {
                if self.channel.is_connected().await {
                    debug!("Channel already reconnected");
                    return;
                }
                warn!("Realtime channel lost, reconnecting");
                self.notify(SyncUpdate::ChannelLost);
                if let Err(e) = self.restore_channel().await {
                    self.fail("reconnect realtime channel", e).await;
                }
            }
            // Connected by someone else while no handlers were registered
            ConnectionState::Connected => {
                if self.subscribe_pushes().await {
                    self.rejoin_active().await;
                }
            }
            ConnectionState::Connecting => {}
        }
    }

    /// Request the next conversation page. Returns false when there is
    /// nothing more to load or a page is already in flight.
    pub fn load_more_conversations(&mut self) -> bool {
        if !self.has_more || self.page_in_flight {
            return false;
        }
        self.request_conversation_page(self.pages_loaded + 1);
        true
    }

    fn request_conversation_page(&mut self, page: u32) {
        self.page_in_flight = true;
        let api = self.api.clone();
        let size = self.config.page_size;
        self.spawn_request(async move {
            Completion::ConversationPage {
                page,
                result: api.list_conversations(page, size).await,
            }
        });
    }

    /// Select a listed conversation
    pub async fn select_conversation(&mut self, conversation_id: &str) -> Result<()> {
        let conversation = self
            .conversations
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| SyncError::Validation(format!("Unknown conversation {}", conversation_id)))?;
        self.activate(conversation).await;
        Ok(())
    }

    /// Leave the previous conversation (if any), join `conversation`, reload
    /// its messages. Applies even when it is already the active one.
    async fn activate(&mut self, conversation: Conversation) {
        // Queued pushes belong to the conversation being left
        while let Ok(event) = self.inbound_rx.try_recv() {
            self.handle_inbound(event);
        }
        if let Some(previous) = self.active.take() {
            self.emit(OutboundEvent::LeaveGroup {
                conversation_id: previous.id,
            })
            .await;
        }
        self.emit(OutboundEvent::JoinGroup {
            conversation_id: conversation.id.clone(),
        })
        .await;

        if self.config.promote_on_select {
            self.conversations.upsert_and_promote(conversation.clone());
            self.notify(SyncUpdate::ConversationsChanged {
                has_more: self.has_more,
            });
        }

        info!("Active conversation: {} ({})", conversation.name, conversation.id);
        let ticket = self.messages.begin_load(&conversation.id);
        self.active = Some(conversation);
        self.notify(SyncUpdate::ActiveConversationChanged {
            conversation_id: ticket.conversation_id.clone(),
        });
        self.notify(SyncUpdate::MessagesChanged {
            conversation_id: ticket.conversation_id.clone(),
        });

        let api = self.api.clone();
        let size = self.config.message_page_size;
        self.spawn_request(async move {
            let result = api.list_messages(&ticket.conversation_id, 1, size).await;
            Completion::Messages { ticket, result }
        });
    }

    /// Echo the message locally, then send it. The echo stays even if the
    /// send fails.
    pub async fn send_message(&mut self, body: &str) -> Result<()> {
        if body.trim().is_empty() {
            return Err(SyncError::Validation("Message cannot be empty".to_string()));
        }
        let conversation_id = self
            .active
            .as_ref()
            .map(|c| c.id.clone())
            .ok_or_else(|| SyncError::Validation("Select a conversation first".to_string()))?;

        let echo = Message::local_echo(&conversation_id, &self.user, body);
        let local_id = echo.id.clone();
        self.messages.append_local_echo(echo);
        self.notify(SyncUpdate::MessagesChanged {
            conversation_id: conversation_id.clone(),
        });

        let socket_id = self.channel.socket_id().await;
        let api = self.api.clone();
        let body = body.to_string();
        self.spawn_request(async move {
            let result = api
                .send_message(&conversation_id, &body, socket_id.as_deref())
                .await;
            Completion::Sent { local_id, result }
        });
        Ok(())
    }

    pub fn search_friends(&mut self, keyword: &str) {
        let query = self.friends.search(keyword);
        self.request_friends(query);
    }

    pub fn load_more_friends(&mut self) -> bool {
        match self.friends.next_query() {
            Some(query) => {
                self.request_friends(query);
                true
            }
            None => false,
        }
    }

    pub fn toggle_friend(&mut self, user_id: &str) {
        self.friends.toggle(user_id);
    }

    fn request_friends(&mut self, query: FriendQuery) {
        let api = self.api.clone();
        let size = self.config.page_size;
        self.spawn_request(async move {
            let result = api
                .list_friends(query.page, size, query.keyword.as_deref())
                .await;
            Completion::Friends { query, result }
        });
    }

    /// Validate the draft and create the conversation; it is promoted and
    /// selected once the server returns its id
    pub fn create_conversation(&mut self, draft: &ConversationDraft) -> Result<()> {
        let request = draft.to_request(Some(&self.friends))?;
        let api = self.api.clone();
        self.spawn_request(async move {
            let result = api.create_conversation(&request).await;
            Completion::Created { request, result }
        });
        Ok(())
    }

    /// Merge one push event
    pub fn handle_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::NewMessage(message) => {
                let id = message.id.clone();
                if self.messages.ingest_push(message) {
                    debug!("Ingested pushed message {}", id);
                    if let Some(active) = self.messages.conversation_id() {
                        let conversation_id = active.to_string();
                        self.notify(SyncUpdate::MessagesChanged { conversation_id });
                    }
                } else {
                    debug!("Dropped pushed message {}", id);
                }
            }
            InboundEvent::GroupNewMessage(conversation) => {
                debug!("Activity on conversation {}", conversation.id);
                self.conversations.upsert_and_promote(conversation);
                self.notify(SyncUpdate::ConversationsChanged {
                    has_more: self.has_more,
                });
            }
        }
    }

    async fn handle_completion(&mut self, completion: Completion) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match completion {
            Completion::ConversationPage { page, result } => {
                self.page_in_flight = false;
                match result {
                    Ok(items) => {
                        self.has_more = self.conversations.apply_page(page, self.config.page_size, items);
                        self.pages_loaded = page;
                        debug!(
                            "Conversation page {} merged ({} total, more: {})",
                            page,
                            self.conversations.len(),
                            self.has_more
                        );
                        self.notify(SyncUpdate::ConversationsChanged {
                            has_more: self.has_more,
                        });
                    }
                    Err(e) => self.fail("load conversations", e).await,
                }
            }
            Completion::Messages { ticket, result } => match result {
                Ok(page) => {
                    if self.messages.replace(&ticket, page) {
                        self.notify(SyncUpdate::MessagesChanged {
                            conversation_id: ticket.conversation_id,
                        });
                    }
                }
                Err(e) if !self.messages.is_current(&ticket) => {
                    debug!("Ignoring failed stale load for {}: {}", ticket.conversation_id, e);
                }
                Err(e) => self.fail("load messages", e).await,
            },
            Completion::Sent { local_id, result } => match result {
                Ok(confirmed) => {
                    if self.messages.confirm_echo(&local_id, confirmed) {
                        if let Some(active) = self.messages.conversation_id() {
                            let conversation_id = active.to_string();
                            self.notify(SyncUpdate::MessagesChanged { conversation_id });
                        }
                    }
                }
                Err(e) => {
                    // Known limitation: the echo is not rolled back
                    warn!("Message {} was echoed but not sent", local_id);
                    self.fail("send message", e).await;
                }
            },
            Completion::Friends { query, result } => match result {
                Ok(items) => {
                    if self.friends.apply_page(&query, items) {
                        self.notify(SyncUpdate::FriendsChanged {
                            has_more: self.friends.has_more(),
                        });
                    }
                }
                Err(e) => self.fail("search friends", e).await,
            },
            Completion::Created { request, result } => match result {
                Ok(id) => {
                    info!("Created conversation {} ({})", request.name, id);
                    self.friends.clear_selection();
                    self.conversations
                        .upsert_and_promote(Conversation::new(id.clone(), request.name, request.kind));
                    self.notify(SyncUpdate::ConversationsChanged {
                        has_more: self.has_more,
                    });
                    if let Some(conversation) = self.conversations.get(&id).cloned() {
                        self.activate(conversation).await;
                    }
                }
                Err(e) => self.fail("create conversation", e).await,
            },
        }
    }

    /// Log a failed operation; auth failures end the session
    async fn fail(&mut self, operation: &str, e: SyncError) {
        error!("Failed to {}: {}", operation, e);
        if e.is_auth_failure() {
            self.logout().await;
            return;
        }
        self.notify(SyncUpdate::Notice {
            message: format!("Failed to {}: {}", operation, e),
        });
    }

    async fn emit(&self, event: OutboundEvent) {
        if let Err(e) = self.channel.emit(&event).await {
            warn!("Could not emit {}: {}", event, e);
        }
    }

    fn spawn_request<F>(&mut self, request: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(request.await);
        });
    }

    fn notify(&self, update: SyncUpdate) {
        // No receivers is fine
        let _ = self.updates.send(update);
    }

    /// Leave the active conversation and drop every handler this
    /// controller registered
    pub async fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            self.emit(OutboundEvent::LeaveGroup {
                conversation_id: active.id,
            })
            .await;
        }
        for sub in self.subscriptions.drain(..) {
            self.channel.unsubscribe(&sub).await;
        }
    }

    /// End the session: teardown, close the channel, clear the token
    pub async fn logout(&mut self) {
        if self.ended {
            return;
        }
        self.teardown().await;
        self.channel.disconnect().await;
        self.session.invalidate().await;
        self.messages.clear();
        self.conversations.clear();
        self.ended = true;
        info!("Logged out");
        self.notify(SyncUpdate::SessionEnded);
    }

    /// Apply one command. Validation failures become notices.
    pub async fn handle_command(&mut self, command: Command) {
        let result = match command {
            Command::LoadMoreConversations => {
                self.load_more_conversations();
                Ok(())
            }
            Command::Select(id) => self.select_conversation(&id).await,
            Command::SelectIndex(idx) => match self.conversations.conversations().get(idx).cloned() {
                Some(conversation) => {
                    self.activate(conversation).await;
                    Ok(())
                }
                None => Err(SyncError::Validation(format!("No conversation #{}", idx + 1))),
            },
            Command::Send(body) => self.send_message(&body).await,
            Command::SearchFriends(keyword) => {
                self.search_friends(&keyword);
                Ok(())
            }
            Command::LoadMoreFriends => {
                self.load_more_friends();
                Ok(())
            }
            Command::ToggleFriend(id) => {
                self.toggle_friend(&id);
                Ok(())
            }
            Command::CreateConversation(draft) => self.create_conversation(&draft),
            Command::CreateGroupWithSelected(name) => {
                let draft = ConversationDraft::group(&name, self.friends.selected().to_vec());
                self.create_conversation(&draft)
            }
            Command::Reconnect => self.restore_channel().await,
            Command::Logout => {
                self.logout().await;
                Ok(())
            }
            Command::Shutdown => {
                self.teardown().await;
                self.ended = true;
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("Command rejected: {}", e);
            self.notify(SyncUpdate::Notice {
                message: e.to_string(),
            });
        }
    }

    /// Handle the next push event or REST completion. Returns false once
    /// the session has ended.
    pub async fn process_next(&mut self) -> bool {
        if self.ended {
            return false;
        }
        tokio::select! {
            Some(event) = self.inbound_rx.recv() => self.handle_inbound(event),
            Some(completion) = self.completion_rx.recv() => self.handle_completion(completion).await,
            Ok(state) = self.channel_states.recv() => self.on_channel_state(state).await,
        }
        !self.ended
    }

    /// Wait for every REST call in flight, then apply queued push events
    pub async fn settle(&mut self) {
        while self.in_flight > 0 && !self.ended {
            match self.completion_rx.recv().await {
                Some(completion) => self.handle_completion(completion).await,
                None => break,
            }
        }
        while let Ok(event) = self.inbound_rx.try_recv() {
            if self.ended {
                break;
            }
            self.handle_inbound(event);
        }
    }

    /// Drive the controller until logout, shutdown, or the command stream
    /// closes. `on_change` sees every update after the state it describes
    /// has been applied.
    pub async fn run<F>(mut self, mut commands: mpsc::Receiver<Command>, mut on_change: F)
    where
        F: FnMut(&SyncController, &SyncUpdate),
    {
        let mut changes = self.updates.subscribe();
        self.start().await;
        while !self.ended {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.teardown().await;
                        self.ended = true;
                    }
                },
                Some(event) = self.inbound_rx.recv() => self.handle_inbound(event),
                Some(completion) = self.completion_rx.recv() => self.handle_completion(completion).await,
                Ok(state) = self.channel_states.recv() => self.on_channel_state(state).await,
            }
            loop {
                match changes.try_recv() {
                    Ok(update) => on_change(&self, &update),
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        warn!("Change observer lagged {} updates", n);
                    }
                    Err(_) => break,
                }
            }
        }
        info!("Sync controller stopped");
    }
}
