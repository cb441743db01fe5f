#![allow(dead_code)]
/// Test doubles: an in-memory chat backend and a fake Socket.IO server
use async_trait::async_trait;
use chatsync_core::api::{ChatApi, CreateConversationRequest};
use chatsync_core::chat_types::{Conversation, ConversationKind, Friend, Message, UserProfile};
use chatsync_core::error::{Result, SyncError};
use chatsync_core::realtime::{RealtimeTransport, SocketPacket, TransportLink};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

pub const NAMESPACE: &str = "/chat";

pub fn me() -> UserProfile {
    UserProfile {
        user_id: "me".to_string(),
        username: "alice".to_string(),
    }
}

pub fn conv(id: &str) -> Conversation {
    Conversation::new(id, format!("chat {}", id), ConversationKind::Group)
}

pub fn msg(id: &str, conversation: &str, minute: i64) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: conversation.to_string(),
        author_id: "bob".to_string(),
        author_display_name: "bob".to_string(),
        body: format!("body {}", id),
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
            + ChronoDuration::minutes(minute),
        is_read: false,
        delivered: true,
    }
}

pub fn message_json(id: &str, conversation: &str) -> Value {
    serde_json::json!({
        "id": id,
        "groupId": conversation,
        "content": format!("pushed {}", id),
        "userId": "bob",
        "username": "bob",
        "createdAt": "2030-01-01T00:00:00.000Z",
        "isRead": false
    })
}

/// A `new_message` payload as the server pushes it into a joined room,
/// without the conversation id
pub fn untagged_message_json(id: &str) -> Value {
    let mut payload = message_json(id, "");
    if let Some(fields) = payload.as_object_mut() {
        fields.remove("groupId");
    }
    payload
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendBehavior {
    /// Answer with the stored message under a server id
    Confirm,
    /// Answer with an empty envelope
    Empty,
    Fail,
}

/// In-memory `ChatApi`
pub struct FakeApi {
    pub conversation_pages: Mutex<HashMap<u32, Vec<Conversation>>>,
    /// Newest first, as the server returns them
    pub messages: Mutex<HashMap<String, Vec<Message>>>,
    pub friends: Mutex<Vec<Friend>>,
    pub send_behavior: Mutex<SendBehavior>,
    pub calls: Mutex<Vec<String>>,
    pub sent: Mutex<Vec<(String, String, Option<String>)>>,
    pub created: Mutex<Vec<CreateConversationRequest>>,
    pub unauthorized: Mutex<bool>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    next_server_id: Mutex<u32>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            conversation_pages: Mutex::new(HashMap::new()),
            messages: Mutex::new(HashMap::new()),
            friends: Mutex::new(Vec::new()),
            send_behavior: Mutex::new(SendBehavior::Confirm),
            calls: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            unauthorized: Mutex::new(false),
            gates: Mutex::new(HashMap::new()),
            next_server_id: Mutex::new(0),
        })
    }

    pub fn set_page(&self, page: u32, items: Vec<Conversation>) {
        self.conversation_pages.lock().unwrap().insert(page, items);
    }

    pub fn set_messages(&self, conversation_id: &str, newest_first: Vec<Message>) {
        self.messages
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), newest_first);
    }

    /// Hold message loads for `conversation_id` until the returned notify fires
    pub fn gate(&self, conversation_id: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), notify.clone());
        notify
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if *self.unauthorized.lock().unwrap() {
            return Err(SyncError::Unauthorized("token expired".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn fetch_profile(&self) -> Result<UserProfile> {
        self.record("profile".to_string())?;
        Ok(me())
    }

    async fn list_conversations(&self, page: u32, _size: usize) -> Result<Vec<Conversation>> {
        self.record(format!("conversations:{}", page))?;
        Ok(self
            .conversation_pages
            .lock()
            .unwrap()
            .get(&page)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_messages(&self, conversation_id: &str, _page: u32, _size: usize) -> Result<Vec<Message>> {
        self.record(format!("messages:{}", conversation_id))?;
        let gate = self.gates.lock().unwrap().get(conversation_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        body: &str,
        socket_id: Option<&str>,
    ) -> Result<Option<Message>> {
        self.record(format!("send:{}", conversation_id))?;
        self.sent.lock().unwrap().push((
            conversation_id.to_string(),
            body.to_string(),
            socket_id.map(str::to_string),
        ));
        let behavior = *self.send_behavior.lock().unwrap();
        match behavior {
            SendBehavior::Confirm => {
                let mut next = self.next_server_id.lock().unwrap();
                *next += 1;
                let mut stored = msg(&format!("srv-{}", *next), conversation_id, 0);
                stored.author_id = me().user_id;
                stored.body = body.to_string();
                Ok(Some(stored))
            }
            SendBehavior::Empty => Ok(None),
            SendBehavior::Fail => Err(SyncError::Http {
                status: 500,
                message: "boom".to_string(),
            }),
        }
    }

    async fn list_friends(&self, page: u32, size: usize, keyword: Option<&str>) -> Result<Vec<Friend>> {
        self.record(format!("friends:{}:{}", page, keyword.unwrap_or("")))?;
        let all = self.friends.lock().unwrap().clone();
        let filtered: Vec<Friend> = all
            .into_iter()
            .filter(|f| keyword.map_or(true, |k| f.display_name.contains(k)))
            .collect();
        Ok(filtered
            .into_iter()
            .skip((page as usize - 1) * size)
            .take(size)
            .collect())
    }

    async fn create_conversation(&self, request: &CreateConversationRequest) -> Result<String> {
        self.record(format!("create:{}", request.name))?;
        self.created.lock().unwrap().push(request.clone());
        Ok(format!("new-{}", request.name))
    }
}

#[derive(Default)]
struct ServerState {
    received: Vec<SocketPacket>,
    to_client: Option<mpsc::UnboundedSender<SocketPacket>>,
    reject: Option<String>,
    opens: usize,
}

/// `RealtimeTransport` backed by an in-process fake Socket.IO server that
/// acknowledges namespace connects and records everything the client sends
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse namespace connects with `message`
    pub fn reject_with(&self, message: Option<&str>) {
        self.state.lock().unwrap().reject = message.map(str::to_string);
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn received(&self) -> Vec<SocketPacket> {
        self.state.lock().unwrap().received.clone()
    }

    /// `(event name, groupId)` of every event the client emitted
    pub fn emitted(&self) -> Vec<(String, String)> {
        self.received()
            .into_iter()
            .filter_map(|p| match p {
                SocketPacket::Event { name, payload, .. } => Some((
                    name,
                    payload["groupId"].as_str().unwrap_or_default().to_string(),
                )),
                _ => None,
            })
            .collect()
    }

    /// Wait until the client has emitted at least `n` events
    pub async fn wait_for_emitted(&self, n: usize) -> Vec<(String, String)> {
        for _ in 0..100 {
            let events = self.emitted();
            if events.len() >= n {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.emitted()
    }

    pub fn push(&self, name: &str, payload: Value) {
        let state = self.state.lock().unwrap();
        if let Some(tx) = state.to_client.as_ref() {
            let _ = tx.send(SocketPacket::event(NAMESPACE, name, payload));
        }
    }

    pub fn push_raw(&self, packet: SocketPacket) {
        let state = self.state.lock().unwrap();
        if let Some(tx) = state.to_client.as_ref() {
            let _ = tx.send(packet);
        }
    }

    /// Simulate the transport dying
    pub fn drop_connection(&self) {
        self.state.lock().unwrap().to_client = None;
    }
}

#[async_trait]
impl RealtimeTransport for FakeServer {
    async fn open(&self) -> Result<TransportLink> {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SocketPacket>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SocketPacket>();
        let sid = {
            let mut state = self.state.lock().unwrap();
            state.opens += 1;
            state.to_client = Some(in_tx);
            format!("sock-{}", state.opens)
        };

        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(packet) = out_rx.recv().await {
                let mut state = state.lock().unwrap();
                if let SocketPacket::Connect { namespace, .. } = &packet {
                    let reply = match &state.reject {
                        Some(message) => SocketPacket::ConnectError {
                            namespace: namespace.clone(),
                            message: message.clone(),
                        },
                        None => SocketPacket::Connect {
                            namespace: namespace.clone(),
                            data: Some(serde_json::json!({ "sid": sid })),
                        },
                    };
                    if let Some(tx) = state.to_client.as_ref() {
                        let _ = tx.send(reply);
                    }
                }
                state.received.push(packet);
            }
        });

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
