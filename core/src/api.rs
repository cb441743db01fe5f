/// REST collaborator: the chat backend's HTTP API
///
/// Endpoints:
///   GET  /v1/users/profile
///   GET  /v1/group-chats/me                ?page=N&size=N
///   GET  /v1/group-chats/:id/messages      ?page=N&size=N   (newest first)
///   POST /v1/group-chats/:id/messages      body: {"content":"...","socketId":"..."}
///   GET  /v1/users/friends                 ?page=N&size=N&keyword=...
///   POST /v1/group-chats                   body: {"name":"...","members":[...],"type":"..."}
///
/// Every response is wrapped in a `{"data": ...}` envelope.
use crate::chat_types::{Conversation, ConversationKind, Friend, Message, UserProfile};
use crate::error::{Result, SyncError};
use crate::session::Session;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use http::header;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Body of `POST /v1/group-chats`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateConversationRequest {
    pub name: String,
    pub members: Vec<String>,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
}

#[derive(Debug, Serialize)]
struct SendMessageBody<'a> {
    content: &'a str,
    #[serde(rename = "socketId", skip_serializing_if = "Option::is_none")]
    socket_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CreatedConversation {
    id: String,
}

/// Operations the sync engine needs from the backend
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn fetch_profile(&self) -> Result<UserProfile>;

    /// One page of the user's conversations, in server order
    async fn list_conversations(&self, page: u32, size: usize) -> Result<Vec<Conversation>>;

    /// One page of messages, most recent first
    async fn list_messages(&self, conversation_id: &str, page: u32, size: usize)
        -> Result<Vec<Message>>;

    /// Send a message. Returns the stored message when the server echoes it back.
    async fn send_message(
        &self,
        conversation_id: &str,
        body: &str,
        socket_id: Option<&str>,
    ) -> Result<Option<Message>>;

    async fn list_friends(&self, page: u32, size: usize, keyword: Option<&str>)
        -> Result<Vec<Friend>>;

    /// Create a conversation and return its id
    async fn create_conversation(&self, request: &CreateConversationRequest) -> Result<String>;
}

/// `ChatApi` over plain HTTP with bearer authentication
pub struct HttpChatApi {
    client: Client<HttpConnector, Full<Bytes>>,
    base_url: String,
    session: Session,
    timeout: Duration,
}

impl HttpChatApi {
    pub fn new(base_url: &str, session: Session, timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            timeout,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Option<T>> {
        let token = self.session.token().await?;
        let uri = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, uri);

        let req = Request::builder()
            .method(method)
            .uri(&uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| SyncError::Transport(format!("Invalid request {}: {}", uri, e)))?;

        let resp = tokio::time::timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| SyncError::Timeout(format!("{} timed out", uri)))?
            .map_err(|e| SyncError::Transport(format!("{}: {}", uri, e)))?;

        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| SyncError::Transport(format!("body read error: {}", e)))?
            .to_bytes();

        check_status(status, &bytes)?;
        decode_data(&bytes)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        self.call(Method::GET, path, None).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<Option<T>> {
        let payload = serde_json::to_vec(body).map_err(SyncError::Serialization)?;
        self.call(Method::POST, path, Some(payload)).await
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_profile(&self) -> Result<UserProfile> {
        self.get("/v1/users/profile")
            .await?
            .ok_or_else(|| SyncError::Protocol("profile response without data".to_string()))
    }

    async fn list_conversations(&self, page: u32, size: usize) -> Result<Vec<Conversation>> {
        let path = format!("/v1/group-chats/me?page={}&size={}", page, size);
        Ok(self.get(&path).await?.unwrap_or_default())
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        page: u32,
        size: usize,
    ) -> Result<Vec<Message>> {
        let path = format!(
            "/v1/group-chats/{}/messages?page={}&size={}",
            urlencoding::encode(conversation_id),
            page,
            size
        );
        Ok(self.get(&path).await?.unwrap_or_default())
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        body: &str,
        socket_id: Option<&str>,
    ) -> Result<Option<Message>> {
        let path = format!("/v1/group-chats/{}/messages", urlencoding::encode(conversation_id));
        let data: Option<serde_json::Value> =
            self.post(&path, &SendMessageBody { content: body, socket_id }).await?;
        // Best effort: older backends answer with an empty envelope
        Ok(data.and_then(|v| serde_json::from_value::<Message>(v).ok()))
    }

    async fn list_friends(
        &self,
        page: u32,
        size: usize,
        keyword: Option<&str>,
    ) -> Result<Vec<Friend>> {
        let mut path = format!("/v1/users/friends?page={}&size={}", page, size);
        if let Some(k) = keyword.filter(|k| !k.is_empty()) {
            path.push_str("&keyword=");
            path.push_str(&urlencoding::encode(k));
        }
        Ok(self.get(&path).await?.unwrap_or_default())
    }

    async fn create_conversation(&self, request: &CreateConversationRequest) -> Result<String> {
        let created: Option<CreatedConversation> = self.post("/v1/group-chats", request).await?;
        created
            .map(|c| c.id)
            .ok_or_else(|| SyncError::Protocol("create response without id".to_string()))
    }
}

fn check_status(status: StatusCode, body: &[u8]) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    let message = error_message(body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(SyncError::Unauthorized(message));
    }
    Err(SyncError::Http {
        status: status.as_u16(),
        message,
    })
}

fn error_message(body: &[u8]) -> Option<String> {
    let v: serde_json::Value = serde_json::from_slice(body).ok()?;
    v.get("message").and_then(|m| m.as_str()).map(str::to_string)
}

fn decode_data<T: DeserializeOwned>(body: &[u8]) -> Result<Option<T>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let envelope: Envelope<T> = serde_json::from_slice(body).map_err(SyncError::Serialization)?;
    Ok(envelope.data)
}
