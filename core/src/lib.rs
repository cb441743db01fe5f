/// ChatSync - client-side synchronization engine for group chat
///
/// Keeps the conversation list and the active conversation's messages
/// consistent across paginated REST loads and a Socket.IO realtime channel.

pub mod api;
pub mod chat_types;
pub mod config;
pub mod controller;
pub mod conversation_list;
pub mod error;
pub mod friends;
pub mod message_store;
pub mod realtime;
pub mod session;

pub use api::{ChatApi, HttpChatApi};
pub use config::Config;
pub use controller::{Command, SyncController};
pub use error::{Result, SyncError};
pub use session::Session;
