/// Session-scoped realtime channel: connection lifecycle plus a typed
/// subscription registry. No chat merge logic lives here.
use crate::error::{Result, SyncError};
use crate::realtime::events::{InboundEvent, InboundEventKind, OutboundEvent};
use crate::realtime::packet::SocketPacket;
use crate::realtime::transport::{RealtimeTransport, TransportLink};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Event name the server uses to report channel-level failures
const SERVER_ERROR_EVENT: &str = "error";

/// Connection state of the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    /// Transport opening or namespace handshake in flight
    Connecting,
    Connected,
}

/// Handle returned by `subscribe`; pass it back to `unsubscribe`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub id: u64,
    pub kind: InboundEventKind,
}

struct ActiveLink {
    outbound: mpsc::UnboundedSender<SocketPacket>,
    socket_id: String,
    epoch: u64,
    pump: JoinHandle<()>,
}

type Handlers = HashMap<u64, (InboundEventKind, mpsc::UnboundedSender<InboundEvent>)>;

/// Realtime channel shared by clones
#[derive(Clone)]
pub struct RealtimeChannel {
    transport: Arc<dyn RealtimeTransport>,
    namespace: String,
    connect_timeout: Duration,
    state: Arc<RwLock<ConnectionState>>,
    link: Arc<RwLock<Option<ActiveLink>>>,
    handlers: Arc<RwLock<Handlers>>,
    next_id: Arc<AtomicU64>,
    epoch: Arc<AtomicU64>,
    transitions: broadcast::Sender<ConnectionState>,
}

impl RealtimeChannel {
    pub fn new(transport: Arc<dyn RealtimeTransport>, namespace: &str, connect_timeout: Duration) -> Self {
        let (transitions, _) = broadcast::channel(16);
        Self {
            transport,
            namespace: namespace.to_string(),
            connect_timeout,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            link: Arc::new(RwLock::new(None)),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            epoch: Arc::new(AtomicU64::new(0)),
            transitions,
        }
    }

    /// Established and lost connections. Failed connect attempts are
    /// reported to the caller of `connect` only.
    pub fn watch_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Socket id assigned by the server, attached to sends so the sender
    /// is not echoed its own message
    pub async fn socket_id(&self) -> Option<String> {
        self.link.read().await.as_ref().map(|l| l.socket_id.clone())
    }

    /// Open the channel for `session`. A no-op while a connection is open
    /// or being opened.
    pub async fn connect(&self, session: &Session) -> Result<()> {
        let token = session.token().await?;
        {
            let mut state = self.state.write().await;
            if *state != ConnectionState::Disconnected {
                debug!("Realtime channel already {:?}", *state);
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }

        match self.handshake(&token).await {
            Ok((link, socket_id)) => {
                let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                let TransportLink { outbound, inbound } = link;
                // Hold the slot while spawning so an early transport loss
                // is torn down after the link is installed, not before
                let mut slot = self.link.write().await;
                let pump = {
                    let channel = self.clone();
                    tokio::spawn(async move { channel.pump(inbound, epoch).await })
                };
                *slot = Some(ActiveLink {
                    outbound,
                    socket_id: socket_id.clone(),
                    epoch,
                    pump,
                });
                *self.state.write().await = ConnectionState::Connected;
                drop(slot);
                info!("Connected to realtime channel {} (socket {})", self.namespace, socket_id);
                let _ = self.transitions.send(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                error!("Realtime connect failed: {}", e);
                Err(e)
            }
        }
    }

    async fn handshake(&self, token: &str) -> Result<(TransportLink, String)> {
        let mut link = self.transport.open().await?;
        link.outbound
            .send(SocketPacket::Connect {
                namespace: self.namespace.clone(),
                data: Some(serde_json::json!({ "token": token })),
            })
            .map_err(|_| SyncError::Transport("closed before namespace connect".to_string()))?;

        let socket_id = timeout(self.connect_timeout, async {
            while let Some(packet) = link.inbound.recv().await {
                match packet {
                    SocketPacket::Connect { namespace, data } if namespace == self.namespace => {
                        let sid = data
                            .as_ref()
                            .and_then(|d| d.get("sid"))
                            .and_then(|s| s.as_str())
                            .unwrap_or_default()
                            .to_string();
                        return Ok(sid);
                    }
                    SocketPacket::ConnectError { namespace, message }
                        if namespace == self.namespace =>
                    {
                        return Err(SyncError::Channel(message));
                    }
                    other => debug!("Ignoring {} during handshake", other),
                }
            }
            Err(SyncError::Transport("closed during namespace connect".to_string()))
        })
        .await
        .map_err(|_| SyncError::Timeout("namespace connect".to_string()))??;

        Ok((link, socket_id))
    }

    /// Read packets until the transport goes away
    async fn pump(self, mut inbound: mpsc::UnboundedReceiver<SocketPacket>, epoch: u64) {
        while let Some(packet) = inbound.recv().await {
            if packet.namespace() != self.namespace {
                continue;
            }
            match packet {
                SocketPacket::Event { name, payload, .. } => self.dispatch(&name, payload).await,
                SocketPacket::ConnectError { message, .. } => {
                    error!("Realtime channel error: {}", message);
                }
                SocketPacket::Disconnect { .. } => {
                    info!("Server closed namespace {}", self.namespace);
                    break;
                }
                other => debug!("Ignoring {}", other),
            }
        }

        // Only tear down the link this pump belongs to
        let mut link = self.link.write().await;
        if link.as_ref().map(|l| l.epoch) == Some(epoch) {
            *link = None;
            drop(link);
            *self.state.write().await = ConnectionState::Disconnected;
            self.handlers.write().await.clear();
            warn!("Realtime transport lost; subscriptions invalidated");
            let _ = self.transitions.send(ConnectionState::Disconnected);
        }
    }

    async fn dispatch(&self, name: &str, payload: serde_json::Value) {
        if name == SERVER_ERROR_EVENT {
            let message = payload
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| payload.to_string());
            error!("Realtime server error: {}", message);
            return;
        }

        let event = match InboundEvent::decode(name, payload) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!("Unhandled realtime event {}", name);
                return;
            }
            Err(e) => {
                warn!("Dropping realtime event: {}", e);
                return;
            }
        };

        let kind = event.kind();
        let mut handlers = self.handlers.write().await;
        handlers.retain(|id, (k, tx)| {
            if *k != kind {
                return true;
            }
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                debug!("Pruning closed subscription {}", id);
            }
            alive
        });
    }

    /// Register `handler` for `kind`
    pub async fn subscribe(
        &self,
        kind: InboundEventKind,
        handler: mpsc::UnboundedSender<InboundEvent>,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.handlers.write().await.insert(id, (kind, handler));
        debug!("Subscribed {} to {}", id, kind.as_str());
        Subscription { id, kind }
    }

    /// Returns false if the subscription was already gone
    pub async fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let removed = self.handlers.write().await.remove(&subscription.id).is_some();
        if removed {
            debug!("Unsubscribed {} from {}", subscription.id, subscription.kind.as_str());
        }
        removed
    }

    pub async fn subscription_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn emit(&self, event: &OutboundEvent) -> Result<()> {
        let link = self.link.read().await;
        let link = link.as_ref().ok_or(SyncError::ChannelClosed)?;
        link.outbound
            .send(SocketPacket::event(&self.namespace, event.name(), event.payload()))
            .map_err(|_| SyncError::ChannelClosed)?;
        debug!("Emitted {}", event);
        Ok(())
    }

    /// Close the channel immediately and invalidate every subscription.
    /// A later `connect` opens a fresh link.
    pub async fn disconnect(&self) {
        let link = self.link.write().await.take();
        *self.state.write().await = ConnectionState::Disconnected;
        self.handlers.write().await.clear();

        if let Some(link) = link {
            let _ = link.outbound.send(SocketPacket::Disconnect {
                namespace: self.namespace.clone(),
            });
            link.pump.abort();
            info!("Disconnected from realtime channel {}", self.namespace);
            let _ = self.transitions.send(ConnectionState::Disconnected);
        }
    }
}
