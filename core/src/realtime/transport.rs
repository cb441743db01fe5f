/// Transports carrying Socket.IO packets
use crate::error::{Result, SyncError};
use crate::realtime::packet::{EnginePacket, SocketPacket, ENGINE_PROTOCOL};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

/// An open transport. Dropping `outbound` closes the connection; `inbound`
/// yields `None` once the transport is gone.
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<SocketPacket>,
    pub inbound: mpsc::UnboundedReceiver<SocketPacket>,
}

#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn open(&self) -> Result<TransportLink>;
}

/// Engine.IO over a single WebSocket (no long-polling fallback)
pub struct WebSocketTransport {
    base_url: String,
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(base_url: &str, connect_timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            connect_timeout,
        }
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/socket.io/?EIO={}&transport=websocket",
            self.base_url, ENGINE_PROTOCOL
        )
    }
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn open(&self) -> Result<TransportLink> {
        let endpoint = self.endpoint();
        let (ws, _) = timeout(self.connect_timeout, connect_async(endpoint.as_str()))
            .await
            .map_err(|_| SyncError::Timeout(format!("connecting to {}", endpoint)))?
            .map_err(|e| SyncError::Transport(format!("{}: {}", endpoint, e)))?;
        let (mut sink, mut stream) = ws.split();

        // The server speaks first with the Engine.IO handshake
        let handshake = loop {
            let frame = timeout(self.connect_timeout, stream.next())
                .await
                .map_err(|_| SyncError::Timeout("engine handshake".to_string()))?;
            match frame {
                Some(Ok(WsMessage::Text(text))) => match EnginePacket::decode(&text)? {
                    EnginePacket::Open(h) => break h,
                    other => {
                        return Err(SyncError::Protocol(format!(
                            "Expected open packet, got {:?}",
                            other
                        )))
                    }
                },
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
                Some(Ok(other)) => {
                    return Err(SyncError::Protocol(format!(
                        "Unexpected frame during handshake: {:?}",
                        other
                    )))
                }
                Some(Err(e)) => return Err(SyncError::Transport(e.to_string())),
                None => return Err(SyncError::Transport("closed during handshake".to_string())),
            }
        };
        info!("Realtime transport open (engine sid {})", handshake.sid);

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SocketPacket>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SocketPacket>();
        let heartbeat = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);

        tokio::spawn(async move {
            let watchdog = sleep(heartbeat);
            tokio::pin!(watchdog);

            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => {
                        let Some(packet) = outgoing else {
                            debug!("Realtime link dropped, closing socket");
                            let _ = sink.send(WsMessage::Text(EnginePacket::Close.encode())).await;
                            let _ = sink.close().await;
                            break;
                        };
                        let frame = EnginePacket::Message(packet.encode()).encode();
                        if let Err(e) = sink.send(WsMessage::Text(frame)).await {
                            error!("Realtime send failed: {}", e);
                            break;
                        }
                    }
                    incoming = stream.next() => {
                        let text = match incoming {
                            Some(Ok(WsMessage::Text(text))) => text,
                            Some(Ok(WsMessage::Close(_))) | None => {
                                info!("Realtime socket closed by server");
                                break;
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                warn!("Realtime socket error: {}", e);
                                break;
                            }
                        };
                        match EnginePacket::decode(&text) {
                            Ok(EnginePacket::Ping(data)) => {
                                watchdog.as_mut().reset(tokio::time::Instant::now() + heartbeat);
                                if let Err(e) = sink.send(WsMessage::Text(EnginePacket::Pong(data).encode())).await {
                                    error!("Realtime pong failed: {}", e);
                                    break;
                                }
                            }
                            Ok(EnginePacket::Message(raw)) => match SocketPacket::decode(&raw) {
                                Ok(packet) => {
                                    if in_tx.send(packet).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!("Dropping undecodable packet: {}", e),
                            },
                            Ok(EnginePacket::Close) => {
                                info!("Realtime engine closed by server");
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Dropping undecodable frame: {}", e),
                        }
                    }
                    _ = &mut watchdog => {
                        warn!("Realtime heartbeat timed out");
                        break;
                    }
                }
            }
        });

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
