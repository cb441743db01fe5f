/// Wire codec for the realtime channel (Engine.IO v4 carrying Socket.IO v5)
use crate::error::{Result, SyncError};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Engine.IO protocol revision requested in the handshake URL
pub const ENGINE_PROTOCOL: u8 = 4;

/// Engine.IO packets: one per WebSocket text frame
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// Session handshake sent by the server right after the upgrade
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    /// Carries one encoded Socket.IO packet
    Message(String),
    Upgrade,
    Noop,
}

/// Body of the Engine.IO `open` packet
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

impl EnginePacket {
    pub fn encode(&self) -> String {
        match self {
            // Only servers send `open`; encoded for completeness
            EnginePacket::Open(h) => format!(
                "0{{\"sid\":\"{}\",\"pingInterval\":{},\"pingTimeout\":{}}}",
                h.sid, h.ping_interval, h.ping_timeout
            ),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }

    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| SyncError::Protocol("empty engine packet".to_string()))?;
        let data = chars.as_str();
        match kind {
            '0' => {
                let handshake: OpenHandshake = serde_json::from_str(data)
                    .map_err(|e| SyncError::Protocol(format!("Invalid open packet: {}", e)))?;
                Ok(EnginePacket::Open(handshake))
            }
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(data.to_string())),
            '3' => Ok(EnginePacket::Pong(data.to_string())),
            '4' => Ok(EnginePacket::Message(data.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(SyncError::Protocol(format!(
                "Unknown engine packet type: {}",
                other
            ))),
        }
    }
}

/// Socket.IO packets exchanged inside a namespace
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Client: join a namespace with auth data. Server: acknowledgement with `{"sid"}`.
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        name: String,
        payload: Value,
        ack_id: Option<u64>,
    },
    Ack {
        namespace: String,
        ack_id: u64,
        data: Value,
    },
    ConnectError {
        namespace: String,
        message: String,
    },
}

impl SocketPacket {
    pub fn event(namespace: &str, name: &str, payload: Value) -> Self {
        SocketPacket::Event {
            namespace: namespace.to_string(),
            name: name.to_string(),
            payload,
            ack_id: None,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    /// Get packet type as string
    pub fn packet_type(&self) -> &'static str {
        match self {
            SocketPacket::Connect { .. } => "connect",
            SocketPacket::Disconnect { .. } => "disconnect",
            SocketPacket::Event { .. } => "event",
            SocketPacket::Ack { .. } => "ack",
            SocketPacket::ConnectError { .. } => "connect_error",
        }
    }

    /// Encode as `<type>[<namespace>,][<ack id>][<json>]`
    pub fn encode(&self) -> String {
        let (kind, ack_id, data) = match self {
            SocketPacket::Connect { data, .. } => (0, None, data.clone()),
            SocketPacket::Disconnect { .. } => (1, None, None),
            SocketPacket::Event {
                name,
                payload,
                ack_id,
                ..
            } => {
                let mut args = vec![Value::String(name.clone())];
                if !payload.is_null() {
                    args.push(payload.clone());
                }
                (2, *ack_id, Some(Value::Array(args)))
            }
            SocketPacket::Ack { ack_id, data, .. } => {
                let args = match data {
                    Value::Array(_) => data.clone(),
                    other => Value::Array(vec![other.clone()]),
                };
                (3, Some(*ack_id), Some(args))
            }
            SocketPacket::ConnectError { message, .. } => {
                (4, None, Some(serde_json::json!({ "message": message })))
            }
        };

        let mut out = kind.to_string();
        let namespace = self.namespace();
        if namespace != "/" {
            out.push_str(namespace);
            out.push(',');
        }
        if let Some(id) = ack_id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = data {
            out.push_str(&data.to_string());
        }
        out
    }

    pub fn decode(raw: &str) -> Result<Self> {
        let mut chars = raw.chars();
        let kind = chars
            .next()
            .and_then(|c| c.to_digit(10))
            .ok_or_else(|| SyncError::Protocol(format!("Invalid socket packet: {:?}", raw)))?;
        let mut rest = chars.as_str();

        if kind == 5 || kind == 6 {
            return Err(SyncError::Protocol("binary packets are not supported".to_string()));
        }

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(idx) => {
                    let ns = &rest[..idx];
                    rest = &rest[idx + 1..];
                    ns.to_string()
                }
                None => {
                    let ns = rest.to_string();
                    rest = "";
                    ns
                }
            }
        } else {
            "/".to_string()
        };

        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let ack_id = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|e| SyncError::Protocol(format!("Invalid ack id: {}", e)))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(rest).map_err(SyncError::Serialization)?)
        };

        match kind {
            0 => Ok(SocketPacket::Connect { namespace, data }),
            1 => Ok(SocketPacket::Disconnect { namespace }),
            2 => {
                let mut args = match data {
                    Some(Value::Array(args)) => args.into_iter(),
                    _ => return Err(SyncError::Protocol("event without arguments".to_string())),
                };
                let name = match args.next() {
                    Some(Value::String(name)) => name,
                    _ => return Err(SyncError::Protocol("event without a name".to_string())),
                };
                Ok(SocketPacket::Event {
                    namespace,
                    name,
                    payload: args.next().unwrap_or(Value::Null),
                    ack_id,
                })
            }
            3 => Ok(SocketPacket::Ack {
                namespace,
                ack_id: ack_id
                    .ok_or_else(|| SyncError::Protocol("ack without id".to_string()))?,
                data: data.unwrap_or(Value::Null),
            }),
            4 => {
                let message = match data {
                    Some(Value::String(s)) => s,
                    Some(v) => v
                        .get("message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| v.to_string()),
                    None => "connection refused".to_string(),
                };
                Ok(SocketPacket::ConnectError { namespace, message })
            }
            other => Err(SyncError::Protocol(format!(
                "Unknown socket packet type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for SocketPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SocketPacket({} {})", self.packet_type(), self.namespace())
    }
}
