/// Realtime channel modules
pub mod channel;
pub mod events;
pub mod packet;
pub mod transport;

pub use channel::{ConnectionState, RealtimeChannel, Subscription};
pub use events::{InboundEvent, InboundEventKind, OutboundEvent};
pub use packet::{EnginePacket, SocketPacket};
pub use transport::{RealtimeTransport, TransportLink, WebSocketTransport};
