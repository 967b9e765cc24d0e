//! Transport layer for world mirrors.
//!
//! Provides:
//! - Wire protocol (JSON records, positional object deltas)
//! - Batch codec with a configurable delimiter
//! - Reconnecting, batching `TransportSession`
//! - In-memory connector (feature: memory)
//! - WebSocket connector (feature: websocket)

pub mod codec;
pub mod connector;
pub mod protocol;
pub mod session;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use codec::{CodecError, MessageCodec};
pub use connector::{Connector, Link, TransportError};
pub use protocol::{ClientMessage, Handshake, InboundRecord, ProtocolError, ProtocolFault, ServerMessage};
pub use session::{
    ConfigError, ConnectionStatus, KEEP_ALIVE_FACTOR_RANGE, SessionState, TransportConfig,
    TransportEvent, TransportSession, backoff_delay,
};

#[cfg(feature = "memory")]
pub use memory::{MemoryConnector, MemoryServer, ServerConnection};
#[cfg(feature = "websocket")]
pub use websocket::WsConnector;
