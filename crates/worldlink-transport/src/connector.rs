//! Duplex text channel abstraction the session runs over.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, stream::BoxStream};
use thiserror::Error;

use crate::codec::CodecError;

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Socket error: {0}")]
    Socket(String),
    #[error("Connection closed by peer")]
    ClosedByPeer,
    #[error("Session closed")]
    SessionClosed,
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Outgoing half of a connection: one item per network write.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Incoming half of a connection: one item per network read. Ends when the
/// peer goes away.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// An established connection.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Link {
    /// Bundle the two halves of a connection.
    #[must_use]
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Opens connections for a [`TransportSession`](crate::TransportSession).
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a new connection to `url`.
    async fn connect(&self, url: &str) -> Result<Link, TransportError>;
}
