//! In-memory connector.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, channel::mpsc as duplex};
use tokio::sync::mpsc;

use crate::connector::{Connector, Link, TransportError};

/// Connector whose connections terminate in a [`MemoryServer`].
///
/// Useful for tests and single-process setups. No bytes leave the process.
#[derive(Clone)]
pub struct MemoryConnector {
    accept: mpsc::UnboundedSender<ServerConnection>,
    refuse: Arc<AtomicU32>,
}

impl MemoryConnector {
    /// Create a connector and the server side that accepts its connections.
    #[must_use]
    pub fn new() -> (Self, MemoryServer) {
        let (accept, incoming) = mpsc::unbounded_channel();
        let refuse = Arc::new(AtomicU32::new(0));
        (
            Self {
                accept,
                refuse: Arc::clone(&refuse),
            },
            MemoryServer { incoming, refuse },
        )
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect(format!("{url} refused")));
        }

        let (client_tx, client_rx) = duplex::unbounded();
        let (server_tx, server_rx) = duplex::unbounded();
        self.accept
            .send(ServerConnection {
                from_client: client_rx,
                to_client: server_tx,
            })
            .map_err(|_| TransportError::Connect(format!("{url} has no server")))?;

        let sink = client_tx.sink_map_err(|_| TransportError::ClosedByPeer);
        Ok(Link::new(Box::pin(sink), server_rx.boxed()))
    }
}

/// Server side of a [`MemoryConnector`].
pub struct MemoryServer {
    incoming: mpsc::UnboundedReceiver<ServerConnection>,
    refuse: Arc<AtomicU32>,
}

impl MemoryServer {
    /// Refuse the next `count` connection attempts.
    pub fn refuse_next(&self, count: u32) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.incoming.recv().await
    }
}

/// One accepted connection. Dropping it disconnects the client.
pub struct ServerConnection {
    from_client: duplex::UnboundedReceiver<String>,
    to_client: duplex::UnboundedSender<Result<String, TransportError>>,
}

impl ServerConnection {
    /// Next network write from the client, `None` once it hung up.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.next().await
    }

    /// Deliver one network read to the client.
    ///
    /// # Errors
    /// Returns error if the client side is gone.
    pub fn send(&self, batch: impl Into<String>) -> Result<(), TransportError> {
        self.to_client
            .unbounded_send(Ok(batch.into()))
            .map_err(|_| TransportError::ClosedByPeer)
    }

    /// Fail the client's read side with `error`.
    pub fn fail(&self, error: TransportError) {
        let _ = self.to_client.unbounded_send(Err(error));
    }
}
