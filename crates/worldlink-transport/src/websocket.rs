//! WebSocket connector.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
};

use crate::connector::{Connector, Link, TransportError};

/// Connects over `ws://` or `wss://`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(url, "WebSocket connected");

        let (sink, stream) = socket.split();

        let sink = sink
            .with(|text: String| future::ok::<_, tungstenite::Error>(Message::Text(text.into())))
            .sink_map_err(|e| TransportError::Socket(e.to_string()));

        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        tracing::warn!("Dropping non UTF-8 binary frame");
                        None
                    }
                },
                Ok(Message::Close(_)) => Some(Err(TransportError::ClosedByPeer)),
                Ok(_) => None,
                Err(e) => {
                    tracing::error!("WebSocket error: {e}");
                    Some(Err(TransportError::Socket(e.to_string())))
                }
            })
        });

        Ok(Link::new(Box::pin(sink), stream.boxed()))
    }
}
