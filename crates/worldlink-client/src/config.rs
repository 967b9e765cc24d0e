//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use worldlink_core::navigation::DEFAULT_BREADCRUMB_DEPTH;
use worldlink_transport::TransportConfig;

/// Configuration for a [`WorldClient`](crate::WorldClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server endpoint.
    pub url: String,
    pub transport: TransportConfig,
    /// Render coalescing window.
    pub render_window_ms: u64,
    /// Ancestor hops shown in the focus breadcrumb.
    pub breadcrumb_depth: usize,
    /// Confine navigation to the subtree under this object.
    pub root_id: Option<String>,
    /// Chat lines kept before the oldest are dropped.
    pub chat_history: usize,
    /// Drop the mirrored world when the connection goes away. The server
    /// sends it again after reconnecting.
    pub reset_on_disconnect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080".to_string(),
            transport: TransportConfig::default(),
            render_window_ms: 50,
            breadcrumb_depth: DEFAULT_BREADCRUMB_DEPTH,
            root_id: None,
            chat_history: 500,
            reset_on_disconnect: true,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON config. Missing keys take their defaults.
    ///
    /// # Errors
    /// Returns error if `text` is not a valid config document.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Render coalescing window as a duration.
    #[must_use]
    pub const fn render_window(&self) -> Duration {
        Duration::from_millis(self.render_window_ms)
    }
}
