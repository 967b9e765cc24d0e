//! Wire protocol for client-server communication.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use worldlink_core::{DeltaError, DeltaRecord};

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake sent on every (re)connect. The secret is `null` on first contact.
    Init {
        #[serde(rename = "clientSecret")]
        client_secret: Option<String>,
    },
    /// Chat line.
    Chat {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    /// Keepalive.
    Ping,
}

/// Session parameters announced by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Milliseconds of silence the server tolerates.
    pub keep_alive_timeout: Option<u64>,
    /// Batching period in milliseconds.
    pub update_interval: Option<u64>,
    /// Object the client should focus first.
    #[serde(alias = "player_id")]
    pub player_id: Option<String>,
}

impl Handshake {
    /// Whether this record announces another client joining rather than
    /// (re)establishing ours. `own_id` is `None` until our session is set up
    /// on the current connection; a record carrying a secret is always ours.
    #[must_use]
    pub fn announces_peer(&self, own_id: Option<&str>) -> bool {
        self.client_secret.is_none()
            && own_id.is_some_and(|own| self.client_id.as_deref().is_some_and(|id| id != own))
    }
}

/// Control message from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session handshake or rotation. Under the `connected` name it may also
    /// announce a peer, see [`Handshake::announces_peer`].
    #[serde(alias = "connected")]
    Init(Handshake),
    /// Chat line.
    Chat {
        content: String,
        #[serde(default)]
        channel: Option<String>,
    },
    /// Server going away or session dropped.
    #[serde(alias = "disconnected")]
    Offline {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        id: Option<String>,
    },
    /// Heartbeat.
    #[serde(alias = "alive")]
    Ping,
    /// Server-side error report.
    Error { message: String },
    /// Object removed together with its subtree.
    #[serde(alias = "delete")]
    Remove { id: String },
}

/// One decoded inbound record.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundRecord {
    /// Session, chat or status message.
    Control(ServerMessage),
    /// Object update.
    Delta(DeltaRecord),
}

/// Why a fragment could not be decoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid control record: {0}")]
    Control(serde_json::Error),
    #[error("Invalid object delta: {0}")]
    Delta(#[from] DeltaError),
    #[error("Record is neither a control message nor an object delta")]
    Unrecognized,
}

/// A fragment that failed to decode, kept for reporting.
#[derive(Debug, Error)]
#[error("{error} (fragment: {raw:?})")]
pub struct ProtocolFault {
    pub raw: String,
    #[source]
    pub error: ProtocolError,
}

/// Decode a single record.
///
/// Objects with a `type` field are control messages. Objects with a string
/// `o` field carry a positional object delta.
///
/// # Errors
/// Returns error if the fragment is not JSON or matches neither shape.
pub fn parse_record(text: &str) -> Result<InboundRecord, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    if value.get("type").is_some() {
        return serde_json::from_value(value)
            .map(InboundRecord::Control)
            .map_err(ProtocolError::Control);
    }
    match value.get("o") {
        Some(Value::String(encoded)) => Ok(InboundRecord::Delta(DeltaRecord::parse(encoded)?)),
        _ => Err(ProtocolError::Unrecognized),
    }
}

/// Wrap a delta the way the server sends it.
#[must_use]
pub fn delta_record(delta: &DeltaRecord) -> String {
    serde_json::json!({ "o": delta.encode() }).to_string()
}
