//! Batch framing: records joined by a delimiter in one network write.

use serde::Serialize;
use thiserror::Error;

use crate::protocol::{InboundRecord, ProtocolFault, parse_record};

/// Default delimiter. Serialized JSON never contains a raw newline, so
/// object deltas (which use `;` internally) survive batching.
pub const DEFAULT_DELIMITER: &str = "\n";

/// Codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Delimiter must not be empty")]
    EmptyDelimiter,
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Payload contains the reserved delimiter {delimiter:?}")]
    ReservedDelimiter { delimiter: String },
}

/// Stateless batch codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageCodec {
    delimiter: String,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_string(),
        }
    }
}

impl MessageCodec {
    /// Create a codec for the given delimiter.
    ///
    /// # Errors
    /// Returns error if the delimiter is empty.
    pub fn new(delimiter: impl Into<String>) -> Result<Self, CodecError> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return Err(CodecError::EmptyDelimiter);
        }
        Ok(Self { delimiter })
    }

    /// The delimiter in use.
    #[must_use]
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Serialize one outgoing record.
    ///
    /// # Errors
    /// Returns error if serialization fails or the result contains the
    /// delimiter, which would split it on the receiving side.
    pub fn encode<T: Serialize + ?Sized>(&self, payload: &T) -> Result<String, CodecError> {
        let record = serde_json::to_string(payload)?;
        if record.contains(self.delimiter.as_str()) {
            return Err(CodecError::ReservedDelimiter {
                delimiter: self.delimiter.clone(),
            });
        }
        Ok(record)
    }

    /// Join encoded records into one network write.
    #[must_use]
    pub fn join<S: AsRef<str>>(&self, records: &[S]) -> String {
        records
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(&self.delimiter)
    }

    /// Split a network read into records, skipping blank pieces.
    pub fn split<'a>(&'a self, batch: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        batch
            .split(self.delimiter.as_str())
            .filter(|piece| !piece.trim().is_empty())
    }

    /// Split and decode a network read. A bad fragment never affects its
    /// neighbours. Order follows the batch.
    #[must_use]
    pub fn decode(&self, batch: &str) -> Vec<Result<InboundRecord, ProtocolFault>> {
        self.split(batch)
            .map(|raw| {
                parse_record(raw).map_err(|error| ProtocolFault {
                    raw: raw.to_string(),
                    error,
                })
            })
            .collect()
    }
}
