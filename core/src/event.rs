//! Event trait and the serialized envelope that travels through the store and bus.
//!
//! Events are immutable facts. They are encoded with `bincode` for the store
//! and the bus, and carry a small JSON metadata object describing where they
//! were recorded (stream, version, timestamp).
//!
//! # Example
//!
//! ```
//! use roomledger_core::event::Event;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! enum DoorEvent {
//!     Opened { door: u32 },
//!     Closed { door: u32 },
//! }
//!
//! impl Event for DoorEvent {
//!     fn event_type(&self) -> &'static str {
//!         match self {
//!             DoorEvent::Opened { .. } => "DoorOpened.v1",
//!             DoorEvent::Closed { .. } => "DoorClosed.v1",
//!         }
//!     }
//! }
//! ```

use crate::stream::{StreamId, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Metadata key holding the stream an event was appended to.
pub const META_STREAM_ID: &str = "stream_id";
/// Metadata key holding the stream version assigned to an event.
pub const META_VERSION: &str = "version";
/// Metadata key holding the time an event was recorded.
pub const META_RECORDED_AT: &str = "recorded_at";

/// Error types for event operations.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    Deserialization(String),

    /// The declared event type is not one this decoder knows.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// The payload decoded to a different kind than the declared type.
    #[error("Event type mismatch: declared {declared}, payload is {actual}")]
    TypeMismatch {
        /// Type recorded on the envelope.
        declared: String,
        /// Type of the decoded payload.
        actual: &'static str,
    },
}

/// An event that can be stored in an event store and replayed to reconstruct state.
///
/// `event_type()` returns a stable, versioned identifier such as
/// `"ReservationCreated.v1"`. It is stored next to the payload and used by
/// subscribers to filter and by decoders to validate the payload shape.
pub trait Event: Send + Sync + 'static {
    /// Returns the event type identifier for this event.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the bytes are corrupted or
    /// were produced by an incompatible schema.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::Deserialization(e.to_string()))
    }

    /// Decode a [`SerializedEvent`], checking the declared type against the payload.
    ///
    /// # Errors
    ///
    /// - [`EventError::Deserialization`] if the payload does not decode
    /// - [`EventError::TypeMismatch`] if the payload is a different kind than declared
    fn decode(serialized: &SerializedEvent) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        let event = Self::from_bytes(&serialized.data)?;
        if event.event_type() != serialized.event_type {
            return Err(EventError::TypeMismatch {
                declared: serialized.event_type.clone(),
                actual: event.event_type(),
            });
        }
        Ok(event)
    }
}

/// A serialized event ready for storage or transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., "ReservationCreated.v1").
    pub event_type: String,

    /// The bincode-serialized event data.
    pub data: Vec<u8>,

    /// Optional JSON metadata (stream id, version, recorded-at).
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    #[must_use]
    pub const fn new(
        event_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }

    /// Create a serialized event from an [`Event`].
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the event cannot be serialized.
    pub fn from_event<E: Event + Serialize>(
        event: &E,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            data: event.to_bytes()?,
            metadata,
        })
    }

    /// Build the metadata object written alongside an appended event.
    #[must_use]
    pub fn stream_metadata(
        stream_id: &StreamId,
        version: Version,
        recorded_at: DateTime<Utc>,
    ) -> serde_json::Value {
        serde_json::json!({
            META_STREAM_ID: stream_id.as_str(),
            META_VERSION: version.value(),
            META_RECORDED_AT: recorded_at.to_rfc3339(),
        })
    }

    /// The stream this event was appended to, if recorded.
    #[must_use]
    pub fn stream_id(&self) -> Option<StreamId> {
        self.metadata
            .as_ref()?
            .get(META_STREAM_ID)?
            .as_str()
            .map(StreamId::from)
    }

    /// The stream version assigned to this event, if recorded.
    #[must_use]
    pub fn version(&self) -> Option<Version> {
        self.metadata
            .as_ref()?
            .get(META_VERSION)?
            .as_u64()
            .map(Version::new)
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}
