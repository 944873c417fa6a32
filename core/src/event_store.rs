//! Event store abstraction.
//!
//! The store is the source of truth for every aggregate: an append-only,
//! ordered log per stream with optimistic concurrency on append.
//!
//! ```no_run
//! use roomledger_core::event_store::{EventStore, EventStoreError};
//! use roomledger_core::stream::{StreamId, Version};
//!
//! async fn replay(store: &dyn EventStore) -> Result<usize, EventStoreError> {
//!     let events = store.load_events(StreamId::new("reservation-1"), None).await?;
//!     Ok(events.len())
//! }
//! ```

use crate::event::SerializedEvent;
use crate::stream::{StreamId, Version};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event store operations.
#[derive(Error, Debug, Clone)]
pub enum EventStoreError {
    /// The stream moved on since it was loaded.
    #[error("Concurrency conflict on {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream ID where the conflict occurred.
        stream_id: StreamId,
        /// The version we expected the stream to be at.
        expected: Version,
        /// The actual current version of the stream.
        actual: Version,
    },

    /// Backend storage failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Boxed future returned by [`EventStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventStoreError>> + Send + 'a>>;

/// Append-only event log keyed by stream.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the store can be shared as
/// `Arc<dyn EventStore>` between the aggregate store and the application.
pub trait EventStore: Send + Sync {
    /// Append events to a stream with optimistic concurrency control.
    ///
    /// - `Some(version)`: the stream must currently be at `version`
    /// - `None`: append unconditionally
    ///
    /// Returns the stream version after the append.
    ///
    /// # Errors
    ///
    /// - [`EventStoreError::ConcurrencyConflict`] on a version mismatch
    /// - [`EventStoreError::Storage`] if the backend fails
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> StoreFuture<'_, Version>;

    /// Load the events of a stream in append order.
    ///
    /// `from_version` skips the first `from_version` events. An unknown
    /// stream yields an empty vector.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Storage`] if the backend fails.
    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> StoreFuture<'_, Vec<SerializedEvent>>;
}
