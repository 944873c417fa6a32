//! Read-model storage for projections.
//!
//! Projections fold the event stream into query-friendly snapshots (the
//! reservation view, the per-user billing history). They persist those
//! snapshots in a key-value [`ProjectionStore`] with last-write-wins
//! semantics per key.
//!
//! ```text
//! Write side:                 Read side:
//! ┌──────────────┐            ┌──────────────────────┐
//! │ event store  │            │ projection store     │
//! │ reservation-*│  ── bus ─► │ reservation:{id}     │
//! └──────────────┘            │ billing:{user}       │
//!                             └──────────────────────┘
//! ```

use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;

/// Errors raised by projection storage and projection handlers.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// The backend failed to read or write.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A stored entity could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An event could not be folded into the projection.
    #[error("Event processing error: {0}")]
    EventProcessing(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Key-value storage for projection snapshots.
///
/// A missing key is `Ok(None)`, never an error; projections build a fresh
/// default entity in that case.
pub trait ProjectionStore: Send + Sync {
    /// Store bytes under a key, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the backend fails.
    fn save(&self, key: &str, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Read the bytes stored under a key.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the backend fails.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Remove a key. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the backend fails.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Whether a key is present.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the backend fails.
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.get(key).await?.is_some()) }
    }

    /// Read and decode a bincode-encoded entity.
    ///
    /// # Errors
    ///
    /// - [`ProjectionError::Storage`] if the backend fails
    /// - [`ProjectionError::Serialization`] if the stored bytes do not decode
    fn find<T>(&self, key: &str) -> impl Future<Output = Result<Option<T>>> + Send
    where
        T: DeserializeOwned,
    {
        async move {
            self.get(key)
                .await?
                .map(|bytes| {
                    bincode::deserialize(&bytes)
                        .map_err(|e| ProjectionError::Serialization(e.to_string()))
                })
                .transpose()
        }
    }

    /// Encode an entity with bincode and store it.
    ///
    /// # Errors
    ///
    /// - [`ProjectionError::Serialization`] if the entity cannot be encoded
    /// - [`ProjectionError::Storage`] if the backend fails
    fn put<T>(&self, key: &str, entity: &T) -> impl Future<Output = Result<()>> + Send
    where
        T: Serialize + Sync,
    {
        async move {
            let bytes = bincode::serialize(entity)
                .map_err(|e| ProjectionError::Serialization(e.to_string()))?;
            self.save(key, &bytes).await
        }
    }
}
