use roomledger_core::event::SerializedEvent;
use roomledger_core::event_store::{EventStore, EventStoreError, StoreFuture};
use roomledger_core::stream::{StreamId, Version};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// `HashMap`-backed event store with the same concurrency check as a real one.
///
/// Clones share the same streams.
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<StreamId, Vec<SerializedEvent>>>>,
    fail_appends: Arc<AtomicBool>,
}

impl InMemoryEventStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following append fail with a storage error (or stop doing so).
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Every event of one stream, in order.
    pub async fn stream(&self, stream_id: &StreamId) -> Vec<SerializedEvent> {
        self.streams
            .read()
            .await
            .get(stream_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Event types of one stream, in order.
    pub async fn event_types(&self, stream_id: &StreamId) -> Vec<String> {
        self.stream(stream_id)
            .await
            .into_iter()
            .map(|event| event.event_type)
            .collect()
    }

    /// Number of streams holding at least one event.
    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }
}

impl EventStore for InMemoryEventStore {
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> StoreFuture<'_, Version> {
        Box::pin(async move {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(EventStoreError::Storage(format!(
                    "append to {stream_id} refused"
                )));
            }

            let mut streams = self.streams.write().await;
            let current = Version::new(
                streams.get(&stream_id).map_or(0, |events| events.len() as u64),
            );

            if let Some(expected) = expected_version {
                if expected != current {
                    return Err(EventStoreError::ConcurrencyConflict {
                        stream_id,
                        expected,
                        actual: current,
                    });
                }
            }

            let count = events.len() as u64;
            if count > 0 {
                streams.entry(stream_id).or_default().extend(events);
            }
            Ok(current.advance(count))
        })
    }

    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> StoreFuture<'_, Vec<SerializedEvent>> {
        Box::pin(async move {
            let skip = from_version.map_or(0, Version::value);
            let streams = self.streams.read().await;
            Ok(streams
                .get(&stream_id)
                .map(|events| {
                    events
                        .iter()
                        .skip(usize::try_from(skip).unwrap_or(usize::MAX))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;

    fn event(kind: &str) -> SerializedEvent {
        SerializedEvent::new(kind.to_string(), vec![1], None)
    }

    #[tokio::test]
    async fn append_checks_expected_version() {
        let store = InMemoryEventStore::new();
        let id = StreamId::new("reservation-1");

        let v1 = store
            .append_events(id.clone(), Some(Version::INITIAL), vec![event("A")])
            .await
            .unwrap();
        assert_eq!(v1, Version::new(1));

        let conflict = store
            .append_events(id.clone(), Some(Version::INITIAL), vec![event("B")])
            .await;
        assert!(matches!(
            conflict,
            Err(EventStoreError::ConcurrencyConflict { actual, .. }) if actual == Version::new(1)
        ));

        assert_eq!(store.event_types(&id).await, vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn load_skips_to_version_and_tolerates_unknown_streams() {
        let store = InMemoryEventStore::new();
        let id = StreamId::new("reservation-2");
        store
            .append_events(id.clone(), None, vec![event("A"), event("B"), event("C")])
            .await
            .unwrap();

        let tail = store.load_events(id, Some(Version::new(2))).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].event_type, "C");

        let none = store
            .load_events(StreamId::new("missing"), None)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn failure_injection() {
        let store = InMemoryEventStore::new();
        store.set_fail_appends(true);
        let result = store
            .append_events(StreamId::new("x"), None, vec![event("A")])
            .await;
        assert!(matches!(result, Err(EventStoreError::Storage(_))));
        assert_eq!(store.stream_count().await, 0);
    }
}
