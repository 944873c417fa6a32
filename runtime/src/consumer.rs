//! Event bus consumer with per-stream ordering.
//!
//! An [`EventConsumer`] owns one subscription and hands each event to an
//! [`EventHandler`]. Events are spread over a fixed number of lanes by
//! hashing their stream id:
//!
//! ```text
//!                      ┌─► lane 0 ─► handler (sequential)
//! subscription ─ filter┼─► lane 1 ─► handler (sequential)
//!                      └─► lane n ─► handler (sequential)
//! ```
//!
//! All events of one stream land on the same lane and are handled in order;
//! events of different streams run concurrently. Handler errors are logged
//! and counted but never stop the consumer.
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = EventConsumer::builder()
//!     .name("billing")
//!     .topics(vec!["reservations".to_string()])
//!     .filter(EventFilter::All)
//!     .event_bus(event_bus)
//!     .handler(handler)
//!     .lanes(4)
//!     .build()?;
//!
//! let handle = consumer.start(shutdown_rx).await?;
//! ```

use crate::metrics::ConsumerMetrics;
use async_trait::async_trait;
use futures::StreamExt;
use roomledger_core::event::SerializedEvent;
use roomledger_core::event_bus::{EventBus, EventBusError, EventFilter, EventStream};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Error type returned by event handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processing logic plugged into an [`EventConsumer`].
///
/// Handlers receive the serialized envelope so they can filter on the event
/// type and read stream metadata before decoding the payload.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Any error is logged and counted by the consumer; processing continues
    /// with the next event.
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError>;
}

/// Errors building a consumer.
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// A required builder field was not set.
    #[error("Consumer builder is missing '{0}'")]
    MissingField(&'static str),
}

/// Counters describing how far a consumer has got.
#[derive(Debug, Default)]
pub struct ConsumerProgress {
    received: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl ConsumerProgress {
    /// Events taken off the subscription.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }

    /// Events fully processed, including filtered-out and failed ones.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Events whose handler returned an error.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

/// A running consumer.
pub struct ConsumerHandle {
    name: String,
    progress: Arc<ConsumerProgress>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Consumer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Live progress counters.
    #[must_use]
    pub fn progress(&self) -> Arc<ConsumerProgress> {
        Arc::clone(&self.progress)
    }

    /// Wait for the consumer to stop (after shutdown or when its stream ends).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(consumer = %self.name, error = %e, "Consumer task failed");
        }
    }
}

/// Subscription loop feeding an [`EventHandler`].
pub struct EventConsumer {
    name: String,
    topics: Vec<String>,
    filter: EventFilter,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    lanes: usize,
    lane_capacity: usize,
}

impl EventConsumer {
    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> EventConsumerBuilder {
        EventConsumerBuilder::default()
    }

    /// Subscribe, then spawn the processing loop.
    ///
    /// The subscription exists when this returns, so every event published
    /// afterwards is seen.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError`] if the subscription cannot be opened.
    pub async fn start(
        self,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<ConsumerHandle, EventBusError> {
        let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        let stream = self.event_bus.subscribe(&topics).await?;

        info!(
            consumer = %self.name,
            topics = ?self.topics,
            lanes = self.lanes,
            "Consumer subscribed"
        );

        let name = self.name.clone();
        let progress = Arc::new(ConsumerProgress::default());
        let task = tokio::spawn(self.run(stream, shutdown, Arc::clone(&progress)));

        Ok(ConsumerHandle {
            name,
            progress,
            task,
        })
    }

    async fn run(
        self,
        mut stream: EventStream,
        mut shutdown: broadcast::Receiver<()>,
        progress: Arc<ConsumerProgress>,
    ) {
        let mut lanes = Vec::with_capacity(self.lanes);
        let mut workers = Vec::with_capacity(self.lanes);
        for lane in 0..self.lanes {
            let (tx, rx) = mpsc::channel(self.lane_capacity);
            lanes.push(tx);
            workers.push(tokio::spawn(run_lane(
                self.name.clone(),
                lane,
                rx,
                Arc::clone(&self.handler),
                Arc::clone(&progress),
            )));
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!(consumer = %self.name, "Shutdown signal received");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        progress.received.fetch_add(1, Ordering::SeqCst);
                        if !self.filter.matches(&event) {
                            progress.completed.fetch_add(1, Ordering::SeqCst);
                            continue;
                        }
                        let lane = lane_for(&event, lanes.len());
                        if lanes[lane].send(event).await.is_err() {
                            error!(consumer = %self.name, lane, "Lane closed unexpectedly");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(consumer = %self.name, error = %e, "Event stream error");
                    }
                    None => {
                        info!(consumer = %self.name, "Event stream ended");
                        break;
                    }
                }
            }
        }

        drop(lanes);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(consumer = %self.name, error = %e, "Lane task failed");
            }
        }
        info!(consumer = %self.name, "Consumer stopped");
    }
}

async fn run_lane(
    consumer: String,
    lane: usize,
    mut rx: mpsc::Receiver<SerializedEvent>,
    handler: Arc<dyn EventHandler>,
    progress: Arc<ConsumerProgress>,
) {
    while let Some(event) = rx.recv().await {
        match handler.handle(&event).await {
            Ok(()) => {
                ConsumerMetrics::record_handled(&consumer);
                debug!(%consumer, lane, event_type = %event.event_type, "Event handled");
            }
            Err(e) => {
                ConsumerMetrics::record_failed(&consumer);
                progress.failed.fetch_add(1, Ordering::SeqCst);
                error!(
                    %consumer,
                    lane,
                    event_type = %event.event_type,
                    stream_id = ?event.stream_id(),
                    error = %e,
                    "Event handler failed"
                );
            }
        }
        progress.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Lane for an event: same stream, same lane.
fn lane_for(event: &SerializedEvent, lanes: usize) -> usize {
    if lanes <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    match event.stream_id() {
        Some(stream_id) => stream_id.hash(&mut hasher),
        None => event.event_type.hash(&mut hasher),
    }
    usize::try_from(hasher.finish() % lanes as u64).unwrap_or(0)
}

/// Builder for [`EventConsumer`].
#[derive(Default)]
pub struct EventConsumerBuilder {
    name: Option<String>,
    topics: Vec<String>,
    filter: Option<EventFilter>,
    event_bus: Option<Arc<dyn EventBus>>,
    handler: Option<Arc<dyn EventHandler>>,
    lanes: Option<usize>,
    lane_capacity: Option<usize>,
}

impl EventConsumerBuilder {
    /// Consumer name used in logs and metrics.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Topics to subscribe to.
    #[must_use]
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    /// Which events reach the handler (default: all).
    #[must_use]
    pub fn filter(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Bus to subscribe on.
    #[must_use]
    pub fn event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Handler for matching events.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Number of parallel lanes (default 1, minimum 1).
    #[must_use]
    pub fn lanes(mut self, lanes: usize) -> Self {
        self.lanes = Some(lanes.max(1));
        self
    }

    /// Buffered events per lane before the subscription waits (default 256).
    #[must_use]
    pub fn lane_capacity(mut self, capacity: usize) -> Self {
        self.lane_capacity = Some(capacity.max(1));
        self
    }

    /// Build the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::MissingField`] if name, topics, event bus or
    /// handler were not set.
    pub fn build(self) -> Result<EventConsumer, ConsumerError> {
        if self.topics.is_empty() {
            return Err(ConsumerError::MissingField("topics"));
        }
        Ok(EventConsumer {
            name: self.name.ok_or(ConsumerError::MissingField("name"))?,
            topics: self.topics,
            filter: self.filter.unwrap_or(EventFilter::All),
            event_bus: self.event_bus.ok_or(ConsumerError::MissingField("event_bus"))?,
            handler: self.handler.ok_or(ConsumerError::MissingField("handler"))?,
            lanes: self.lanes.unwrap_or(1),
            lane_capacity: self.lane_capacity.unwrap_or(256),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;
    use roomledger_core::stream::{StreamId, Version};
    use roomledger_testing::helpers::eventually;
    use roomledger_testing::mocks::InMemoryEventBus;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, u64)>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
            if event.event_type == "Broken.v1" {
                return Err("cannot handle broken events".into());
            }
            let stream = event.stream_id().map(StreamId::into_inner).unwrap_or_default();
            let version = event.version().map_or(0, Version::value);
            self.seen.lock().await.push((stream, version));
            Ok(())
        }
    }

    fn event(kind: &str, stream: &str, version: u64) -> SerializedEvent {
        let metadata = SerializedEvent::stream_metadata(
            &StreamId::new(stream),
            Version::new(version),
            roomledger_core::Utc::now(),
        );
        SerializedEvent::new(kind.to_string(), vec![], Some(metadata))
    }

    async fn start(
        bus: &Arc<InMemoryEventBus>,
        handler: Arc<Recorder>,
        filter: EventFilter,
    ) -> (ConsumerHandle, broadcast::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let consumer = EventConsumer::builder()
            .name("recorder")
            .topics(vec!["reservations".to_string()])
            .filter(filter)
            .event_bus(Arc::clone(bus) as Arc<dyn EventBus>)
            .handler(handler)
            .lanes(4)
            .build()
            .unwrap();
        (consumer.start(shutdown_rx).await.unwrap(), shutdown_tx)
    }

    #[tokio::test]
    async fn keeps_per_stream_order_across_lanes() {
        let bus = Arc::new(InMemoryEventBus::new());
        let recorder = Arc::new(Recorder::default());
        let (handle, shutdown) = start(&bus, Arc::clone(&recorder), EventFilter::All).await;

        for version in 1..=20 {
            for stream in ["reservation-a", "reservation-b", "reservation-c"] {
                bus.publish("reservations", &event("X.v1", stream, version))
                    .await
                    .unwrap();
            }
        }

        let progress = handle.progress();
        assert!(eventually(Duration::from_secs(2), || async { progress.completed() == 60 }).await);

        let seen = recorder.seen.lock().await.clone();
        for stream in ["reservation-a", "reservation-b", "reservation-c"] {
            let versions: Vec<u64> = seen
                .iter()
                .filter(|(s, _)| s == stream)
                .map(|(_, v)| *v)
                .collect();
            assert_eq!(versions, (1..=20).collect::<Vec<_>>());
        }

        shutdown.send(()).unwrap();
        handle.join().await;
    }

    #[tokio::test]
    async fn filter_and_failures_do_not_stop_processing() {
        let bus = Arc::new(InMemoryEventBus::new());
        let recorder = Arc::new(Recorder::default());
        let filter = EventFilter::kinds(["Wanted.v1", "Broken.v1"]);
        let (handle, shutdown) = start(&bus, Arc::clone(&recorder), filter).await;

        bus.publish("reservations", &event("Ignored.v1", "r-1", 1)).await.unwrap();
        bus.publish("reservations", &event("Broken.v1", "r-1", 2)).await.unwrap();
        bus.publish("reservations", &event("Wanted.v1", "r-1", 3)).await.unwrap();

        let progress = handle.progress();
        assert!(eventually(Duration::from_secs(2), || async { progress.completed() == 3 }).await);
        assert_eq!(progress.received(), 3);
        assert_eq!(progress.failed(), 1);
        assert_eq!(
            recorder.seen.lock().await.clone(),
            vec![("r-1".to_string(), 3)]
        );

        shutdown.send(()).unwrap();
        handle.join().await;
    }

    #[tokio::test]
    async fn stops_when_the_bus_closes() {
        let bus = Arc::new(InMemoryEventBus::new());
        let (handle, _shutdown) = start(&bus, Arc::new(Recorder::default()), EventFilter::All).await;
        bus.close().await;
        tokio::time::timeout(Duration::from_secs(2), handle.join())
            .await
            .unwrap();
    }

    #[test]
    fn builder_requires_handler() {
        let result = EventConsumer::builder()
            .name("x")
            .topics(vec!["t".to_string()])
            .event_bus(Arc::new(InMemoryEventBus::new()))
            .build();
        assert!(matches!(result, Err(ConsumerError::MissingField("handler"))));
    }
}
