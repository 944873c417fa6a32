use roomledger_core::event::SerializedEvent;
use roomledger_core::event_bus::{BusFuture, EventBus, EventBusError, EventStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};

struct Subscriber {
    topics: Vec<String>,
    tx: mpsc::UnboundedSender<SerializedEvent>,
}

/// In-process event bus with one unbounded channel per subscriber.
///
/// Publishing delivers to every live subscription of the topic in publish
/// order, which preserves per-stream ordering as long as a single task
/// publishes each stream. Every published event is also kept in a log for
/// assertions.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    published: Arc<Mutex<Vec<(String, SerializedEvent)>>>,
    fail_publishes: Arc<AtomicBool>,
}

impl InMemoryEventBus {
    /// Create a bus with no subscribers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail (or stop doing so).
    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Every `(topic, event)` published so far.
    pub async fn published(&self) -> Vec<(String, SerializedEvent)> {
        self.published.lock().await.clone()
    }

    /// Number of live subscriptions.
    pub async fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }

    /// Drop every subscription; open streams end once drained.
    pub async fn close(&self) {
        self.subscribers.lock().await.clear();
    }
}

impl std::fmt::Debug for InMemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventBus").finish_non_exhaustive()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, topic: &str, event: &SerializedEvent) -> BusFuture<'_, ()> {
        let topic = topic.to_string();
        let event = event.clone();

        Box::pin(async move {
            if self.fail_publishes.load(Ordering::SeqCst) {
                return Err(EventBusError::PublishFailed {
                    topic,
                    reason: "publishing disabled".to_string(),
                });
            }

            {
                let mut subscribers = self.subscribers.lock().await;
                subscribers.retain(|subscriber| {
                    if !subscriber.topics.iter().any(|t| *t == topic) {
                        return !subscriber.tx.is_closed();
                    }
                    subscriber.tx.send(event.clone()).is_ok()
                });
            }
            self.published.lock().await.push((topic, event));
            Ok(())
        })
    }

    fn subscribe(&self, topics: &[&str]) -> BusFuture<'_, EventStream> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            if topics.is_empty() {
                return Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "no topics given".to_string(),
                });
            }

            let (tx, mut rx) = mpsc::unbounded_channel();
            self.subscribers.lock().await.push(Subscriber { topics, tx });

            let stream = async_stream::stream! {
                while let Some(event) = rx.recv().await {
                    yield Ok::<_, EventBusError>(event);
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }
}
