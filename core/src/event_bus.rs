//! Event bus abstraction for fanning appended events out to subscribers.
//!
//! ```text
//! command ──► aggregate store ──► event store (source of truth)
//!                                      │
//!                                      ▼
//!                                 event bus  ── at-least-once, ordered per stream
//!                              ┌───────┼────────┬─────────┐
//!                              ▼       ▼        ▼         ▼
//!                          arbiter  billing   view     logger
//! ```
//!
//! Events are persisted before they are published. Delivery is at-least-once
//! and ordered for a single stream; nothing is promised across streams, so
//! subscribers must be idempotent.

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// The bus has been shut down
    #[error("Event bus closed")]
    Closed,
}

/// Stream of events from a subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SerializedEvent, EventBusError>> + Send>>;

/// Boxed future returned by [`EventBus`] methods.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// Publish/subscribe transport between the write side and its consumers.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the bus can be shared as `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the event cannot be delivered.
    fn publish(&self, topic: &str, event: &SerializedEvent) -> BusFuture<'_, ()>;

    /// Subscribe to one or more topics.
    ///
    /// Only events published after the subscription exists are delivered.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription cannot be opened.
    fn subscribe(&self, topics: &[&str]) -> BusFuture<'_, EventStream>;
}

/// Which events a subscriber wants to see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventFilter {
    /// Every event on the subscribed topics.
    All,
    /// Only events whose type is in the list.
    Kinds(Vec<String>),
}

impl EventFilter {
    /// Filter matching the given event types.
    #[must_use]
    pub fn kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Kinds(kinds.into_iter().map(Into::into).collect())
    }

    /// Whether an event passes this filter.
    #[must_use]
    pub fn matches(&self, event: &SerializedEvent) -> bool {
        match self {
            Self::All => true,
            Self::Kinds(kinds) => kinds.iter().any(|kind| *kind == event.event_type),
        }
    }
}
