//! Event-sourced command handling for one aggregate type.
//!
//! For each command the store:
//!
//! 1. takes the stream's exclusive section (one command per stream at a time)
//! 2. loads and replays the stream into a fresh state
//! 3. reduces the command
//! 4. appends every persisted event with an expected-version check, applies
//!    it, and publishes it on the aggregate's topic
//!
//! Publishing happens before the exclusive section is released, so the bus
//! sees each stream's events in append order.

use crate::metrics::{CommandMetrics, EventStoreMetrics};
use roomledger_core::command::{
    Command, CommandDispatcher, CommandOutcome, DispatchError, DispatchFuture,
};
use roomledger_core::effect::Effect;
use roomledger_core::environment::Clock;
use roomledger_core::event::{Event, SerializedEvent};
use roomledger_core::event_bus::EventBus;
use roomledger_core::event_store::EventStore;
use roomledger_core::reducer::Reducer;
use roomledger_core::stream::{StreamId, Version};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// A reducer whose actions are either commands or the events they produce.
pub trait Aggregate: Reducer + Send + Sync + 'static {
    /// Commands this aggregate accepts.
    type Command: Command;

    /// Events this aggregate records.
    type Event: Event + Serialize + DeserializeOwned;

    /// Topic the aggregate's events are published on.
    fn topic(&self) -> &'static str;

    /// Wrap a command as a reducer action.
    fn command_action(command: Self::Command) -> Self::Action;

    /// Wrap an event as a reducer action.
    fn event_action(event: Self::Event) -> Self::Action;

    /// Unwrap a persisted action back into its event.
    fn into_event(action: Self::Action) -> Option<Self::Event>;
}

/// Command handler that executes an [`Aggregate`] against an event store.
pub struct AggregateStore<R>
where
    R: Aggregate,
    R::State: Default + Send,
    R::Action: Send,
    R::Environment: Send + Sync,
{
    reducer: R,
    env: R::Environment,
    event_store: Arc<dyn EventStore>,
    event_bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    stream_locks: Mutex<HashMap<StreamId, Arc<Mutex<()>>>>,
}

impl<R> AggregateStore<R>
where
    R: Aggregate,
    R::State: Default + Send,
    R::Action: Send,
    R::Environment: Send + Sync,
{
    /// Create a store for one aggregate type.
    #[must_use]
    pub fn new(
        reducer: R,
        env: R::Environment,
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reducer,
            env,
            event_store,
            event_bus,
            clock,
            stream_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuild the current state of a stream from its events.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Store`] if loading fails and
    /// [`DispatchError::Codec`] if a stored event does not decode.
    pub async fn load(&self, stream_id: &StreamId) -> Result<(R::State, Version), DispatchError> {
        let history = self.event_store.load_events(stream_id.clone(), None).await?;
        let mut state = R::State::default();
        for serialized in &history {
            let event =
                R::Event::decode(serialized).map_err(|e| DispatchError::Codec(e.to_string()))?;
            let _ = self
                .reducer
                .reduce(&mut state, R::event_action(event), &self.env);
        }
        Ok((state, Version::new(history.len() as u64)))
    }

    /// Handle one command.
    ///
    /// Appending and publishing are two separate steps. A
    /// [`DispatchError::Bus`] therefore means the event *was* stored but
    /// never reached subscribers: no consumer reacts to it, so downstream
    /// views and sagas stay where they were (a new reservation stays
    /// pending with no decision). Retrying the command replays the stored
    /// event first, so it is usually rejected or unchanged rather than
    /// republished.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] if the stream cannot be loaded, an event
    /// cannot be appended (including concurrency conflicts), or publishing fails.
    #[tracing::instrument(skip(self, command), fields(kind = command.kind(), stream_id = %command.stream_id()))]
    pub async fn handle(&self, command: R::Command) -> Result<CommandOutcome, DispatchError> {
        let started = Instant::now();
        let kind = command.kind();
        let stream_id = command.stream_id();

        let lock = self.stream_lock(&stream_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.execute(&stream_id, command).await
        };
        drop(lock);
        self.prune_locks().await;

        let outcome_label = result.as_ref().map_or("error", CommandOutcome::label);
        CommandMetrics::record(kind, outcome_label, started.elapsed());
        result
    }

    async fn execute(
        &self,
        stream_id: &StreamId,
        command: R::Command,
    ) -> Result<CommandOutcome, DispatchError> {
        let (mut state, mut version) = self.load(stream_id).await?;
        tracing::debug!(%version, "Stream replayed");

        let effects = self
            .reducer
            .reduce(&mut state, R::command_action(command), &self.env);

        let mut outcome = CommandOutcome::Unchanged;
        for effect in effects {
            match effect {
                Effect::None => {}
                Effect::Persist(action) => {
                    let event = R::into_event(action).ok_or_else(|| {
                        DispatchError::Codec("persisted action is not an event".to_string())
                    })?;
                    version = self.append(stream_id, version, &event).await?;
                    let _ = self
                        .reducer
                        .reduce(&mut state, R::event_action(event), &self.env);
                    outcome = CommandOutcome::Accepted { version };
                }
                Effect::Reject(reason) => {
                    tracing::warn!(%reason, "Command rejected");
                    if !outcome.is_accepted() {
                        outcome = CommandOutcome::Rejected { reason };
                    }
                }
                Effect::Dispatch(_) => {
                    tracing::warn!("Aggregates cannot dispatch commands; effect ignored");
                }
            }
        }
        Ok(outcome)
    }

    async fn append(
        &self,
        stream_id: &StreamId,
        version: Version,
        event: &R::Event,
    ) -> Result<Version, DispatchError> {
        let metadata = SerializedEvent::stream_metadata(stream_id, version.next(), self.clock.now());
        let serialized = SerializedEvent::from_event(event, Some(metadata))
            .map_err(|e| DispatchError::Codec(e.to_string()))?;

        let new_version = self
            .event_store
            .append_events(stream_id.clone(), Some(version), vec![serialized.clone()])
            .await?;
        EventStoreMetrics::record_persisted(&serialized.event_type);

        self.event_bus
            .publish(self.reducer.topic(), &serialized)
            .await?;

        tracing::info!(
            event_type = %serialized.event_type,
            version = %new_version,
            "Event persisted and published"
        );
        Ok(new_version)
    }

    async fn stream_lock(&self, stream_id: &StreamId) -> Arc<Mutex<()>> {
        let mut locks = self.stream_locks.lock().await;
        Arc::clone(locks.entry(stream_id.clone()).or_default())
    }

    async fn prune_locks(&self) {
        self.stream_locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

impl<R> CommandDispatcher<R::Command> for AggregateStore<R>
where
    R: Aggregate,
    R::State: Default + Send,
    R::Action: Send,
    R::Environment: Send + Sync,
{
    fn dispatch(&self, command: R::Command) -> DispatchFuture<'_> {
        Box::pin(self.handle(command))
    }
}
