//! Application wiring over the in-memory collaborators.
//!
//! ```text
//! submit/dispatch ─► CommandBus ─► AggregateStore<ReservationReducer> ─► event store
//!        ▲                                         │
//!        │                                   "reservations"
//!        │                 ┌───────────────┬─────┴──────┬──────────────┐
//!        │                 ▼               ▼            ▼              ▼
//!        └──────── ConflictArbiter   BillingLedger   ReservationView  EventLogger
//! ```

use crate::aggregate::{ReservationReducer, TOPIC};
use crate::arbiter::{ConflictArbiter, RoomSchedule, SCHEDULING_EVENTS};
use crate::billing::{BILLING_EVENTS, BillingError, BillingHistory, BillingLedger};
use crate::commands::{ReservationCommand, reservation_stream};
use crate::config::Config;
use crate::events::ReservationEvent;
use crate::logger::EventLogger;
use crate::types::{ReservationId, RoomId};
use crate::view::{ReservationView, ReservationViewProjector, ViewError};
use crate::wire::{CommandEnvelope, WireError};
use roomledger_core::command::{CommandDispatcher, CommandOutcome, DispatchError};
use roomledger_core::environment::{Clock, SystemClock};
use roomledger_core::event::EventError;
use roomledger_core::event_bus::{EventBus, EventBusError, EventFilter};
use roomledger_core::event_store::{EventStore, EventStoreError};
use roomledger_runtime::{
    AggregateStore, CommandBus, ConsumerError, ConsumerHandle, EventConsumer, EventHandler,
};
use roomledger_testing::InMemoryProjectionStore;
use roomledger_testing::mocks::{InMemoryEventBus, InMemoryEventStore};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::info;

/// Default wait used by [`ReservationSystem::settle`].
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Failures surfaced by the application facade.
#[derive(Error, Debug)]
pub enum AppError {
    /// Routing or handling a command failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A submitted envelope could not be decoded.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A consumer could not be configured.
    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    /// A consumer could not subscribe.
    #[error(transparent)]
    Bus(#[from] EventBusError),

    /// Reading the event store failed.
    #[error(transparent)]
    Store(#[from] EventStoreError),

    /// A stored event did not decode.
    #[error(transparent)]
    Codec(#[from] EventError),

    /// Reading a reservation view failed.
    #[error(transparent)]
    View(#[from] ViewError),

    /// Reading a billing history failed.
    #[error(transparent)]
    Billing(#[from] BillingError),

    /// Consumers did not catch up in time.
    #[error("Consumers did not settle within {0:?}")]
    SettleTimeout(Duration),
}

type Projections = InMemoryProjectionStore;

/// The running reservation system.
pub struct ReservationSystem {
    config: Config,
    event_store: Arc<InMemoryEventStore>,
    event_bus: Arc<InMemoryEventBus>,
    commands: Arc<CommandBus<ReservationCommand>>,
    arbiter: Arc<ConflictArbiter>,
    ledger: Arc<BillingLedger<Projections>>,
    views: Arc<ReservationViewProjector<Projections>>,
    consumers: Vec<ConsumerHandle>,
    shutdown: broadcast::Sender<()>,
}

impl ReservationSystem {
    /// Start the system with the wall clock.
    ///
    /// # Errors
    ///
    /// Returns an [`AppError`] if a handler cannot be registered or a
    /// consumer cannot subscribe.
    pub async fn start(config: Config) -> Result<Self, AppError> {
        Self::start_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Start the system with an explicit clock (event timestamps and billing month).
    ///
    /// # Errors
    ///
    /// Returns an [`AppError`] if a handler cannot be registered or a
    /// consumer cannot subscribe.
    pub async fn start_with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self, AppError> {
        let event_store = Arc::new(InMemoryEventStore::new());
        let event_bus = Arc::new(InMemoryEventBus::new());
        let projections = Arc::new(InMemoryProjectionStore::new());

        let aggregate = AggregateStore::new(
            ReservationReducer,
            (),
            Arc::clone(&event_store) as Arc<dyn EventStore>,
            Arc::clone(&event_bus) as Arc<dyn EventBus>,
            Arc::clone(&clock),
        );
        let commands: Arc<CommandBus<ReservationCommand>> = Arc::new(CommandBus::new());
        commands.register(ReservationCommand::KINDS, Arc::new(aggregate))?;

        let arbiter = Arc::new(ConflictArbiter::new(
            config.rooms.iter().copied(),
            Arc::clone(&commands) as Arc<dyn CommandDispatcher<ReservationCommand>>,
        ));
        let ledger = Arc::new(BillingLedger::new(
            Arc::clone(&projections),
            clock,
            config.price_per_minute,
        ));
        let views = Arc::new(ReservationViewProjector::new(projections));

        let (shutdown, _) = broadcast::channel(1);
        let subscriptions: [(&str, EventFilter, Arc<dyn EventHandler>); 4] = [
            (
                "arbiter",
                EventFilter::kinds(SCHEDULING_EVENTS.iter().copied()),
                Arc::clone(&arbiter) as Arc<dyn EventHandler>,
            ),
            (
                "billing",
                EventFilter::kinds(BILLING_EVENTS.iter().copied()),
                Arc::clone(&ledger) as Arc<dyn EventHandler>,
            ),
            (
                "reservation-view",
                EventFilter::All,
                Arc::clone(&views) as Arc<dyn EventHandler>,
            ),
            ("event-logger", EventFilter::All, Arc::new(EventLogger)),
        ];

        let mut consumers = Vec::with_capacity(subscriptions.len());
        for (name, filter, handler) in subscriptions {
            let consumer = EventConsumer::builder()
                .name(name)
                .topics(vec![TOPIC.to_string()])
                .filter(filter)
                .event_bus(Arc::clone(&event_bus) as Arc<dyn EventBus>)
                .handler(handler)
                .lanes(config.consumer_lanes)
                .build()?;
            consumers.push(consumer.start(shutdown.subscribe()).await?);
        }

        info!(
            rooms = config.rooms.len(),
            rate = %config.price_per_minute,
            lanes = config.consumer_lanes,
            "Reservation system started"
        );

        Ok(Self {
            config,
            event_store,
            event_bus,
            commands,
            arbiter,
            ledger,
            views,
            consumers,
            shutdown,
        })
    }

    /// Configuration the system was started with.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Dispatch a command through the command bus.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Dispatch`] if routing, appending or publishing
    /// fails. Domain rejections are an `Ok` [`CommandOutcome::Rejected`].
    pub async fn dispatch(&self, command: ReservationCommand) -> Result<CommandOutcome, AppError> {
        Ok(self.commands.dispatch(command).await?)
    }

    /// Decode a wire envelope and dispatch it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Wire`] for undecodable envelopes and otherwise
    /// behaves like [`dispatch`](Self::dispatch).
    pub async fn submit(&self, envelope: CommandEnvelope) -> Result<CommandOutcome, AppError> {
        let command = envelope.into_command()?;
        self.dispatch(command).await
    }

    /// Current view of a reservation.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::View`] if the read model cannot be read.
    pub async fn reservation(&self, id: ReservationId) -> Result<Option<ReservationView>, AppError> {
        Ok(self.views.view(id).await?)
    }

    /// A user's billing history.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Billing`] if the read model cannot be read.
    pub async fn billing_history(&self, user: &str) -> Result<Option<BillingHistory>, AppError> {
        Ok(self.ledger.history(user).await?)
    }

    /// Snapshot of the arbiter's schedule for one room.
    pub async fn schedule(&self, room: RoomId) -> Option<RoomSchedule> {
        self.arbiter.schedule(room).await
    }

    /// Every event recorded for a reservation, in order.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] or [`AppError::Codec`] if loading fails.
    pub async fn events(&self, id: ReservationId) -> Result<Vec<ReservationEvent>, AppError> {
        let stored = self
            .event_store
            .load_events(reservation_stream(id), None)
            .await?;
        Ok(stored
            .iter()
            .map(ReservationEvent::from_serialized)
            .collect::<Result<_, _>>()?)
    }

    /// Wait until every consumer has processed every published event.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SettleTimeout`] after [`SETTLE_TIMEOUT`].
    pub async fn settle(&self) -> Result<(), AppError> {
        self.settle_within(SETTLE_TIMEOUT).await
    }

    /// [`settle`](Self::settle) with an explicit timeout.
    ///
    /// Arbiter follow-up commands are published before the arbiter finishes
    /// the event that caused them, so once every consumer has completed
    /// everything published nothing is left in flight.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SettleTimeout`] if consumers are still busy.
    pub async fn settle_within(&self, timeout: Duration) -> Result<(), AppError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let published = self.event_bus.published().await.len() as u64;
            let caught_up = self
                .consumers
                .iter()
                .all(|consumer| consumer.progress().completed() >= published);
            if caught_up && self.event_bus.published().await.len() as u64 == published {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::SettleTimeout(timeout));
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Signal every consumer to stop and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        for consumer in self.consumers {
            consumer.join().await;
        }
        info!("Reservation system stopped");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;
    use chrono::Duration as ChronoDuration;
    use roomledger_testing::mocks::test_time;

    #[tokio::test]
    async fn create_is_confirmed_by_the_arbiter() {
        let system = ReservationSystem::start_with_clock(
            Config::default(),
            Arc::new(roomledger_testing::test_clock()),
        )
        .await
        .unwrap();
        let id = ReservationId::new();

        let outcome = system
            .dispatch(ReservationCommand::CreateReservation {
                id,
                name: "Standup".into(),
                user: "Matt".into(),
                room_id: RoomId::new(1),
                start: test_time(),
                end: test_time() + ChronoDuration::minutes(15),
            })
            .await
            .unwrap();
        assert!(outcome.is_accepted());

        system.settle().await.unwrap();
        let view = system.reservation(id).await.unwrap().unwrap();
        assert_eq!(view.status.as_str(), "confirmed");
        assert_eq!(view.version, 2);
        assert_eq!(system.events(id).await.unwrap().len(), 2);
        assert!(system.schedule(RoomId::new(1)).await.unwrap().holds(id));

        system.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_kinds_are_rejected_before_dispatch() {
        let system = ReservationSystem::start(Config::default()).await.unwrap();
        let envelope = CommandEnvelope {
            command_type: "DeleteReservation".into(),
            payload: serde_json::json!({}),
        };
        assert!(matches!(
            system.submit(envelope).await,
            Err(AppError::Wire(WireError::UnknownCommandType(_)))
        ));
        system.shutdown().await;
    }
}
