//! Read-only snapshot of one reservation.

use crate::events::ReservationEvent;
use crate::read_model::reservation_key;
use crate::types::{ReservationId, ReservationStatus, RoomId, TimeSlot};
use async_trait::async_trait;
use roomledger_core::event::{EventError, SerializedEvent};
use roomledger_core::projection::{ProjectionError, ProjectionStore};
use roomledger_runtime::{EventHandler, HandlerError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// View projector failures.
#[derive(Error, Debug)]
pub enum ViewError {
    /// The event type is not part of the reservation stream.
    #[error("Could not handle event: {0}")]
    UnexpectedEvent(String),

    /// The event payload does not decode.
    #[error(transparent)]
    Codec(EventError),

    /// Reading or writing the view failed.
    #[error("Reservation view projection failed: {0}")]
    Projection(#[from] ProjectionError),
}

impl From<EventError> for ViewError {
    fn from(error: EventError) -> Self {
        match error {
            EventError::UnknownEventType(kind) => Self::UnexpectedEvent(kind),
            other => Self::Codec(other),
        }
    }
}

/// Denormalized reservation for queries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationView {
    /// Reservation
    pub id: ReservationId,
    /// Number of events folded in
    pub version: u64,
    /// Display name
    pub name: String,
    /// Owner
    pub creator: String,
    /// Booked room
    pub room_id: Option<RoomId>,
    /// Current slot
    pub slot: Option<TimeSlot>,
    /// Current status
    pub status: ReservationStatus,
}

impl ReservationView {
    /// Zeroed view for a reservation nothing is known about yet.
    #[must_use]
    pub fn empty(id: ReservationId) -> Self {
        Self {
            id,
            version: 0,
            name: String::new(),
            creator: String::new(),
            room_id: None,
            slot: None,
            status: ReservationStatus::Pending,
        }
    }
}

/// Fold one event into the prior snapshot (or a fresh one).
///
/// Every event bumps the version by exactly one.
#[must_use]
pub fn project(prior: Option<ReservationView>, event: &ReservationEvent) -> ReservationView {
    let mut view = prior.unwrap_or_else(|| ReservationView::empty(event.reservation_id()));
    match event {
        ReservationEvent::ReservationCreated {
            id,
            room_id,
            name,
            user,
            slot,
        } => {
            view.id = *id;
            view.room_id = Some(*room_id);
            view.name.clone_from(name);
            view.creator.clone_from(user);
            view.slot = Some(*slot);
            view.status = ReservationStatus::Pending;
        }
        ReservationEvent::ReservationConfirmed { .. } => view.status = ReservationStatus::Confirmed,
        ReservationEvent::ReservationDeclined { .. }
        | ReservationEvent::ReservationBookingConflicted { .. } => {
            view.status = ReservationStatus::Declined;
        }
        ReservationEvent::ReservationTimeChanged { slot, .. } => {
            view.slot = Some(*slot);
            view.status = ReservationStatus::Pending;
        }
        ReservationEvent::ReservationCancelled { .. } => view.status = ReservationStatus::Cancelled,
    }
    view.version += 1;
    view
}

/// Keeps `reservation:{id}` up to date in the projection store.
pub struct ReservationViewProjector<S> {
    store: Arc<S>,
}

impl<S: ProjectionStore> ReservationViewProjector<S> {
    /// Create a projector writing to `store`.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Current view of a reservation.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::Projection`] if the store fails.
    pub async fn view(&self, id: ReservationId) -> Result<Option<ReservationView>, ViewError> {
        Ok(self.store.find(&reservation_key(id)).await?)
    }

    /// Decode, fold and save one event.
    ///
    /// Redelivered events (stream version not past the view's version) are
    /// skipped so the version stays equal to the number of events folded.
    ///
    /// # Errors
    ///
    /// - [`ViewError::UnexpectedEvent`] for event types outside the reservation stream
    /// - [`ViewError::Codec`] for payloads that do not match their type
    /// - [`ViewError::Projection`] if the store fails
    pub async fn apply(&self, serialized: &SerializedEvent) -> Result<(), ViewError> {
        let event = ReservationEvent::from_serialized(serialized)?;
        let key = reservation_key(event.reservation_id());
        let prior: Option<ReservationView> = self.store.find(&key).await?;

        if let (Some(view), Some(version)) = (&prior, serialized.version()) {
            if version.value() <= view.version {
                debug!(%key, version = version.value(), "View already includes event");
                return Ok(());
            }
        }

        let view = project(prior, &event);
        self.store.put(&key, &view).await?;
        debug!(%key, version = view.version, status = %view.status, "View updated");
        Ok(())
    }
}

#[async_trait]
impl<S> EventHandler for ReservationViewProjector<S>
where
    S: ProjectionStore + 'static,
{
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
        self.apply(event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;
    use chrono::Duration;
    use roomledger_core::stream::Version;
    use roomledger_testing::InMemoryProjectionStore;
    use roomledger_testing::mocks::test_time;

    fn slot(hours: i64) -> TimeSlot {
        TimeSlot::new(test_time(), test_time() + Duration::hours(hours)).unwrap()
    }

    fn created(id: ReservationId) -> ReservationEvent {
        ReservationEvent::ReservationCreated {
            id,
            room_id: RoomId::new(3),
            name: "Retro".into(),
            user: "Matt".into(),
            slot: slot(1),
        }
    }

    fn envelope(event: &ReservationEvent, version: u64) -> SerializedEvent {
        let metadata = SerializedEvent::stream_metadata(
            &crate::commands::reservation_stream(event.reservation_id()),
            Version::new(version),
            test_time(),
        );
        SerializedEvent::from_event(event, Some(metadata)).unwrap()
    }

    #[test]
    fn every_event_bumps_the_version() {
        let id = ReservationId::new();
        let events = [
            created(id),
            ReservationEvent::ReservationConfirmed {
                id,
                user: "Scheduler".into(),
            },
            ReservationEvent::ReservationTimeChanged {
                id,
                room_id: RoomId::new(3),
                user: "Matt".into(),
                slot: slot(2),
            },
            ReservationEvent::ReservationCancelled {
                id,
                user: "Matt".into(),
            },
        ];

        let view = events.iter().fold(None, |view, event| Some(project(view, event)));
        let view = view.unwrap();
        assert_eq!(view.version, 4);
        assert_eq!(view.status, ReservationStatus::Cancelled);
        assert_eq!(view.slot, Some(slot(2)));
        assert_eq!(view.creator, "Matt");
    }

    #[test]
    fn booking_conflict_reads_as_declined() {
        let id = ReservationId::new();
        let view = project(
            Some(project(None, &created(id))),
            &ReservationEvent::ReservationBookingConflicted {
                id,
                message: "clash".into(),
            },
        );
        assert_eq!(view.status, ReservationStatus::Declined);
        assert_eq!(view.version, 2);
    }

    #[test]
    fn first_event_need_not_be_created() {
        let id = ReservationId::new();
        let view = project(
            None,
            &ReservationEvent::ReservationConfirmed {
                id,
                user: "Scheduler".into(),
            },
        );
        assert_eq!(view.id, id);
        assert_eq!(view.version, 1);
        assert_eq!(view.status, ReservationStatus::Confirmed);
    }

    #[tokio::test]
    async fn projector_saves_and_skips_redelivery() {
        let store = Arc::new(InMemoryProjectionStore::new());
        let projector = ReservationViewProjector::new(Arc::clone(&store));
        let id = ReservationId::new();
        let first = envelope(&created(id), 1);

        projector.apply(&first).await.unwrap();
        projector.apply(&first).await.unwrap();

        let view = projector.view(id).await.unwrap().unwrap();
        assert_eq!(view.version, 1);
        assert_eq!(store.keys(), vec![reservation_key(id)]);
    }

    #[tokio::test]
    async fn unknown_event_types_fail_loudly() {
        let projector = ReservationViewProjector::new(Arc::new(InMemoryProjectionStore::new()));
        let event = SerializedEvent::new("ReservationArchived.v1".into(), vec![], None);
        assert!(matches!(
            projector.apply(&event).await,
            Err(ViewError::UnexpectedEvent(kind)) if kind == "ReservationArchived.v1"
        ));
    }
}
