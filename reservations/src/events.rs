//! Events recorded on reservation streams.

use crate::types::{ReservationId, RoomId, TimeSlot};
use roomledger_core::event::{Event, EventError, SerializedEvent};
use serde::{Deserialize, Serialize};

/// `ReservationCreated` type id
pub const CREATED: &str = "ReservationCreated.v1";
/// `ReservationConfirmed` type id
pub const CONFIRMED: &str = "ReservationConfirmed.v1";
/// `ReservationDeclined` type id
pub const DECLINED: &str = "ReservationDeclined.v1";
/// `ReservationTimeChanged` type id
pub const TIME_CHANGED: &str = "ReservationTimeChanged.v1";
/// `ReservationCancelled` type id
pub const CANCELLED: &str = "ReservationCancelled.v1";
/// `ReservationBookingConflicted` type id
pub const BOOKING_CONFLICTED: &str = "ReservationBookingConflicted.v1";

/// Every event type this module can decode.
pub const ALL_TYPES: &[&str] = &[
    CREATED,
    CONFIRMED,
    DECLINED,
    TIME_CHANGED,
    CANCELLED,
    BOOKING_CONFLICTED,
];

/// Facts about a reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationEvent {
    /// A reservation was requested
    ReservationCreated {
        /// Reservation
        id: ReservationId,
        /// Requested room
        room_id: RoomId,
        /// Display name
        name: String,
        /// Owner
        user: String,
        /// Requested slot
        slot: TimeSlot,
    },

    /// The slot was granted
    ReservationConfirmed {
        /// Reservation
        id: ReservationId,
        /// Issuing user
        user: String,
    },

    /// The slot was refused
    ReservationDeclined {
        /// Reservation
        id: ReservationId,
        /// Issuing user
        user: String,
        /// Why
        message: String,
    },

    /// The reservation moved to a new slot
    ReservationTimeChanged {
        /// Reservation
        id: ReservationId,
        /// Room the reservation was created for
        room_id: RoomId,
        /// Issuing user
        user: String,
        /// New slot
        slot: TimeSlot,
    },

    /// The reservation was withdrawn
    ReservationCancelled {
        /// Reservation
        id: ReservationId,
        /// Issuing user
        user: String,
    },

    /// Recorded when a booking clash is detected on the write side.
    /// No command emits it today.
    ReservationBookingConflicted {
        /// Reservation
        id: ReservationId,
        /// Details
        message: String,
    },
}

impl ReservationEvent {
    /// The reservation this event belongs to
    #[must_use]
    pub const fn reservation_id(&self) -> ReservationId {
        match self {
            Self::ReservationCreated { id, .. }
            | Self::ReservationConfirmed { id, .. }
            | Self::ReservationDeclined { id, .. }
            | Self::ReservationTimeChanged { id, .. }
            | Self::ReservationCancelled { id, .. }
            | Self::ReservationBookingConflicted { id, .. } => *id,
        }
    }

    /// Decode an envelope, refusing types this module does not know.
    ///
    /// # Errors
    ///
    /// - [`EventError::UnknownEventType`] for an unrecognised type
    /// - [`EventError::TypeMismatch`] if the payload is another kind than declared
    /// - [`EventError::Deserialization`] for a corrupt payload
    pub fn from_serialized(serialized: &SerializedEvent) -> Result<Self, EventError> {
        if !ALL_TYPES.contains(&serialized.event_type.as_str()) {
            return Err(EventError::UnknownEventType(serialized.event_type.clone()));
        }
        Self::decode(serialized)
    }
}

impl Event for ReservationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::ReservationCreated { .. } => CREATED,
            Self::ReservationConfirmed { .. } => CONFIRMED,
            Self::ReservationDeclined { .. } => DECLINED,
            Self::ReservationTimeChanged { .. } => TIME_CHANGED,
            Self::ReservationCancelled { .. } => CANCELLED,
            Self::ReservationBookingConflicted { .. } => BOOKING_CONFLICTED,
        }
    }
}
