//! Commands accepted by the reservation aggregate.

use crate::types::{ReservationId, RoomId};
use chrono::{DateTime, Utc};
use roomledger_core::command::Command;
use roomledger_core::stream::StreamId;
use serde::{Deserialize, Serialize};

/// Aggregate name used to build stream ids.
pub const AGGREGATE_TYPE: &str = "reservation";

/// Requests addressed to one reservation.
///
/// Times are carried unchecked; the aggregate rejects `end <= start`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationCommand {
    /// Book `room_id` for `[start, end)`
    CreateReservation {
        /// Reservation to create
        id: ReservationId,
        /// Display name
        name: String,
        /// Requesting user
        user: String,
        /// Room to book
        room_id: RoomId,
        /// Requested start
        start: DateTime<Utc>,
        /// Requested end
        end: DateTime<Utc>,
    },

    /// Grant the requested slot
    ConfirmReservation {
        /// Reservation to confirm
        id: ReservationId,
        /// Issuing user
        user: String,
    },

    /// Refuse the requested slot
    DeclineReservation {
        /// Reservation to decline
        id: ReservationId,
        /// Issuing user
        user: String,
        /// Why
        message: String,
    },

    /// Move the reservation to a new slot in the same room
    ChangeReservationTime {
        /// Reservation to move
        id: ReservationId,
        /// Issuing user
        user: String,
        /// New start
        start: DateTime<Utc>,
        /// New end
        end: DateTime<Utc>,
    },

    /// Withdraw the reservation
    CancelReservation {
        /// Reservation to cancel
        id: ReservationId,
        /// Issuing user
        user: String,
    },
}

impl ReservationCommand {
    /// Every command kind, for handler registration.
    pub const KINDS: &'static [&'static str] = &[
        "CreateReservation",
        "ConfirmReservation",
        "DeclineReservation",
        "ChangeReservationTime",
        "CancelReservation",
    ];

    /// The targeted reservation
    #[must_use]
    pub const fn reservation_id(&self) -> ReservationId {
        match self {
            Self::CreateReservation { id, .. }
            | Self::ConfirmReservation { id, .. }
            | Self::DeclineReservation { id, .. }
            | Self::ChangeReservationTime { id, .. }
            | Self::CancelReservation { id, .. } => *id,
        }
    }

    /// The issuing user
    #[must_use]
    pub fn user(&self) -> &str {
        match self {
            Self::CreateReservation { user, .. }
            | Self::ConfirmReservation { user, .. }
            | Self::DeclineReservation { user, .. }
            | Self::ChangeReservationTime { user, .. }
            | Self::CancelReservation { user, .. } => user,
        }
    }
}

/// Stream holding one reservation's events.
#[must_use]
pub fn reservation_stream(id: ReservationId) -> StreamId {
    StreamId::for_aggregate(AGGREGATE_TYPE, id)
}

impl Command for ReservationCommand {
    fn kind(&self) -> &'static str {
        match self {
            Self::CreateReservation { .. } => "CreateReservation",
            Self::ConfirmReservation { .. } => "ConfirmReservation",
            Self::DeclineReservation { .. } => "DeclineReservation",
            Self::ChangeReservationTime { .. } => "ChangeReservationTime",
            Self::CancelReservation { .. } => "CancelReservation",
        }
    }

    fn stream_id(&self) -> StreamId {
        reservation_stream(self.reservation_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_every_command() {
        let id = ReservationId::new();
        let user = "Matt".to_string();
        let commands = [
            ReservationCommand::ConfirmReservation { id, user: user.clone() },
            ReservationCommand::DeclineReservation {
                id,
                user: user.clone(),
                message: String::new(),
            },
            ReservationCommand::CancelReservation { id, user },
        ];
        for command in &commands {
            assert!(ReservationCommand::KINDS.contains(&command.kind()));
            assert_eq!(command.stream_id(), reservation_stream(id));
        }
    }

    #[test]
    fn stream_id_is_prefixed() {
        let id = ReservationId::new();
        assert_eq!(reservation_stream(id).as_str(), format!("reservation-{id}"));
    }
}
