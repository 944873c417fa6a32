//! Write model for a single reservation.
//!
//! ```text
//!            ┌── Confirm ──► confirmed ──┐
//! pending ───┤                           ├── Cancel ──► cancelled
//!    ▲       └── Decline ──► declined    │
//!    │                                   │
//!    └──────────── ChangeTime (from any status) ◄──────┘
//! ```
//!
//! Commands never mutate state directly. A valid command persists exactly one
//! event and the event is what changes the state, so replaying the stream
//! from empty rebuilds the same reservation.

use crate::commands::ReservationCommand;
use crate::events::ReservationEvent;
use crate::types::{ReservationId, ReservationStatus, RoomId, TimeSlot};
use roomledger_core::{SmallVec, effect::Effect, reducer::Reducer, smallvec};
use roomledger_runtime::Aggregate;

/// Topic reservation events are published on.
pub const TOPIC: &str = "reservations";

/// Everything the reservation reducer reacts to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReservationAction {
    /// A request to change the reservation
    Command(ReservationCommand),
    /// A recorded fact to apply
    Event(ReservationEvent),
}

/// Current state of one reservation, rebuilt from its events.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReservationState {
    /// Set once the reservation has been created
    pub id: Option<ReservationId>,
    /// Booked room
    pub room_id: Option<RoomId>,
    /// Display name
    pub name: String,
    /// Owner
    pub user: String,
    /// Current slot
    pub slot: Option<TimeSlot>,
    /// Lifecycle status
    pub status: ReservationStatus,
    /// Last booking conflict reported for this reservation
    pub last_error: Option<String>,
}

impl ReservationState {
    /// Whether a `ReservationCreated` event has been applied
    #[must_use]
    pub const fn is_created(&self) -> bool {
        self.id.is_some()
    }
}

/// Status change requested by a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Grant the slot
    Confirm,
    /// Refuse the slot
    Decline,
    /// Withdraw
    Cancel,
    /// Move to a new slot and wait for a new decision
    Reschedule,
}

impl Transition {
    const fn verb(self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Decline => "decline",
            Self::Cancel => "cancel",
            Self::Reschedule => "reschedule",
        }
    }
}

/// Status after `transition`, or `None` if the move is not allowed.
#[must_use]
pub const fn transition(
    status: ReservationStatus,
    transition: Transition,
) -> Option<ReservationStatus> {
    use ReservationStatus::{Cancelled, Confirmed, Declined, Pending};
    match (status, transition) {
        (Pending, Transition::Confirm) => Some(Confirmed),
        (Pending, Transition::Decline) => Some(Declined),
        (Pending | Confirmed, Transition::Cancel) => Some(Cancelled),
        (_, Transition::Reschedule) => Some(Pending),
        _ => None,
    }
}

/// Reducer enforcing the reservation lifecycle.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReservationReducer;

impl ReservationReducer {
    fn decide(state: &ReservationState, command: ReservationCommand) -> Effect<ReservationAction> {
        let persist = |event| Effect::Persist(ReservationAction::Event(event));

        if let ReservationCommand::CreateReservation {
            id,
            name,
            user,
            room_id,
            start,
            end,
        } = command
        {
            if state.is_created() {
                return Effect::Reject("Reservation already exists.".to_string());
            }
            return match TimeSlot::new(start, end) {
                Ok(slot) => persist(ReservationEvent::ReservationCreated {
                    id,
                    room_id,
                    name,
                    user,
                    slot,
                }),
                Err(e) => Effect::Reject(e.to_string()),
            };
        }

        let (Some(_), Some(room_id)) = (state.id, state.room_id) else {
            return Effect::Reject("Reservation does not exist.".to_string());
        };

        let requested = match &command {
            ReservationCommand::ConfirmReservation { .. } => Transition::Confirm,
            ReservationCommand::DeclineReservation { .. } => Transition::Decline,
            ReservationCommand::CancelReservation { .. } => Transition::Cancel,
            ReservationCommand::ChangeReservationTime { .. }
            | ReservationCommand::CreateReservation { .. } => Transition::Reschedule,
        };
        if transition(state.status, requested).is_none() {
            return Effect::Reject(format!(
                "Cannot {} a {} reservation.",
                requested.verb(),
                state.status
            ));
        }

        match command {
            ReservationCommand::ConfirmReservation { id, user } => {
                persist(ReservationEvent::ReservationConfirmed { id, user })
            }
            ReservationCommand::DeclineReservation { id, user, message } => {
                persist(ReservationEvent::ReservationDeclined { id, user, message })
            }
            ReservationCommand::CancelReservation { id, user } => {
                persist(ReservationEvent::ReservationCancelled { id, user })
            }
            ReservationCommand::ChangeReservationTime {
                id,
                user,
                start,
                end,
            } => match TimeSlot::new(start, end) {
                Ok(slot) => persist(ReservationEvent::ReservationTimeChanged {
                    id,
                    room_id,
                    user,
                    slot,
                }),
                Err(e) => Effect::Reject(e.to_string()),
            },
            ReservationCommand::CreateReservation { .. } => Effect::None,
        }
    }

    fn apply(state: &mut ReservationState, event: ReservationEvent) {
        match event {
            ReservationEvent::ReservationCreated {
                id,
                room_id,
                name,
                user,
                slot,
            } => {
                state.id = Some(id);
                state.room_id = Some(room_id);
                state.name = name;
                state.user = user;
                state.slot = Some(slot);
                state.status = ReservationStatus::Pending;
            }
            ReservationEvent::ReservationConfirmed { .. } => {
                state.status = ReservationStatus::Confirmed;
            }
            ReservationEvent::ReservationDeclined { .. } => {
                state.status = ReservationStatus::Declined;
            }
            ReservationEvent::ReservationTimeChanged { slot, .. } => {
                state.slot = Some(slot);
                state.status = ReservationStatus::Pending;
            }
            ReservationEvent::ReservationCancelled { .. } => {
                state.status = ReservationStatus::Cancelled;
            }
            ReservationEvent::ReservationBookingConflicted { message, .. } => {
                state.last_error = Some(message);
            }
        }
    }
}

impl Reducer for ReservationReducer {
    type State = ReservationState;
    type Action = ReservationAction;
    type Environment = ();

    fn reduce(
        &self,
        state: &mut ReservationState,
        action: ReservationAction,
        _env: &(),
    ) -> SmallVec<[Effect<ReservationAction>; 4]> {
        match action {
            ReservationAction::Command(command) => smallvec![Self::decide(state, command)],
            ReservationAction::Event(event) => {
                Self::apply(state, event);
                smallvec![Effect::None]
            }
        }
    }
}

impl Aggregate for ReservationReducer {
    type Command = ReservationCommand;
    type Event = ReservationEvent;

    fn topic(&self) -> &'static str {
        TOPIC
    }

    fn command_action(command: ReservationCommand) -> ReservationAction {
        ReservationAction::Command(command)
    }

    fn event_action(event: ReservationEvent) -> ReservationAction {
        ReservationAction::Event(event)
    }

    fn into_event(action: ReservationAction) -> Option<ReservationEvent> {
        match action {
            ReservationAction::Event(event) => Some(event),
            ReservationAction::Command(_) => None,
        }
    }
}
