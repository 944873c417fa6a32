//! Conflict arbiter: the saga that decides who holds a room slot.
//!
//! Reservations are independent aggregates, so nothing on the write side
//! stops two of them from asking for the same room at the same time. The
//! arbiter watches every reservation's scheduling events, keeps an index of
//! held slots per room, and answers each request with a `ConfirmReservation`
//! or `DeclineReservation` command.
//!
//! ```text
//! ReservationCreated ──► seen before? (read lock) ──yes──► ignore
//!                                   │
//!                                   ▼
//!                  RoomArbiter::reduce (write lock) ──overlap──► Dispatch(Decline)
//!                                   │
//!                                   └──► hold slot ──► Dispatch(Confirm)
//! ```
//!
//! The decision is a [`Reducer`] over one room's [`RoomSchedule`]. Its
//! `Effect::Dispatch` outputs are issued by [`ConflictArbiter`] once the room
//! lock is released. Each room has its own lock, so rooms are arbitrated in
//! parallel. The index lives in memory only and starts empty on every run.

use crate::commands::ReservationCommand;
use crate::events::{self, ReservationEvent};
use crate::types::{ReservationId, RoomId, TimeSlot};
use async_trait::async_trait;
use roomledger_core::command::{Command, CommandDispatcher, DispatchError};
use roomledger_core::event::{EventError, SerializedEvent};
use roomledger_core::{SmallVec, effect::Effect, reducer::Reducer, smallvec};
use roomledger_runtime::{EventHandler, HandlerError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// User the arbiter issues its commands as.
pub const SCHEDULER: &str = "Scheduler";
/// Decline message for rooms that are not provisioned.
pub const ROOM_DOES_NOT_EXIST: &str = "Room does not exist.";
/// Decline message for overlapping requests.
pub const ROOM_OCCUPIED: &str = "Room occupied.";

/// Event types that affect room occupancy.
pub const SCHEDULING_EVENTS: &[&str] = &[
    events::CREATED,
    events::TIME_CHANGED,
    events::CANCELLED,
    events::DECLINED,
];

/// Arbiter failures.
#[derive(Error, Debug)]
pub enum ArbiterError {
    /// The event could not be decoded.
    #[error(transparent)]
    Decode(#[from] EventError),

    /// The follow-up command could not be dispatched.
    #[error("Failed to dispatch {kind} for reservation {id}: {source}")]
    Dispatch {
        /// Command kind
        kind: &'static str,
        /// Target reservation
        id: ReservationId,
        /// Underlying error
        source: DispatchError,
    },
}

/// Slots currently held in one room.
///
/// Also remembers every reservation whose request was arbitrated here, held
/// or not, so a redelivered `ReservationCreated` is never decided twice.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoomSchedule {
    held: HashMap<ReservationId, TimeSlot>,
    arbitrated: HashSet<ReservationId>,
}

impl RoomSchedule {
    /// Empty schedule
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `slot` overlaps a slot held by another reservation
    #[must_use]
    pub fn conflicts(&self, id: ReservationId, slot: &TimeSlot) -> bool {
        self.held
            .iter()
            .any(|(holder, held)| *holder != id && held.overlaps(slot))
    }

    /// Whether `id` holds a slot here
    #[must_use]
    pub fn holds(&self, id: ReservationId) -> bool {
        self.held.contains_key(&id)
    }

    /// Whether the request of `id` was already decided here
    #[must_use]
    pub fn has_arbitrated(&self, id: ReservationId) -> bool {
        self.arbitrated.contains(&id)
    }

    /// The slot held by `id`
    #[must_use]
    pub fn slot_of(&self, id: ReservationId) -> Option<TimeSlot> {
        self.held.get(&id).copied()
    }

    /// Number of held slots
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Whether nothing is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Free the slot held by `id`
    pub fn release(&mut self, id: ReservationId) -> Option<TimeSlot> {
        self.held.remove(&id)
    }

    /// Apply a scheduling event for a reservation in this room and return
    /// the command the arbiter should issue, if any.
    ///
    /// - Created: a request already arbitrated is a redelivery and is
    ///   ignored, even after its slot was released. Otherwise the slot is
    ///   held and confirmed unless it overlaps.
    /// - `TimeChanged`: the old slot is released and the new one arbitrated.
    /// - Cancelled and Declined: the slot is released.
    pub fn react(&mut self, event: &ReservationEvent) -> Option<ReservationCommand> {
        match event {
            ReservationEvent::ReservationCreated { id, slot, .. } => {
                if self.has_arbitrated(*id) {
                    return None;
                }
                Some(self.arbitrate(*id, *slot))
            }
            ReservationEvent::ReservationTimeChanged { id, slot, .. } => {
                self.release(*id);
                Some(self.arbitrate(*id, *slot))
            }
            ReservationEvent::ReservationCancelled { id, .. }
            | ReservationEvent::ReservationDeclined { id, .. } => {
                self.release(*id);
                None
            }
            ReservationEvent::ReservationConfirmed { .. }
            | ReservationEvent::ReservationBookingConflicted { .. } => None,
        }
    }

    fn arbitrate(&mut self, id: ReservationId, slot: TimeSlot) -> ReservationCommand {
        self.arbitrated.insert(id);
        if self.conflicts(id, &slot) {
            return decline(id, ROOM_OCCUPIED);
        }
        self.held.insert(id, slot);
        ReservationCommand::ConfirmReservation {
            id,
            user: SCHEDULER.to_string(),
        }
    }
}

fn decline(id: ReservationId, message: &str) -> ReservationCommand {
    ReservationCommand::DeclineReservation {
        id,
        user: SCHEDULER.to_string(),
        message: message.to_string(),
    }
}

/// Input and output of the per-room decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulingAction {
    /// A scheduling event seen on the bus
    Observed(ReservationEvent),
    /// A command the arbiter wants issued
    Issue(ReservationCommand),
}

/// The per-room decision as a reducer over a [`RoomSchedule`].
///
/// Observed events update the schedule. A decision comes back as
/// `Effect::Dispatch(SchedulingAction::Issue(..))`. `Issue` actions are
/// outputs only and reduce to nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoomArbiter;

impl Reducer for RoomArbiter {
    type State = RoomSchedule;
    type Action = SchedulingAction;
    type Environment = ();

    fn reduce(
        &self,
        schedule: &mut RoomSchedule,
        action: SchedulingAction,
        _env: &(),
    ) -> SmallVec<[Effect<SchedulingAction>; 4]> {
        match action {
            SchedulingAction::Observed(event) => match schedule.react(&event) {
                Some(command) => smallvec![Effect::Dispatch(SchedulingAction::Issue(command))],
                None => smallvec![Effect::None],
            },
            SchedulingAction::Issue(_) => smallvec![Effect::None],
        }
    }
}

fn issued(effects: SmallVec<[Effect<SchedulingAction>; 4]>) -> Vec<ReservationCommand> {
    effects
        .into_iter()
        .filter_map(|effect| match effect {
            Effect::Dispatch(SchedulingAction::Issue(command)) => Some(command),
            _ => None,
        })
        .collect()
}

/// The saga. Owns the room index and re-enters the command pipeline.
pub struct ConflictArbiter {
    rooms: HashMap<RoomId, RwLock<RoomSchedule>>,
    reducer: RoomArbiter,
    commands: Arc<dyn CommandDispatcher<ReservationCommand>>,
}

impl ConflictArbiter {
    /// Create an arbiter for a fixed set of rooms.
    #[must_use]
    pub fn new(
        rooms: impl IntoIterator<Item = RoomId>,
        commands: Arc<dyn CommandDispatcher<ReservationCommand>>,
    ) -> Self {
        Self {
            rooms: rooms
                .into_iter()
                .map(|room| (room, RwLock::new(RoomSchedule::new())))
                .collect(),
            reducer: RoomArbiter,
            commands,
        }
    }

    /// Snapshot of one room's schedule, `None` for unknown rooms.
    pub async fn schedule(&self, room: RoomId) -> Option<RoomSchedule> {
        match self.rooms.get(&room) {
            Some(schedule) => Some(schedule.read().await.clone()),
            None => None,
        }
    }

    /// Handle one reservation event.
    ///
    /// # Errors
    ///
    /// Returns [`ArbiterError::Dispatch`] if a follow-up command fails to
    /// dispatch. The decision is not retried.
    #[tracing::instrument(skip_all, fields(reservation_id = %event.reservation_id()))]
    pub async fn on_event(&self, event: &ReservationEvent) -> Result<(), ArbiterError> {
        let id = event.reservation_id();
        let follow_ups = match event {
            ReservationEvent::ReservationCreated { room_id, .. } => {
                self.on_requested(*room_id, event).await
            }
            ReservationEvent::ReservationTimeChanged { room_id, .. } => {
                let room = self.room_holding(id).await.unwrap_or(*room_id);
                self.apply_in(room, event).await
            }
            ReservationEvent::ReservationCancelled { .. }
            | ReservationEvent::ReservationDeclined { .. } => match self.room_holding(id).await {
                Some(room) => {
                    let follow_ups = self.apply_in(room, event).await;
                    debug!(room = %room, "Slot released");
                    follow_ups
                }
                None => Vec::new(),
            },
            ReservationEvent::ReservationConfirmed { .. }
            | ReservationEvent::ReservationBookingConflicted { .. } => Vec::new(),
        };

        for command in follow_ups {
            self.issue(command).await?;
        }
        Ok(())
    }

    async fn on_requested(&self, room: RoomId, event: &ReservationEvent) -> Vec<ReservationCommand> {
        let id = event.reservation_id();
        let Some(schedule) = self.rooms.get(&room) else {
            return vec![decline(id, ROOM_DOES_NOT_EXIST)];
        };

        if schedule.read().await.has_arbitrated(id) {
            debug!(room = %room, "Request already arbitrated");
            return Vec::new();
        }

        self.apply_in(room, event).await
    }

    /// Reduce `event` against one room under its write lock. The lock is
    /// released before the returned commands are issued.
    async fn apply_in(&self, room: RoomId, event: &ReservationEvent) -> Vec<ReservationCommand> {
        let Some(schedule) = self.rooms.get(&room) else {
            return vec![decline(event.reservation_id(), ROOM_DOES_NOT_EXIST)];
        };
        let effects = {
            let mut schedule = schedule.write().await;
            self.reducer
                .reduce(&mut *schedule, SchedulingAction::Observed(event.clone()), &())
        };
        issued(effects)
    }

    async fn room_holding(&self, id: ReservationId) -> Option<RoomId> {
        for (room, schedule) in &self.rooms {
            if schedule.read().await.holds(id) {
                return Some(*room);
            }
        }
        None
    }

    async fn issue(&self, command: ReservationCommand) -> Result<(), ArbiterError> {
        let id = command.reservation_id();
        let kind = command.kind();
        match &command {
            ReservationCommand::DeclineReservation { message, .. } => {
                warn!(reservation_id = %id, %message, "Declining reservation");
                metrics::counter!("arbiter_decisions_total", "decision" => "declined").increment(1);
            }
            _ => {
                info!(reservation_id = %id, "Confirming reservation");
                metrics::counter!("arbiter_decisions_total", "decision" => "confirmed").increment(1);
            }
        }

        self.commands
            .dispatch(command)
            .await
            .map(|_| ())
            .map_err(|source| ArbiterError::Dispatch { kind, id, source })
    }
}

#[async_trait]
impl EventHandler for ConflictArbiter {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
        let event = ReservationEvent::from_serialized(event)?;
        self.on_event(&event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use roomledger_testing::mocks::{RecordingDispatcher, test_time};
    use roomledger_testing::{ReducerTest, assertions};

    fn at(hour: i64, minute: i64) -> DateTime<Utc> {
        test_time() + Duration::hours(hour) + Duration::minutes(minute)
    }

    fn slot(from: (i64, i64), to: (i64, i64)) -> TimeSlot {
        TimeSlot::new(at(from.0, from.1), at(to.0, to.1)).unwrap()
    }

    fn created(id: ReservationId, room: u32, slot: TimeSlot) -> ReservationEvent {
        ReservationEvent::ReservationCreated {
            id,
            room_id: RoomId::new(room),
            name: "Meeting".into(),
            user: "Matt".into(),
            slot,
        }
    }

    fn arbiter() -> (ConflictArbiter, RecordingDispatcher<ReservationCommand>) {
        let recorder = RecordingDispatcher::new();
        let arbiter = ConflictArbiter::new(
            (1..=6).map(RoomId::new),
            Arc::new(recorder.clone()),
        );
        (arbiter, recorder)
    }

    fn confirmed(id: ReservationId) -> ReservationCommand {
        ReservationCommand::ConfirmReservation {
            id,
            user: SCHEDULER.into(),
        }
    }

    #[test]
    fn schedule_reacts_purely() {
        let mut schedule = RoomSchedule::new();
        let a = ReservationId::new();
        let b = ReservationId::new();

        assert_eq!(
            schedule.react(&created(a, 3, slot((10, 0), (11, 0)))),
            Some(confirmed(a))
        );
        assert_eq!(
            schedule.react(&created(b, 3, slot((10, 30), (11, 30)))),
            Some(decline(b, ROOM_OCCUPIED))
        );
        assert_eq!(schedule.len(), 1);

        schedule.react(&ReservationEvent::ReservationCancelled {
            id: a,
            user: "Matt".into(),
        });
        assert!(schedule.is_empty());
    }

    #[test]
    fn redelivered_create_is_ignored() {
        let mut schedule = RoomSchedule::new();
        let a = ReservationId::new();
        let event = created(a, 3, slot((10, 0), (11, 0)));
        assert!(schedule.react(&event).is_some());
        assert_eq!(schedule.react(&event), None);
    }

    #[test]
    fn redelivered_create_after_decline_stays_declined() {
        let mut schedule = RoomSchedule::new();
        let a = ReservationId::new();
        let b = ReservationId::new();
        let late = created(b, 3, slot((10, 30), (11, 30)));

        schedule.react(&created(a, 3, slot((10, 0), (11, 0))));
        assert_eq!(schedule.react(&late), Some(decline(b, ROOM_OCCUPIED)));
        schedule.react(&ReservationEvent::ReservationCancelled {
            id: a,
            user: "Matt".into(),
        });

        assert_eq!(schedule.react(&late), None);
        assert!(!schedule.holds(b));
        assert!(schedule.has_arbitrated(b));
    }

    #[test]
    fn reducer_dispatches_the_decision() {
        let a = ReservationId::new();
        let b = ReservationId::new();
        ReducerTest::new(RoomArbiter)
            .with_env(())
            .given_state(RoomSchedule::new())
            .given_actions(vec![SchedulingAction::Observed(created(
                a,
                3,
                slot((10, 0), (11, 0)),
            ))])
            .when_action(SchedulingAction::Observed(created(
                b,
                3,
                slot((10, 30), (11, 30)),
            )))
            .then_effects(move |effects| {
                assert_eq!(
                    assertions::assert_dispatched(effects),
                    &SchedulingAction::Issue(decline(b, ROOM_OCCUPIED))
                );
            })
            .then_state(move |schedule| {
                assert!(schedule.holds(a));
                assert!(!schedule.holds(b));
            })
            .run();
    }

    #[test]
    fn reducer_ignores_releases_and_its_own_output() {
        let a = ReservationId::new();
        ReducerTest::new(RoomArbiter)
            .with_env(())
            .given_state(RoomSchedule::new())
            .given_actions(vec![SchedulingAction::Observed(created(
                a,
                3,
                slot((10, 0), (11, 0)),
            ))])
            .when_action(SchedulingAction::Observed(
                ReservationEvent::ReservationCancelled {
                    id: a,
                    user: "Matt".into(),
                },
            ))
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .then_state(|schedule| assert!(schedule.is_empty()))
            .run();

        ReducerTest::new(RoomArbiter)
            .with_env(())
            .given_state(RoomSchedule::new())
            .when_action(SchedulingAction::Issue(confirmed(a)))
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .then_state(|schedule| assert_eq!(schedule, &RoomSchedule::new()))
            .run();
    }

    #[test]
    fn time_change_does_not_conflict_with_itself() {
        let mut schedule = RoomSchedule::new();
        let a = ReservationId::new();
        schedule.react(&created(a, 3, slot((10, 0), (11, 0))));

        let moved = ReservationEvent::ReservationTimeChanged {
            id: a,
            room_id: RoomId::new(3),
            user: "Matt".into(),
            slot: slot((10, 30), (11, 30)),
        };
        assert_eq!(schedule.react(&moved), Some(confirmed(a)));
        assert_eq!(schedule.slot_of(a), Some(slot((10, 30), (11, 30))));
    }

    #[tokio::test]
    async fn unknown_room_is_declined() {
        let (arbiter, recorder) = arbiter();
        let id = ReservationId::new();
        arbiter
            .on_event(&created(id, 42, slot((10, 0), (11, 0))))
            .await
            .unwrap();
        assert_eq!(recorder.commands(), vec![decline(id, ROOM_DOES_NOT_EXIST)]);
    }

    #[tokio::test]
    async fn touching_slots_are_both_confirmed() {
        let (arbiter, recorder) = arbiter();
        let a = ReservationId::new();
        let b = ReservationId::new();
        arbiter.on_event(&created(a, 1, slot((9, 0), (10, 0)))).await.unwrap();
        arbiter.on_event(&created(b, 1, slot((10, 0), (11, 0)))).await.unwrap();
        assert_eq!(recorder.commands(), vec![confirmed(a), confirmed(b)]);
    }

    #[tokio::test]
    async fn rooms_are_independent() {
        let (arbiter, recorder) = arbiter();
        let a = ReservationId::new();
        let b = ReservationId::new();
        arbiter.on_event(&created(a, 1, slot((9, 0), (10, 0)))).await.unwrap();
        arbiter.on_event(&created(b, 2, slot((9, 0), (10, 0)))).await.unwrap();
        assert_eq!(recorder.commands(), vec![confirmed(a), confirmed(b)]);
    }

    #[tokio::test]
    async fn cancellation_frees_the_slot() {
        let (arbiter, recorder) = arbiter();
        let a = ReservationId::new();
        let b = ReservationId::new();
        let c = ReservationId::new();

        arbiter.on_event(&created(a, 3, slot((10, 0), (11, 0)))).await.unwrap();
        arbiter.on_event(&created(b, 3, slot((10, 30), (11, 30)))).await.unwrap();
        arbiter
            .on_event(&ReservationEvent::ReservationCancelled {
                id: a,
                user: "Matt".into(),
            })
            .await
            .unwrap();
        arbiter.on_event(&created(c, 3, slot((10, 30), (11, 30)))).await.unwrap();

        assert_eq!(
            recorder.commands(),
            vec![confirmed(a), decline(b, ROOM_OCCUPIED), confirmed(c)]
        );
        assert!(arbiter.schedule(RoomId::new(3)).await.unwrap().holds(c));
    }

    #[tokio::test]
    async fn late_redelivery_of_a_declined_request_does_not_take_the_slot() {
        let (arbiter, recorder) = arbiter();
        let a = ReservationId::new();
        let b = ReservationId::new();
        let c = ReservationId::new();
        let b_created = created(b, 3, slot((10, 30), (11, 30)));

        arbiter.on_event(&created(a, 3, slot((10, 0), (11, 0)))).await.unwrap();
        arbiter.on_event(&b_created).await.unwrap();
        arbiter
            .on_event(&ReservationEvent::ReservationDeclined {
                id: b,
                user: SCHEDULER.into(),
                message: ROOM_OCCUPIED.into(),
            })
            .await
            .unwrap();
        arbiter
            .on_event(&ReservationEvent::ReservationCancelled {
                id: a,
                user: "Matt".into(),
            })
            .await
            .unwrap();
        recorder.clear();

        arbiter.on_event(&b_created).await.unwrap();
        assert!(recorder.commands().is_empty());
        assert!(!arbiter.schedule(RoomId::new(3)).await.unwrap().holds(b));

        arbiter.on_event(&created(c, 3, slot((10, 30), (11, 30)))).await.unwrap();
        assert_eq!(recorder.commands(), vec![confirmed(c)]);
    }

    #[tokio::test]
    async fn time_change_into_occupied_slot_is_declined_and_released() {
        let (arbiter, recorder) = arbiter();
        let a = ReservationId::new();
        let b = ReservationId::new();
        arbiter.on_event(&created(a, 3, slot((10, 0), (11, 0)))).await.unwrap();
        arbiter.on_event(&created(b, 3, slot((12, 0), (13, 0)))).await.unwrap();
        recorder.clear();

        arbiter
            .on_event(&ReservationEvent::ReservationTimeChanged {
                id: b,
                room_id: RoomId::new(3),
                user: "Joyce".into(),
                slot: slot((10, 30), (11, 30)),
            })
            .await
            .unwrap();

        assert_eq!(recorder.commands(), vec![decline(b, ROOM_OCCUPIED)]);
        let schedule = arbiter.schedule(RoomId::new(3)).await.unwrap();
        assert!(!schedule.holds(b));
        assert!(schedule.holds(a));
    }

    #[tokio::test]
    async fn dispatch_failures_are_returned() {
        let (arbiter, recorder) = arbiter();
        recorder.fail_with(DispatchError::Closed);
        let result = arbiter
            .on_event(&created(ReservationId::new(), 1, slot((9, 0), (10, 0))))
            .await;
        assert!(matches!(
            result,
            Err(ArbiterError::Dispatch {
                kind: "ConfirmReservation",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn concurrent_requests_for_one_slot_confirm_exactly_one() {
        let (arbiter, recorder) = arbiter();
        let arbiter = Arc::new(arbiter);
        let ids: Vec<ReservationId> = (0..16).map(|_| ReservationId::new()).collect();

        let tasks: Vec<_> = ids
            .iter()
            .map(|id| {
                let arbiter = Arc::clone(&arbiter);
                let event = created(*id, 5, slot((14, 0), (15, 0)));
                tokio::spawn(async move { arbiter.on_event(&event).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let confirms = recorder
            .commands()
            .into_iter()
            .filter(|c| matches!(c, ReservationCommand::ConfirmReservation { .. }))
            .count();
        assert_eq!(confirms, 1);
        assert_eq!(arbiter.schedule(RoomId::new(5)).await.unwrap().len(), 1);
    }
}
