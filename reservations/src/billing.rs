//! Billing ledger: per-user monthly bills derived from reservation events.
//!
//! | Event          | Effect on the ledger                                           |
//! |----------------|----------------------------------------------------------------|
//! | Created        | remember owner and pending slot, bump history version          |
//! | Confirmed      | charge the pending slot to the current month                   |
//! | Declined       | forget the pending slot                                        |
//! | Cancelled      | refund a billed slot from the current month                    |
//! | `TimeChanged`  | refund a billed slot, then remember the new slot (not charged) |
//!
//! Refunds always land on the month in which they are processed, not the
//! month of the original charge, so a bill can go negative.
//!
//! The pending cache is process-local. The billing history itself lives in
//! the projection store under `billing:{user}`; every find, mutate and save
//! cycle for one user runs inside that user's exclusive section.

use crate::events::{self, ReservationEvent};
use crate::read_model::{billing_key, find_or_else};
use crate::types::{Money, ReservationId, TimeSlot};
use async_trait::async_trait;
use roomledger_core::environment::Clock;
use roomledger_core::event::{EventError, SerializedEvent};
use roomledger_core::projection::{ProjectionError, ProjectionStore};
use roomledger_runtime::{EventHandler, HandlerError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Event types the ledger consumes.
pub const BILLING_EVENTS: &[&str] = &[
    events::CREATED,
    events::CONFIRMED,
    events::DECLINED,
    events::TIME_CHANGED,
    events::CANCELLED,
];

/// Ledger failures.
#[derive(Error, Debug)]
pub enum BillingError {
    /// An event arrived for a reservation whose creation was never seen.
    #[error("No reservation found: {0}")]
    UnknownReservation(ReservationId),

    /// A confirmation arrived with no pending slot to charge.
    #[error("No pending interval for reservation {0}")]
    NoPendingInterval(ReservationId),

    /// The ledger does not handle this event type.
    #[error("Could not handle event: {0}")]
    UnexpectedEvent(String),

    /// Reading or writing the billing history failed.
    #[error("Billing projection failed: {0}")]
    Projection(#[from] ProjectionError),

    /// The event could not be decoded.
    #[error(transparent)]
    Codec(#[from] EventError),
}

/// One user's bill for one calendar month.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    /// `YYYY-MM`
    pub month: String,
    /// Bumped on every change
    pub version: u64,
    /// Net billed minutes
    pub minutes: i64,
    /// Net billed amount
    pub total: Money,
}

/// All of a user's bills plus lifetime totals.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingHistory {
    /// Owner
    pub user: String,
    /// Bumped on every change
    pub version: u64,
    /// Bills by month
    pub bills: BTreeMap<String, Bill>,
    /// Lifetime net minutes
    pub total_minutes: i64,
    /// Lifetime net amount
    pub total_paid: Money,
}

impl BillingHistory {
    /// Empty history for `user`
    #[must_use]
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Self::default()
        }
    }

    /// The bill for `month`, if any
    #[must_use]
    pub fn bill(&self, month: &str) -> Option<&Bill> {
        self.bills.get(month)
    }

    /// Add `minutes` and `amount` (both may be negative) to `month` and to
    /// the lifetime totals. The month's bill is created if missing.
    pub fn adjust(&mut self, month: &str, minutes: i64, amount: Money) {
        let bill = self.bills.entry(month.to_string()).or_insert_with(|| Bill {
            month: month.to_string(),
            ..Bill::default()
        });
        bill.minutes += minutes;
        bill.total += amount;
        bill.version += 1;

        self.total_minutes += minutes;
        self.total_paid += amount;
        self.version += 1;
    }
}

#[derive(Clone, Debug)]
struct PendingInterval {
    slot: TimeSlot,
    billed: bool,
}

#[derive(Debug, Default)]
struct LedgerCache {
    owners: HashMap<ReservationId, String>,
    pending: HashMap<ReservationId, PendingInterval>,
}

/// Projector maintaining [`BillingHistory`] per user.
pub struct BillingLedger<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    rate: Money,
    cache: std::sync::Mutex<LedgerCache>,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: ProjectionStore> BillingLedger<S> {
    /// Create a ledger charging `rate` per minute.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, rate: Money) -> Self {
        Self {
            store,
            clock,
            rate,
            cache: std::sync::Mutex::new(LedgerCache::default()),
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Per-minute rate
    #[must_use]
    pub const fn rate(&self) -> Money {
        self.rate
    }

    /// Month key for "now", `YYYY-MM`.
    #[must_use]
    pub fn current_month(&self) -> String {
        self.clock.now().format("%Y-%m").to_string()
    }

    /// Read a user's billing history.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::Projection`] if the store fails.
    pub async fn history(&self, user: &str) -> Result<Option<BillingHistory>, BillingError> {
        Ok(self.store.find(&billing_key(user)).await?)
    }

    /// Fold one event into the ledger.
    ///
    /// # Errors
    ///
    /// - [`BillingError::UnknownReservation`] for events of a reservation
    ///   whose creation was never seen
    /// - [`BillingError::NoPendingInterval`] for a confirmation with nothing to charge
    /// - [`BillingError::Projection`] if the billing history cannot be saved
    #[tracing::instrument(skip_all, fields(reservation_id = %event.reservation_id()))]
    pub async fn apply(&self, event: &ReservationEvent) -> Result<(), BillingError> {
        let id = event.reservation_id();
        match event {
            ReservationEvent::ReservationCreated { user, slot, .. } => {
                self.on_created(id, user, *slot).await
            }
            ReservationEvent::ReservationConfirmed { .. } => self.on_confirmed(id).await,
            ReservationEvent::ReservationDeclined { .. } => {
                self.owner(id)?;
                self.lock_cache().pending.remove(&id);
                debug!("Pending interval discarded");
                Ok(())
            }
            ReservationEvent::ReservationCancelled { .. } => {
                self.reverse(id).await?;
                Ok(())
            }
            ReservationEvent::ReservationTimeChanged { slot, .. } => {
                self.owner(id)?;
                let applied = self
                    .lock_cache()
                    .pending
                    .get(&id)
                    .is_some_and(|pending| pending.slot == *slot);
                if applied {
                    debug!("Time change already applied");
                    return Ok(());
                }
                self.reverse(id).await?;
                self.lock_cache().pending.insert(
                    id,
                    PendingInterval {
                        slot: *slot,
                        billed: false,
                    },
                );
                Ok(())
            }
            ReservationEvent::ReservationBookingConflicted { .. } => Err(
                BillingError::UnexpectedEvent(events::BOOKING_CONFLICTED.to_string()),
            ),
        }
    }

    async fn on_created(
        &self,
        id: ReservationId,
        user: &str,
        slot: TimeSlot,
    ) -> Result<(), BillingError> {
        if self.lock_cache().owners.contains_key(&id) {
            debug!("Reservation already registered");
            return Ok(());
        }

        self.update(user, |history| history.version += 1).await?;

        let mut cache = self.lock_cache();
        cache.owners.insert(id, user.to_string());
        cache.pending.insert(
            id,
            PendingInterval {
                slot,
                billed: false,
            },
        );
        Ok(())
    }

    async fn on_confirmed(&self, id: ReservationId) -> Result<(), BillingError> {
        let user = self.owner(id)?;
        let pending = self
            .lock_cache()
            .pending
            .get(&id)
            .cloned()
            .ok_or(BillingError::NoPendingInterval(id))?;
        if pending.billed {
            debug!("Reservation already billed");
            return Ok(());
        }

        let minutes = pending.slot.duration_minutes();
        let amount = self.rate.times(minutes);
        let month = self.current_month();
        self.update(&user, |history| history.adjust(&month, minutes, amount))
            .await?;

        if let Some(entry) = self.lock_cache().pending.get_mut(&id) {
            entry.billed = true;
        }
        metrics::counter!("billing_adjustments_total", "kind" => "charge").increment(1);
        info!(%user, %month, minutes, %amount, "Reservation charged");
        Ok(())
    }

    /// Refund a billed reservation. Returns whether anything was refunded.
    async fn reverse(&self, id: ReservationId) -> Result<bool, BillingError> {
        let user = self.owner(id)?;
        let billed = self
            .lock_cache()
            .pending
            .get(&id)
            .filter(|entry| entry.billed)
            .map(|entry| entry.slot);
        let Some(slot) = billed else {
            return Ok(false);
        };

        let minutes = slot.duration_minutes();
        let amount = self.rate.times(minutes);
        let month = self.current_month();
        self.update(&user, |history| history.adjust(&month, -minutes, -amount))
            .await?;

        if let Some(entry) = self.lock_cache().pending.get_mut(&id) {
            entry.billed = false;
        }
        metrics::counter!("billing_adjustments_total", "kind" => "refund").increment(1);
        info!(%user, %month, minutes, %amount, "Reservation refunded");
        Ok(true)
    }

    /// Find, mutate and save one user's history inside the user's section.
    async fn update<F>(&self, user: &str, mutate: F) -> Result<(), BillingError>
    where
        F: FnOnce(&mut BillingHistory) + Send,
    {
        let lock = self.user_lock(user).await;
        let _guard = lock.lock().await;

        let key = billing_key(user);
        let mut history = find_or_else(self.store.as_ref(), &key, || BillingHistory::new(user))
            .await?;
        mutate(&mut history);
        self.store.put(&key, &history).await?;
        Ok(())
    }

    async fn user_lock(&self, user: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        Arc::clone(locks.entry(user.to_string()).or_default())
    }

    fn owner(&self, id: ReservationId) -> Result<String, BillingError> {
        self.lock_cache()
            .owners
            .get(&id)
            .cloned()
            .ok_or(BillingError::UnknownReservation(id))
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, LedgerCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<S> EventHandler for BillingLedger<S>
where
    S: ProjectionStore + 'static,
{
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
        if !BILLING_EVENTS.contains(&event.event_type.as_str()) {
            return Err(BillingError::UnexpectedEvent(event.event_type.clone()).into());
        }
        let event = ReservationEvent::from_serialized(event).map_err(BillingError::from)?;
        self.apply(&event).await?;
        Ok(())
    }
}
