//! # Roomledger Testing
//!
//! Test doubles and helpers shared by the roomledger crates.
//!
//! This crate provides:
//! - In-memory event store, event bus and projection store
//! - Deterministic clocks
//! - A command dispatcher that records what it was asked to do
//! - The [`ReducerTest`] given/when/then harness
//!
//! ## Example
//!
//! ```ignore
//! use roomledger_testing::mocks::{InMemoryEventBus, InMemoryEventStore};
//!
//! #[tokio::test]
//! async fn creates_reservation() {
//!     let store = Arc::new(InMemoryEventStore::new());
//!     let bus = Arc::new(InMemoryEventBus::new());
//!     // wire the aggregate store and dispatch commands...
//! }
//! ```

use chrono::{DateTime, Utc};
use roomledger_core::environment::Clock;

pub mod projection_mocks;
pub mod reducer_test;

pub use projection_mocks::InMemoryProjectionStore;
pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations of the environment and infrastructure traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    mod dispatcher;
    mod event_bus;
    mod event_store;

    pub use dispatcher::RecordingDispatcher;
    pub use event_bus::InMemoryEventBus;
    pub use event_store::InMemoryEventStore;

    /// Fixed clock for deterministic tests
    ///
    /// ```
    /// use roomledger_testing::mocks::FixedClock;
    /// use roomledger_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock the test moves by hand, e.g. across a month boundary.
    ///
    /// Clones share the same time.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a manual clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move forward by `delta`
        pub fn advance(&self, delta: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += delta;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_time())
    }

    /// The instant [`test_clock`] is frozen at.
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use std::future::Future;
    use std::time::Duration;

    /// Poll `check` until it returns `true` or `timeout` elapses.
    ///
    /// Returns the last result. Useful for waiting on asynchronous consumers
    /// without sleeping for a fixed time.
    pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if check().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs it.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use super::mocks::test_time;
    use chrono::{DateTime, Duration, Utc};
    use proptest::prelude::*;

    /// Instants within two weeks after [`test_time`], at second resolution.
    pub fn instant() -> impl Strategy<Value = DateTime<Utc>> {
        (0_i64..20_160, 0_i64..60).prop_map(|(minutes, seconds)| {
            test_time() + Duration::minutes(minutes) + Duration::seconds(seconds)
        })
    }

    /// `(start, end)` pairs with `start < end`, at most a day long.
    pub fn ordered_pair() -> impl Strategy<Value = (DateTime<Utc>, DateTime<Utc>)> {
        (instant(), 1_i64..86_400).prop_map(|(start, len)| (start, start + Duration::seconds(len)))
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};
