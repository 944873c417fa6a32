//! # Roomledger Core
//!
//! Core traits and types shared by every roomledger crate.
//!
//! The write side is expressed as reducers: pure functions that take the
//! current state and an action and return effect descriptions. The runtime
//! crate executes those effects against the collaborators defined here
//! (event store, event bus, projection store, command dispatch).
//!
//! ## Core Concepts
//!
//! - **State**: Domain state owned by one reducer
//! - **Action**: Everything a reducer reacts to (commands and events)
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: What the runtime should do next (persist, dispatch, reject)
//! - **Environment**: Injected dependencies such as the [`environment::Clock`]
//!
//! ## Example
//!
//! ```ignore
//! use roomledger_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};
//!
//! impl Reducer for CounterReducer {
//!     type State = CounterState;
//!     type Action = CounterAction;
//!     type Environment = ();
//!
//!     fn reduce(
//!         &self,
//!         state: &mut CounterState,
//!         action: CounterAction,
//!         _env: &(),
//!     ) -> SmallVec<[Effect<CounterAction>; 4]> {
//!         match action {
//!             CounterAction::Increment => smallvec![Effect::Persist(CounterAction::Incremented)],
//!             CounterAction::Incremented => {
//!                 state.count += 1;
//!                 smallvec![Effect::None]
//!             }
//!         }
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

pub mod command;
pub mod event;
pub mod event_bus;
pub mod event_store;
pub mod projection;
pub mod stream;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// They hold all domain decisions and are deterministic and testable.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// Most reducers return zero or one effect, so effects are collected in a
    /// [`SmallVec`] that stays on the stack for up to four entries.
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// Implementations must not perform I/O. Anything that touches the
        /// outside world is returned as an [`Effect`] for the runtime.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects are values, not execution. The runtime decides how and when to
/// carry them out.
pub mod effect {
    /// Effect type - describes a side effect to be executed
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects carry back into the system
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Append the wrapped event to the current stream, apply it to the
        /// state, then publish it
        Persist(Action),

        /// Issue the wrapped command through the command dispatch path
        Dispatch(Action),

        /// The action was invalid and nothing was recorded
        Reject(String),
    }

    impl<Action> Effect<Action> {
        /// Returns `true` for [`Effect::None`]
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Self::None)
        }

        /// The persisted action, if this effect persists one
        #[must_use]
        pub const fn persisted(&self) -> Option<&Action> {
            match self {
                Self::Persist(action) => Some(action),
                _ => None,
            }
        }

        /// The dispatched action, if this effect dispatches one
        #[must_use]
        pub const fn dispatched(&self) -> Option<&Action> {
            match self {
                Self::Dispatch(action) => Some(action),
                _ => None,
            }
        }

        /// Transform the carried action, keeping the effect kind
        #[must_use]
        pub fn map<B, F>(self, f: F) -> Effect<B>
        where
            F: FnOnce(Action) -> B,
        {
            match self {
                Self::None => Effect::None,
                Self::Persist(action) => Effect::Persist(f(action)),
                Self::Dispatch(action) => Effect::Dispatch(f(action)),
                Self::Reject(reason) => Effect::Reject(reason),
            }
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
