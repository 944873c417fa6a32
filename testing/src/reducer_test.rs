//! Given/When/Then harness for reducers.
//!
//! Event-sourced reducers are easiest to describe as "after these events,
//! this command produces that effect", so the harness can build the initial
//! state by replaying actions as well as from an explicit value.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use roomledger_core::{effect::Effect, reducer::Reducer};

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Type alias for effect assertion functions
type EffectAssertion<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// ```ignore
/// use roomledger_testing::{ReducerTest, assertions};
///
/// ReducerTest::new(ReservationReducer)
///     .with_env(test_clock())
///     .given_state(ReservationState::default())
///     .given_actions(vec![created_event()])
///     .when_action(confirm_command())
///     .then_effects(|effects| {
///         assertions::assert_persisted(effects);
///     })
///     .run();
/// ```
pub struct ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: Option<E>,
    initial_state: Option<S>,
    history: Vec<A>,
    action: Option<A>,
    state_assertions: Vec<StateAssertion<S>>,
    effect_assertions: Vec<EffectAssertion<A>>,
}

impl<R, S, A, E> ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            history: Vec::new(),
            action: None,
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
        }
    }

    /// Set the environment for the test
    #[must_use]
    pub fn with_env(mut self, env: E) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Replay these actions onto the initial state before the action under
    /// test (Given). Their effects are discarded.
    #[must_use]
    pub fn given_actions(mut self, actions: Vec<A>) -> Self {
        self.history = actions;
        self
    }

    /// Set the action to test (When)
    #[must_use]
    pub fn when_action(mut self, action: A) -> Self {
        self.action = Some(action);
        self
    }

    /// Add an assertion about the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the resulting effects (Then)
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect<A>]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if initial state, action, or environment is not set,
    /// or if any assertions fail.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("Initial state must be set with given_state()");

        let action = self.action.expect("Action must be set with when_action()");

        let env = self
            .environment
            .expect("Environment must be set with with_env()");

        for past in self.history {
            let _ = self.reducer.reduce(&mut state, past, &env);
        }

        let effects = self.reducer.reduce(&mut state, action, &env);

        for assertion in self.state_assertions {
            assertion(&state);
        }

        for assertion in self.effect_assertions {
            assertion(&effects);
        }
    }
}

/// Helper assertions for effects
pub mod assertions {
    use roomledger_core::effect::Effect;
    use std::fmt::Debug;

    /// Assert that there are no effects
    ///
    /// # Panics
    ///
    /// Panics if any effect other than [`Effect::None`] is present.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_effects<A: Debug>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().all(Effect::is_none),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Assert the number of effects
    ///
    /// # Panics
    ///
    /// Panics if the number of effects doesn't match expected.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_effects_count<A>(effects: &[Effect<A>], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "Expected {} effects, but found {}",
            expected,
            effects.len()
        );
    }

    /// Assert exactly one persisted action and return it
    ///
    /// # Panics
    ///
    /// Panics unless exactly one [`Effect::Persist`] is present.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_persisted<A: Debug>(effects: &[Effect<A>]) -> &A {
        let persisted: Vec<&A> = effects.iter().filter_map(Effect::persisted).collect();
        match persisted.as_slice() {
            [one] => one,
            _ => panic!("Expected exactly one Persist effect, found {effects:?}"),
        }
    }

    /// Assert exactly one dispatched action and return it
    ///
    /// # Panics
    ///
    /// Panics unless exactly one [`Effect::Dispatch`] is present.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_dispatched<A: Debug>(effects: &[Effect<A>]) -> &A {
        let dispatched: Vec<&A> = effects.iter().filter_map(Effect::dispatched).collect();
        match dispatched.as_slice() {
            [one] => one,
            _ => panic!("Expected exactly one Dispatch effect, found {effects:?}"),
        }
    }

    /// Assert the reducer rejected the action and return the reason
    ///
    /// # Panics
    ///
    /// Panics unless a [`Effect::Reject`] is present and nothing was persisted.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_rejected<A: Debug>(effects: &[Effect<A>]) -> &str {
        assert!(
            effects.iter().all(|e| e.persisted().is_none()),
            "Rejected action must not persist anything: {effects:?}"
        );
        effects
            .iter()
            .find_map(|effect| match effect {
                Effect::Reject(reason) => Some(reason.as_str()),
                _ => None,
            })
            .unwrap_or_else(|| panic!("Expected a Reject effect, found {effects:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomledger_core::{SmallVec, smallvec};

    #[derive(Clone, Debug, Default)]
    struct GateState {
        open: bool,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum GateAction {
        Open,
        Opened,
    }

    struct GateReducer;

    impl Reducer for GateReducer {
        type State = GateState;
        type Action = GateAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut GateState,
            action: GateAction,
            _env: &(),
        ) -> SmallVec<[Effect<GateAction>; 4]> {
            match action {
                GateAction::Open if state.open => smallvec![Effect::Reject("already open".into())],
                GateAction::Open => smallvec![Effect::Persist(GateAction::Opened)],
                GateAction::Opened => {
                    state.open = true;
                    smallvec![Effect::None]
                }
            }
        }
    }

    #[test]
    fn command_persists_event() {
        ReducerTest::new(GateReducer)
            .with_env(())
            .given_state(GateState::default())
            .when_action(GateAction::Open)
            .then_effects(|effects| {
                assert_eq!(assertions::assert_persisted(effects), &GateAction::Opened);
            })
            .run();
    }

    #[test]
    fn history_is_replayed_first() {
        ReducerTest::new(GateReducer)
            .with_env(())
            .given_state(GateState::default())
            .given_actions(vec![GateAction::Opened])
            .when_action(GateAction::Open)
            .then_state(|state| assert!(state.open))
            .then_effects(|effects| {
                assert_eq!(assertions::assert_rejected(effects), "already open");
            })
            .run();
    }

    #[test]
    fn applying_event_has_no_effects() {
        ReducerTest::new(GateReducer)
            .with_env(())
            .given_state(GateState::default())
            .when_action(GateAction::Opened)
            .then_effects(|effects| {
                assertions::assert_no_effects(effects);
                assertions::assert_effects_count(effects, 1);
            })
            .run();
    }
}
