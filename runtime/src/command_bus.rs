//! Routes commands by kind to exactly one registered handler.

use roomledger_core::command::{
    Command, CommandDispatcher, CommandOutcome, DispatchError, DispatchFuture,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Command router.
///
/// Handlers register for one or more command kinds; a kind can only have one
/// handler. The bus is itself a [`CommandDispatcher`], so sagas can issue
/// follow-up commands through it without knowing which aggregate handles them.
pub struct CommandBus<C> {
    handlers: RwLock<HashMap<&'static str, Arc<dyn CommandDispatcher<C>>>>,
}

impl<C> Default for CommandBus<C> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }
}

impl<C: Command> CommandBus<C> {
    /// Create a bus with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every kind in `kinds`.
    ///
    /// Nothing is registered if any kind is already taken.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::DuplicateHandler`] naming the first taken kind.
    pub fn register(
        &self,
        kinds: &[&'static str],
        handler: Arc<dyn CommandDispatcher<C>>,
    ) -> Result<(), DispatchError> {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(taken) = kinds.iter().find(|kind| handlers.contains_key(**kind)) {
            return Err(DispatchError::DuplicateHandler((*taken).to_string()));
        }
        for kind in kinds {
            handlers.insert(*kind, Arc::clone(&handler));
        }
        tracing::debug!(?kinds, "Command handler registered");
        Ok(())
    }

    /// Whether a handler is registered for `kind`.
    #[must_use]
    pub fn handles(&self, kind: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(kind)
    }

    fn handler_for(&self, kind: &str) -> Option<Arc<dyn CommandDispatcher<C>>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
    }

    async fn route(&self, command: C) -> Result<CommandOutcome, DispatchError> {
        let kind = command.kind();
        let Some(handler) = self.handler_for(kind) else {
            tracing::error!(kind, "No handler registered for command");
            return Err(DispatchError::NoHandler(kind.to_string()));
        };

        let outcome = handler.dispatch(command).await;
        match &outcome {
            Ok(CommandOutcome::Rejected { reason }) => {
                tracing::info!(kind, %reason, "Command rejected by handler");
            }
            Ok(done) => tracing::debug!(kind, outcome = done.label(), "Command handled"),
            Err(error) => tracing::error!(kind, %error, "Command dispatch failed"),
        }
        outcome
    }
}

impl<C: Command> CommandDispatcher<C> for CommandBus<C> {
    fn dispatch(&self, command: C) -> DispatchFuture<'_> {
        Box::pin(self.route(command))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;
    use roomledger_core::stream::StreamId;
    use roomledger_testing::mocks::RecordingDispatcher;

    #[derive(Clone, Debug, PartialEq)]
    enum Lamp {
        On(u32),
        Off(u32),
    }

    impl Command for Lamp {
        fn kind(&self) -> &'static str {
            match self {
                Self::On(_) => "LampOn",
                Self::Off(_) => "LampOff",
            }
        }

        fn stream_id(&self) -> StreamId {
            match self {
                Self::On(id) | Self::Off(id) => StreamId::for_aggregate("lamp", id),
            }
        }
    }

    #[tokio::test]
    async fn routes_by_kind() {
        let bus = CommandBus::new();
        let on = RecordingDispatcher::<Lamp>::new();
        let off = RecordingDispatcher::<Lamp>::new();
        bus.register(&["LampOn"], Arc::new(on.clone())).unwrap();
        bus.register(&["LampOff"], Arc::new(off.clone())).unwrap();

        bus.dispatch(Lamp::On(1)).await.unwrap();
        bus.dispatch(Lamp::Off(2)).await.unwrap();

        assert_eq!(on.commands(), vec![Lamp::On(1)]);
        assert_eq!(off.commands(), vec![Lamp::Off(2)]);
    }

    #[tokio::test]
    async fn unknown_kind_is_an_error() {
        let bus: CommandBus<Lamp> = CommandBus::new();
        let result = bus.dispatch(Lamp::On(1)).await;
        assert!(matches!(result, Err(DispatchError::NoHandler(kind)) if kind == "LampOn"));
    }

    #[test]
    fn second_handler_for_a_kind_is_refused() {
        let bus = CommandBus::new();
        let first = RecordingDispatcher::<Lamp>::new();
        let second = RecordingDispatcher::<Lamp>::new();
        bus.register(&["LampOn"], Arc::new(first)).unwrap();

        let err = bus
            .register(&["LampOff", "LampOn"], Arc::new(second))
            .unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateHandler(kind) if kind == "LampOn"));
        assert!(!bus.handles("LampOff"));
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let bus = CommandBus::new();
        let failing = RecordingDispatcher::<Lamp>::new();
        failing.fail_with(DispatchError::Closed);
        bus.register(&["LampOn", "LampOff"], Arc::new(failing)).unwrap();

        assert!(matches!(
            bus.dispatch(Lamp::Off(3)).await,
            Err(DispatchError::Closed)
        ));
    }
}
