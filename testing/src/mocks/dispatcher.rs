use roomledger_core::command::{CommandDispatcher, CommandOutcome, DispatchError, DispatchFuture};
use std::sync::{Arc, Mutex, PoisonError};

/// Command dispatcher stub that records every command it receives.
///
/// Lets saga logic be tested without a live aggregate behind it. Answers
/// [`CommandOutcome::Unchanged`] unless told to fail.
#[derive(Debug)]
pub struct RecordingDispatcher<C> {
    commands: Arc<Mutex<Vec<C>>>,
    failure: Arc<Mutex<Option<DispatchError>>>,
}

impl<C> Clone for RecordingDispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            commands: Arc::clone(&self.commands),
            failure: Arc::clone(&self.failure),
        }
    }
}

impl<C> Default for RecordingDispatcher<C> {
    fn default() -> Self {
        Self {
            commands: Arc::new(Mutex::new(Vec::new())),
            failure: Arc::new(Mutex::new(None)),
        }
    }
}

impl<C: Clone> RecordingDispatcher<C> {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every following dispatch with `error` (still recording the command).
    pub fn fail_with(&self, error: DispatchError) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Everything dispatched so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<C> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget recorded commands.
    pub fn clear(&self) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<C> CommandDispatcher<C> for RecordingDispatcher<C>
where
    C: Send + 'static,
{
    fn dispatch(&self, command: C) -> DispatchFuture<'_> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        Box::pin(async move {
            match failure {
                Some(error) => Err(error),
                None => Ok(CommandOutcome::Unchanged),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_fails_on_demand() {
        let recorder = RecordingDispatcher::<&'static str>::new();
        assert!(recorder.dispatch("first").await.is_ok());

        recorder.fail_with(DispatchError::Closed);
        assert!(matches!(
            recorder.dispatch("second").await,
            Err(DispatchError::Closed)
        ));

        assert_eq!(recorder.commands(), vec!["first", "second"]);
        recorder.clear();
        assert!(recorder.commands().is_empty());
    }
}
