//! Command dispatch contract.
//!
//! A command is a request addressed to exactly one aggregate stream. The
//! dispatch path routes it by [`Command::kind`] to a single registered
//! handler and reports what happened as a [`CommandOutcome`].

use crate::event_bus::EventBusError;
use crate::event_store::EventStoreError;
use crate::stream::{StreamId, Version};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// A request to change one aggregate.
pub trait Command: Send + Sync + 'static {
    /// Routing key, e.g. `"CreateReservation"`.
    fn kind(&self) -> &'static str;

    /// The stream this command targets.
    fn stream_id(&self) -> StreamId;
}

/// What a handler did with a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Events were appended; the stream is now at `version`.
    Accepted {
        /// Stream version after the append.
        version: Version,
    },
    /// The command was invalid for the current state. Nothing was appended.
    Rejected {
        /// Why the command was refused.
        reason: String,
    },
    /// The command was valid but produced no events.
    Unchanged,
}

impl CommandOutcome {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::Rejected { .. } => "rejected",
            Self::Unchanged => "unchanged",
        }
    }

    /// Whether events were appended.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Failures of the dispatch path itself (as opposed to domain rejections).
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// No handler is registered for the command kind.
    #[error("No handler registered for command kind '{0}'")]
    NoHandler(String),

    /// A handler is already registered for the command kind.
    #[error("A handler is already registered for command kind '{0}'")]
    DuplicateHandler(String),

    /// The event store refused or failed the append.
    #[error("Event store error: {0}")]
    Store(#[from] EventStoreError),

    /// The appended event could not be published.
    #[error("Event bus error: {0}")]
    Bus(#[from] EventBusError),

    /// An event could not be encoded or a stored event could not be decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// The dispatcher no longer accepts commands.
    #[error("Command dispatch is closed")]
    Closed,
}

/// Boxed future returned by [`CommandDispatcher::dispatch`].
pub type DispatchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CommandOutcome, DispatchError>> + Send + 'a>>;

/// Something that accepts commands of type `C`.
///
/// # Dyn Compatibility
///
/// Returns a boxed future so sagas can hold an `Arc<dyn CommandDispatcher<C>>`
/// and tests can substitute a recording stub.
pub trait CommandDispatcher<C>: Send + Sync {
    /// Handle one command.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] when the command could not be routed or
    /// its events could not be stored or published. Domain rejections are
    /// reported as [`CommandOutcome::Rejected`], not as errors.
    fn dispatch(&self, command: C) -> DispatchFuture<'_>;
}
