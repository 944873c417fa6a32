//! # Roomledger Runtime
//!
//! Executes reducers against the collaborators defined in `roomledger-core`.
//!
//! ## Core Components
//!
//! - **[`AggregateStore`]**: Replays a stream, reduces a command, appends and
//!   publishes the resulting events under a per-stream exclusive section
//! - **[`CommandBus`]**: Routes commands by kind to one registered handler
//! - **[`EventConsumer`]**: Subscribes to the event bus and feeds an
//!   [`EventHandler`], keeping per-stream order across parallel lanes
//! - **[`metrics`]**: Counters and histograms for all of the above
//!
//! ## Example
//!
//! ```ignore
//! use roomledger_runtime::{AggregateStore, CommandBus};
//!
//! let store = Arc::new(AggregateStore::new(
//!     ReservationReducer,
//!     (),
//!     event_store,
//!     event_bus,
//!     clock,
//! ));
//!
//! let bus = CommandBus::new();
//! bus.register(ReservationCommand::KINDS, store)?;
//!
//! let outcome = bus.dispatch(command).await?;
//! ```

pub mod aggregate_store;
pub mod command_bus;
pub mod consumer;
pub mod metrics;

pub use aggregate_store::{Aggregate, AggregateStore};
pub use command_bus::CommandBus;
pub use consumer::{
    ConsumerError, ConsumerHandle, ConsumerProgress, EventConsumer, EventHandler, HandlerError,
};
