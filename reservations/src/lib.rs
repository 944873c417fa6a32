//! # Roomledger Reservations
//!
//! Event-sourced meeting-room reservations.
//!
//! A reservation is an aggregate that only records what users and the
//! scheduler ask of it. Everything else reacts to its events:
//!
//! - **[`arbiter::ConflictArbiter`]** keeps one schedule per room and answers
//!   every new or moved reservation with a confirm or a decline
//! - **[`billing::BillingLedger`]** charges confirmed minutes to the owner's
//!   monthly bill and refunds them on cancellation or rescheduling
//! - **[`view::ReservationViewProjector`]** keeps a query snapshot per reservation
//! - **[`logger::EventLogger`]** writes every event to the log
//!
//! [`app::ReservationSystem`] wires these together over the in-memory
//! event store, event bus and projection store.
//!
//! ## Example
//!
//! ```ignore
//! let system = ReservationSystem::start(Config::from_env()?).await?;
//! system.dispatch(ReservationCommand::CreateReservation { .. }).await?;
//! system.settle().await?;
//! let view = system.reservation(id).await?;
//! ```

pub mod aggregate;
pub mod app;
pub mod arbiter;
pub mod billing;
pub mod commands;
pub mod config;
pub mod events;
pub mod logger;
pub mod read_model;
pub mod types;
pub mod view;
pub mod wire;

pub use aggregate::{ReservationReducer, ReservationState};
pub use app::{AppError, ReservationSystem};
pub use commands::ReservationCommand;
pub use config::Config;
pub use events::ReservationEvent;
pub use types::{Money, ReservationId, ReservationStatus, RoomId, TimeSlot};
pub use wire::CommandEnvelope;
