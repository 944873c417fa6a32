//! Reservation system demo.
//!
//! Runs the classic walkthrough against the in-memory system:
//!
//! 1. Matt books room 3 for half an hour
//! 2. Matt moves the booking an hour later
//! 3. Joyce asks for the same slot in room 3 and is declined
//! 4. Matt cancels
//!
//! Commands are submitted as JSON envelopes, the way an external client would
//! send them.

use anyhow::Context;
use chrono::{Duration, Utc};
use roomledger_reservations::billing::BillingHistory;
use roomledger_reservations::{
    CommandEnvelope, Config, ReservationCommand, ReservationId, ReservationSystem, RoomId,
};
use roomledger_runtime::metrics::MetricsRecorder;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let recorder = MetricsRecorder::install()?;
    let system = ReservationSystem::start(config).await?;

    let room = RoomId::new(3);
    let matt = ReservationId::new();
    let joyce = ReservationId::new();
    let now = Utc::now();
    let moved_start = now + Duration::hours(1);
    let moved_end = now + Duration::hours(2);

    let steps = [
        ReservationCommand::CreateReservation {
            id: matt,
            name: "My new event".into(),
            user: "Matt".into(),
            room_id: room,
            start: now + Duration::minutes(30),
            end: now + Duration::hours(1),
        },
        ReservationCommand::ChangeReservationTime {
            id: matt,
            user: "Matt".into(),
            start: moved_start,
            end: moved_end,
        },
        ReservationCommand::CreateReservation {
            id: joyce,
            name: "Joyce's birthday bash".into(),
            user: "Joyce".into(),
            room_id: room,
            start: moved_start,
            end: moved_end,
        },
        ReservationCommand::CancelReservation {
            id: matt,
            user: "Matt".into(),
        },
    ];

    for command in &steps {
        let json = CommandEnvelope::from_command(command)?.to_json()?;
        info!(%json, "Submitting command");
        let outcome = system.submit(CommandEnvelope::from_json(&json)?).await?;
        if outcome.is_accepted() {
            info!(kind = command_kind(command), "Command accepted");
        } else {
            warn!(kind = command_kind(command), ?outcome, "Command not applied");
        }
        system.settle().await?;
        report_views(&system, &[matt, joyce]).await?;
    }

    for user in ["Matt", "Joyce"] {
        match system.billing_history(user).await? {
            Some(history) => print_history(&history),
            None => println!("{user}: no billing history"),
        }
    }

    if let Some(text) = recorder.render() {
        println!("{text}");
    }

    system.shutdown().await;
    Ok(())
}

fn command_kind(command: &ReservationCommand) -> &'static str {
    use roomledger_core::command::Command;
    command.kind()
}

async fn report_views(system: &ReservationSystem, ids: &[ReservationId]) -> anyhow::Result<()> {
    for id in ids {
        if let Some(view) = system.reservation(*id).await? {
            let slot = view.slot.map_or_else(|| "-".to_string(), |slot| slot.to_string());
            println!(
                "{:<24} {:<6} {:<10} v{} {slot}",
                view.name, view.creator, view.status, view.version
            );
        }
    }
    println!();
    Ok(())
}

fn print_history(history: &BillingHistory) {
    println!(
        "{}: {} minutes, {} total (v{})",
        history.user, history.total_minutes, history.total_paid, history.version
    );
    for bill in history.bills.values() {
        println!(
            "  {} {} minutes, {} (v{})",
            bill.month, bill.minutes, bill.total, bill.version
        );
    }
}
