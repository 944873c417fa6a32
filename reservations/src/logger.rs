//! Logs every event on the reservation topic.

use async_trait::async_trait;
use roomledger_core::event::SerializedEvent;
use roomledger_runtime::{EventHandler, HandlerError};
use tracing::info;

/// Match-all handler writing one `info` line per event.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventLogger;

#[async_trait]
impl EventHandler for EventLogger {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
        let stream_id = event.stream_id();
        info!(
            event_type = %event.event_type,
            stream_id = stream_id.as_ref().map_or("-", |id| id.as_str()),
            version = event.version().map_or(0, |v| v.value()),
            "Event"
        );
        Ok(())
    }
}
