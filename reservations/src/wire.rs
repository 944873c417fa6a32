//! JSON encoding for commands submitted from outside the process.
//!
//! A submission carries the command type next to the payload so the
//! receiver can pick the payload shape before parsing it:
//!
//! ```json
//! {
//!   "command_type": "CreateReservation",
//!   "payload": {
//!     "ID": "6f1c…",
//!     "Name": "My new event",
//!     "User": "Matt",
//!     "RoomID": 3,
//!     "StartTime": "2025-01-01T10:00:00Z",
//!     "EndTime": "2025-01-01T11:00:00Z"
//!   }
//! }
//! ```

use crate::commands::ReservationCommand;
use crate::types::{ReservationId, RoomId};
use chrono::{DateTime, Utc};
use roomledger_core::command::Command;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Wire codec failures.
#[derive(Error, Debug)]
pub enum WireError {
    /// Malformed JSON or a payload missing fields.
    #[error("Invalid command JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The command type is not one the system handles.
    #[error("Unknown command type: {0}")]
    UnknownCommandType(String),
}

/// A command as submitted over the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Command kind, e.g. `CreateReservation`
    pub command_type: String,
    /// Kind-specific fields
    pub payload: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatePayload {
    #[serde(rename = "ID")]
    id: Uuid,
    name: String,
    user: String,
    #[serde(rename = "RoomID")]
    room_id: u32,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DecisionPayload {
    #[serde(rename = "ID")]
    id: Uuid,
    user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeTimePayload {
    #[serde(rename = "ID")]
    id: Uuid,
    user: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl CommandEnvelope {
    /// Wrap a command for submission.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Json`] if the payload cannot be encoded.
    pub fn from_command(command: &ReservationCommand) -> Result<Self, WireError> {
        let payload = match command {
            ReservationCommand::CreateReservation {
                id,
                name,
                user,
                room_id,
                start,
                end,
            } => serde_json::to_value(CreatePayload {
                id: *id.as_uuid(),
                name: name.clone(),
                user: user.clone(),
                room_id: room_id.value(),
                start_time: *start,
                end_time: *end,
            })?,
            ReservationCommand::ConfirmReservation { id, user }
            | ReservationCommand::CancelReservation { id, user } => {
                serde_json::to_value(DecisionPayload {
                    id: *id.as_uuid(),
                    user: user.clone(),
                    message: None,
                })?
            }
            ReservationCommand::DeclineReservation { id, user, message } => {
                serde_json::to_value(DecisionPayload {
                    id: *id.as_uuid(),
                    user: user.clone(),
                    message: Some(message.clone()),
                })?
            }
            ReservationCommand::ChangeReservationTime {
                id,
                user,
                start,
                end,
            } => serde_json::to_value(ChangeTimePayload {
                id: *id.as_uuid(),
                user: user.clone(),
                start_time: *start,
                end_time: *end,
            })?,
        };
        Ok(Self {
            command_type: command.kind().to_string(),
            payload,
        })
    }

    /// Parse the payload according to the command type.
    ///
    /// # Errors
    ///
    /// - [`WireError::UnknownCommandType`] for unsupported types
    /// - [`WireError::Json`] if the payload does not match the type
    pub fn into_command(self) -> Result<ReservationCommand, WireError> {
        fn parse<T: DeserializeOwned>(payload: serde_json::Value) -> Result<T, WireError> {
            Ok(serde_json::from_value(payload)?)
        }

        let command = match self.command_type.as_str() {
            "CreateReservation" => {
                let p: CreatePayload = parse(self.payload)?;
                ReservationCommand::CreateReservation {
                    id: ReservationId::from_uuid(p.id),
                    name: p.name,
                    user: p.user,
                    room_id: RoomId::new(p.room_id),
                    start: p.start_time,
                    end: p.end_time,
                }
            }
            "ConfirmReservation" => {
                let p: DecisionPayload = parse(self.payload)?;
                ReservationCommand::ConfirmReservation {
                    id: ReservationId::from_uuid(p.id),
                    user: p.user,
                }
            }
            "DeclineReservation" => {
                let p: DecisionPayload = parse(self.payload)?;
                ReservationCommand::DeclineReservation {
                    id: ReservationId::from_uuid(p.id),
                    user: p.user,
                    message: p.message.unwrap_or_default(),
                }
            }
            "ChangeReservationTime" => {
                let p: ChangeTimePayload = parse(self.payload)?;
                ReservationCommand::ChangeReservationTime {
                    id: ReservationId::from_uuid(p.id),
                    user: p.user,
                    start: p.start_time,
                    end: p.end_time,
                }
            }
            "CancelReservation" => {
                let p: DecisionPayload = parse(self.payload)?;
                ReservationCommand::CancelReservation {
                    id: ReservationId::from_uuid(p.id),
                    user: p.user,
                }
            }
            other => return Err(WireError::UnknownCommandType(other.to_string())),
        };
        Ok(command)
    }

    /// Serialize to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Json`] if encoding fails.
    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Json`] for malformed input.
    pub fn from_json(json: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(json)?)
    }
}
