use serde::{Deserialize, Serialize};
use std::fmt;

pub mod store;

/// Side length of the square playable field, in game units.
pub const FIELD_SIZE: f32 = 800.0;
/// Rendered size of a participant; positions are clamped so the whole
/// entity stays inside the field.
pub const ENTITY_SIZE: f32 = 32.0;
/// Distance moved per pressed axis flag on one simulation tick.
pub const MOVE_STEP: f32 = 5.0;
/// Coordinates beyond this magnitude fail wire validation.
pub const COORD_LIMIT: f32 = 10_000.0;

/// Outbound position flush period (~30 sends per second at most).
pub const THROTTLE_INTERVAL_MS: u64 = 33;
/// Period of the slow, best-effort durable-store position mirror.
pub const STORE_FLUSH_INTERVAL_MS: u64 = 250;
pub const SIM_TICK_MS: u64 = 16;
pub const RENDER_TICK_MS: u64 = 16;

/// Per-axis smoothing factor applied to remote positions each render tick.
pub const SMOOTHING: f32 = 0.2;
/// Once within this distance on both axes, a remote position snaps to its
/// target instead of approaching it forever.
pub const SNAP_EPSILON: f32 = 0.1;

pub const BASE_RETRY_DELAY_MS: u64 = 1000;
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// A synchronized entity as seen by every peer. The `id` is client-chosen,
/// assigned once, and is the join key across registry, mirror, and store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub color: String,
}

impl Participant {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        x: f32,
        y: f32,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            x,
            y,
            color: color.into(),
        }
    }
}

/// Wire vocabulary, one JSON text frame per message. Decoded exactly once
/// at the transport boundary; everything after that matches exhaustively.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Message {
    Join {
        #[serde(flatten)]
        participant: Participant,
    },
    Position {
        id: String,
        x: f32,
        y: f32,
    },
    Leave {
        id: String,
    },
    Snapshot {
        participants: Vec<Participant>,
    },
}

#[derive(Debug)]
pub enum ProtocolError {
    Json(serde_json::Error),
    InvalidCoordinates { x: f32, y: f32 },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Json(e) => write!(f, "undecodable message: {}", e),
            ProtocolError::InvalidCoordinates { x, y } => {
                write!(f, "coordinates out of range: ({}, {})", x, y)
            }
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Json(e)
    }
}

impl Message {
    /// Decodes one text frame and validates its payload. Callers drop and
    /// log on error; a bad frame is never fatal to the connection.
    pub fn decode(text: &str) -> Result<Message, ProtocolError> {
        let message: Message = serde_json::from_str(text)?;
        message.validate()?;
        Ok(message)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Message::Join { participant } => validate_coords(participant.x, participant.y),
            Message::Position { x, y, .. } => validate_coords(*x, *y),
            Message::Snapshot { participants } => {
                for p in participants {
                    validate_coords(p.x, p.y)?;
                }
                Ok(())
            }
            Message::Leave { .. } => Ok(()),
        }
    }

    /// The participant id this message is about, if it names one.
    pub fn subject_id(&self) -> Option<&str> {
        match self {
            Message::Join { participant } => Some(&participant.id),
            Message::Position { id, .. } => Some(id),
            Message::Leave { id } => Some(id),
            Message::Snapshot { .. } => None,
        }
    }
}

fn validate_coords(x: f32, y: f32) -> Result<(), ProtocolError> {
    if !x.is_finite() || !y.is_finite() || x.abs() > COORD_LIMIT || y.abs() > COORD_LIMIT {
        return Err(ProtocolError::InvalidCoordinates { x, y });
    }
    Ok(())
}

/// Clamps one axis so the entity stays fully inside the field.
pub fn clamp_to_field(v: f32) -> f32 {
    v.clamp(0.0, FIELD_SIZE - ENTITY_SIZE)
}
