//! Wire types for the room coordinator protocol.
//!
//! The coordinator pushes JSON objects tagged by a `type` field. Only
//! `gameAlert` messages matter to the phase controller:
//!
//! ```json
//! {"type": "gameAlert", "status": "gameStart"}
//! ```
//!
//! Every other `type` (`chat`, `draw`, `playerCnt`, ...) belongs to the
//! in-room views and is surfaced as [`InboundMessage::Other`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, RoomError};

/// Discriminant of phase-change messages.
pub const GAME_ALERT_TYPE: &str = "gameAlert";

/// Room identifier used when the route carries none.
pub const NO_ROOM: &str = "noRoom";

// ── Identifiers ─────────────────────────────────────────────────────

/// Opaque identifier of a room, taken from the route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomIdx(String);

impl RoomIdx {
    pub fn new(idx: impl Into<String>) -> Self {
        Self(idx.into())
    }

    /// Resolve the route parameter, falling back to [`NO_ROOM`].
    pub fn from_route(param: Option<&str>) -> Self {
        match param {
            Some(idx) if !idx.is_empty() => Self::new(idx),
            _ => Self::new(NO_ROOM),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The game type selected for the room (e.g. `"AiPainting"`).
///
/// Chosen by the ready view and stored in the session; the phase controller
/// only reads it when entering the in-game phase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameCategory(String);

impl GameCategory {
    pub fn new(category: impl Into<String>) -> Self {
        Self(category.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Room status ─────────────────────────────────────────────────────

/// The `status` value carried by a `gameAlert` message.
///
/// Unknown strings are kept verbatim so the view selector can show the
/// fallback placeholder instead of failing the parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum RoomStatus {
    /// Waiting for players.
    #[default]
    Ready,
    /// A game is running.
    GameStart,
    /// The game finished; results are shown.
    GameEnd,
    /// Any other status string.
    Unrecognized(String),
}

impl RoomStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ready => "ready",
            Self::GameStart => "gameStart",
            Self::GameEnd => "gameEnd",
            Self::Unrecognized(other) => other,
        }
    }
}

impl From<String> for RoomStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ready" => Self::Ready,
            "gameStart" => Self::GameStart,
            "gameEnd" => Self::GameEnd,
            _ => Self::Unrecognized(value),
        }
    }
}

impl From<&str> for RoomStatus {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<RoomStatus> for String {
    fn from(status: RoomStatus) -> Self {
        match status {
            RoomStatus::Unrecognized(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Room phase ──────────────────────────────────────────────────────

/// Why a status could not be turned into a renderable phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidPhase {
    /// The coordinator sent a status this client does not know.
    UnrecognizedStatus(String),
    /// `gameStart` arrived but no game category was selected.
    MissingGameCategory,
}

/// The room's phase as seen by the views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomPhase {
    Ready,
    InGame(GameCategory),
    Ended,
    Invalid(InvalidPhase),
}

impl RoomPhase {
    /// Combine the last received status with the selected game category.
    pub fn derive(status: &RoomStatus, category: Option<&GameCategory>) -> Self {
        match status {
            RoomStatus::Ready => Self::Ready,
            RoomStatus::GameStart => match category {
                Some(category) => Self::InGame(category.clone()),
                None => Self::Invalid(InvalidPhase::MissingGameCategory),
            },
            RoomStatus::GameEnd => Self::Ended,
            RoomStatus::Unrecognized(other) => {
                Self::Invalid(InvalidPhase::UnrecognizedStatus(other.clone()))
            }
        }
    }

    /// Returns `true` for [`RoomPhase::Ended`]; no inbound handler leaves it
    /// on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }
}

// ── Inbound messages ────────────────────────────────────────────────

/// A message pushed by the coordinator, classified by its `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A phase-change signal.
    GameAlert { status: RoomStatus },
    /// Any other message type, kept intact for other consumers.
    Other { kind: String, body: Value },
}

impl InboundMessage {
    /// Parse a raw text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::Serialization`] if the text is not JSON, and
    /// [`RoomError::MalformedEvent`] if it is not an object with a string
    /// `type`, or if a `gameAlert` lacks a string `status`.
    pub fn parse(text: &str) -> Result<Self> {
        let body: Value = serde_json::from_str(text)?;
        let kind = body
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| RoomError::MalformedEvent("missing string `type` field".into()))?
            .to_string();

        if kind != GAME_ALERT_TYPE {
            return Ok(Self::Other { kind, body });
        }

        let status = body
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| RoomError::MalformedEvent("gameAlert without string `status`".into()))?;
        Ok(Self::GameAlert {
            status: RoomStatus::from(status),
        })
    }

    /// The `type` discriminant of this message.
    pub fn kind(&self) -> &str {
        match self {
            Self::GameAlert { .. } => GAME_ALERT_TYPE,
            Self::Other { kind, .. } => kind,
        }
    }
}

/// Build the JSON text of a `gameAlert` message.
pub fn game_alert_json(status: &RoomStatus) -> String {
    serde_json::json!({ "type": GAME_ALERT_TYPE, "status": status }).to_string()
}
