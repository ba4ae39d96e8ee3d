//! Typed events emitted by the supervisor.
//!
//! `GameEvent` is the payload, `EventKind` the tag subscribers key on.
//! Events are serialized with a `type` tag so the daemon can log them as JSON:
//!
//! ```json
//! { "type": "joined", "player": "Alice", "entity_id": 5, ... }
//! ```

pub mod bus;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::parser::LogRecord;

pub use bus::{EventBus, Listener};

/// Position reported in a join line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    // ========== Lifecycle ==========
    /// A spawn is about to be attempted.
    StartRequested,
    /// The server printed its "Done" line and accepts players.
    Started,
    /// A stop command was written to the server.
    StopRequested,
    /// The child process exited, for any reason.
    Stopped { exit_code: Option<i32> },
    /// The server announced its shutdown (`Stopping the server`).
    Stopping { actor: Option<String> },
    /// A fatal line or a failed spawn.
    Error { message: String },

    // ========== Raw output ==========
    /// Every line that follows the log grammar (or falls back to raw text).
    Log(LogRecord),
    /// JVM banner or stack trace output that is not parsed.
    JavaOutput { line: String },

    // ========== Server info ==========
    VersionDetected { version: String },
    SaveOff,
    SaveOn,
    Saved,

    // ========== Players ==========
    Authenticated { player: String, uuid: String },
    Joined {
        player: String,
        source: Option<String>,
        entity_id: u32,
        location: Location,
    },
    Left { player: String, reason: String },
    Message { player: String, text: String },
    Killed {
        victim: String,
        killer: String,
        weapon: Option<String>,
    },

    // ========== Administration (bracketed) ==========
    Banned { actor: Option<String>, player: String },
    Unbanned { actor: Option<String>, player: String },
    Opped { actor: Option<String>, player: String },
    Deopped { actor: Option<String>, player: String },
    Scored {
        actor: Option<String>,
        player: String,
        objective: String,
        score: i64,
    },
    ExperienceGiven {
        actor: Option<String>,
        player: String,
        amount: u32,
        levels: bool,
    },
    Teleported {
        actor: Option<String>,
        player: String,
        target: String,
    },
    SpawnPointSet {
        actor: Option<String>,
        player: String,
        x: i64,
        y: i64,
        z: i64,
    },
}

/// Tag of a `GameEvent` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StartRequested,
    Started,
    StopRequested,
    Stopped,
    Stopping,
    Error,
    Log,
    JavaOutput,
    VersionDetected,
    SaveOff,
    SaveOn,
    Saved,
    Authenticated,
    Joined,
    Left,
    Message,
    Killed,
    Banned,
    Unbanned,
    Opped,
    Deopped,
    Scored,
    ExperienceGiven,
    Teleported,
    SpawnPointSet,
}

impl EventKind {
    pub const ALL: [EventKind; 25] = [
        Self::StartRequested,
        Self::Started,
        Self::StopRequested,
        Self::Stopped,
        Self::Stopping,
        Self::Error,
        Self::Log,
        Self::JavaOutput,
        Self::VersionDetected,
        Self::SaveOff,
        Self::SaveOn,
        Self::Saved,
        Self::Authenticated,
        Self::Joined,
        Self::Left,
        Self::Message,
        Self::Killed,
        Self::Banned,
        Self::Unbanned,
        Self::Opped,
        Self::Deopped,
        Self::Scored,
        Self::ExperienceGiven,
        Self::Teleported,
        Self::SpawnPointSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartRequested => "start_requested",
            Self::Started => "started",
            Self::StopRequested => "stop_requested",
            Self::Stopped => "stopped",
            Self::Stopping => "stopping",
            Self::Error => "error",
            Self::Log => "log",
            Self::JavaOutput => "java_output",
            Self::VersionDetected => "version_detected",
            Self::SaveOff => "save_off",
            Self::SaveOn => "save_on",
            Self::Saved => "saved",
            Self::Authenticated => "authenticated",
            Self::Joined => "joined",
            Self::Left => "left",
            Self::Message => "message",
            Self::Killed => "killed",
            Self::Banned => "banned",
            Self::Unbanned => "unbanned",
            Self::Opped => "opped",
            Self::Deopped => "deopped",
            Self::Scored => "scored",
            Self::ExperienceGiven => "experience_given",
            Self::Teleported => "teleported",
            Self::SpawnPointSet => "spawn_point_set",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown event kind '{0}'")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

impl GameEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StartRequested => EventKind::StartRequested,
            Self::Started => EventKind::Started,
            Self::StopRequested => EventKind::StopRequested,
            Self::Stopped { .. } => EventKind::Stopped,
            Self::Stopping { .. } => EventKind::Stopping,
            Self::Error { .. } => EventKind::Error,
            Self::Log(_) => EventKind::Log,
            Self::JavaOutput { .. } => EventKind::JavaOutput,
            Self::VersionDetected { .. } => EventKind::VersionDetected,
            Self::SaveOff => EventKind::SaveOff,
            Self::SaveOn => EventKind::SaveOn,
            Self::Saved => EventKind::Saved,
            Self::Authenticated { .. } => EventKind::Authenticated,
            Self::Joined { .. } => EventKind::Joined,
            Self::Left { .. } => EventKind::Left,
            Self::Message { .. } => EventKind::Message,
            Self::Killed { .. } => EventKind::Killed,
            Self::Banned { .. } => EventKind::Banned,
            Self::Unbanned { .. } => EventKind::Unbanned,
            Self::Opped { .. } => EventKind::Opped,
            Self::Deopped { .. } => EventKind::Deopped,
            Self::Scored { .. } => EventKind::Scored,
            Self::ExperienceGiven { .. } => EventKind::ExperienceGiven,
            Self::Teleported { .. } => EventKind::Teleported,
            Self::SpawnPointSet { .. } => EventKind::SpawnPointSet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("teleport_request".parse::<EventKind>().is_err());
    }

    #[test]
    fn serde_tag_matches_kind_name() {
        let event = GameEvent::Banned {
            actor: Some("Admin".into()),
            player: "Carol".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.kind().as_str());
        assert_eq!(value["player"], "Carol");

        let kind = serde_json::to_value(EventKind::SpawnPointSet).unwrap();
        assert_eq!(kind, "spawn_point_set");
    }
}
