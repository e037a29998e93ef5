use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::call::events::{MediaKind, ParticipantId};

/// Lifecycle of one interview call.
///
/// `Lobby` is both the initial state and where every teardown lands.
/// `Error` is terminal until the user retries with a fresh join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    #[default]
    Lobby,
    Joining,
    InCall,
    Leaving,
    Error,
}

impl CallState {
    /// States from which `join()` may start a new attempt.
    pub fn can_join(self) -> bool {
        matches!(self, CallState::Lobby | CallState::Error)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CallState::Lobby => "lobby",
            CallState::Joining => "joining",
            CallState::InCall => "in_call",
            CallState::Leaving => "leaving",
            CallState::Error => "error",
        };
        f.write_str(label)
    }
}

/// Status line shown under the counter-party's avatar.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallStatus {
    #[default]
    Connecting,
    Listening,
    Speaking,
    Processing,
    RemoteLeft,
    /// Non-fatal message, e.g. a denied camera.
    Notice(String),
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Connecting => f.write_str("Connecting..."),
            CallStatus::Listening => f.write_str("Listening..."),
            CallStatus::Speaking => f.write_str("Speaking..."),
            CallStatus::Processing => f.write_str("AI is processing..."),
            CallStatus::RemoteLeft => f.write_str("AI has left the call."),
            CallStatus::Notice(msg) => f.write_str(msg),
        }
    }
}

/// Mirror of the counter-party as last reported by the transport. Display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteParticipant {
    pub id: ParticipantId,
    pub media: MediaKind,
}

/// Serializable view of a session at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct CallSnapshot {
    pub channel_id: String,
    pub state: CallState,
    pub status_text: String,
    pub mic_enabled: bool,
    pub cam_enabled: bool,
    pub remote: Option<RemoteParticipant>,
    pub error: Option<String>,
    pub attempt: u64,
    pub joined_at: Option<DateTime<Utc>>,
}
