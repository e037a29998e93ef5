use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Kind of media carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Name of the local device that captures this kind.
    pub fn device_name(self) -> &'static str {
        match self {
            MediaKind::Audio => "microphone",
            MediaKind::Video => "camera",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// Identifier of a channel participant.
///
/// The backend hands out numeric uids while some transports use strings, so
/// both wire shapes deserialize into the same string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ParticipantId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Number(u64),
            Text(String),
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Number(n) => ParticipantId(n.to_string()),
            Wire::Text(s) => ParticipantId(s),
        })
    }
}

/// Participant notifications emitted by the realtime client for one channel
/// membership. Consumed by the session's event listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TransportEvent {
    /// A remote participant started publishing a track.
    Published {
        participant: ParticipantId,
        media: MediaKind,
    },
    /// A remote participant stopped publishing a track.
    Unpublished {
        participant: ParticipantId,
        media: MediaKind,
    },
    /// Playback of a subscribed remote track reached its end.
    TrackEnded {
        participant: ParticipantId,
        media: MediaKind,
    },
    /// A remote participant left the channel.
    ParticipantLeft { participant: ParticipantId },
}

impl TransportEvent {
    pub fn participant(&self) -> &ParticipantId {
        match self {
            TransportEvent::Published { participant, .. }
            | TransportEvent::Unpublished { participant, .. }
            | TransportEvent::TrackEnded { participant, .. }
            | TransportEvent::ParticipantLeft { participant } => participant,
        }
    }
}
