//! Seams to the external realtime SDK.
//!
//! The session only sequences these calls and reacts to the events they
//! produce. Media transport, codecs and routing stay behind the traits.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::call::events::{MediaKind, ParticipantId, TransportEvent};

/// Event stream for a single channel membership. Ends when the membership does.
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel join rejected: {0}")]
    JoinRejected(String),

    #[error("not connected to a channel")]
    NotConnected,

    #[error("transport failure: {0}")]
    Other(String),
}

/// Raised by native device bindings; the loopback devices never fail.
#[allow(dead_code)]
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{} permission denied", .0.device_name())]
    PermissionDenied(MediaKind),

    #[error("no {} found", .0.device_name())]
    NotFound(MediaKind),

    #[error("{} failure: {message}", .kind.device_name())]
    Failed { kind: MediaKind, message: String },
}

/// A local media track handed out by `MediaDevices`.
///
/// `stop` ends capture and `close` releases the hardware handle. Neither may
/// fail from the caller's point of view.
#[async_trait]
pub trait LocalTrack: Send + Sync {
    fn kind(&self) -> MediaKind;

    async fn set_muted(&self, muted: bool) -> Result<(), TransportError>;

    fn stop(&self);

    fn close(&self);
}

/// Hardware acquisition.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn create_microphone_track(&self) -> Result<Arc<dyn LocalTrack>, DeviceError>;

    async fn create_camera_track(&self) -> Result<Arc<dyn LocalTrack>, DeviceError>;
}

/// One realtime client, owned by exactly one `CallSession`.
#[async_trait]
pub trait RealtimeClient: Send + Sync {
    async fn join(
        &self,
        app_id: &str,
        channel: &str,
        token: &str,
        participant: &ParticipantId,
    ) -> Result<EventStream, TransportError>;

    async fn publish(&self, tracks: &[Arc<dyn LocalTrack>]) -> Result<(), TransportError>;

    async fn unpublish(&self, tracks: &[Arc<dyn LocalTrack>]) -> Result<(), TransportError>;

    async fn subscribe(
        &self,
        participant: &ParticipantId,
        media: MediaKind,
    ) -> Result<(), TransportError>;

    async fn leave(&self) -> Result<(), TransportError>;
}

/// Builds a fresh client + device pair for each mounted interview.
pub trait RealtimeProvider: Send + Sync {
    fn create_client(&self) -> Arc<dyn RealtimeClient>;

    fn devices(&self) -> Arc<dyn MediaDevices>;
}
