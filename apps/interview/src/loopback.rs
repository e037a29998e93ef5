//! In-process realtime provider.
//!
//! Joins an in-memory channel and hands out software tracks, so the service
//! runs end to end without a native RTC binding. Publishing local audio makes
//! a synthetic agent "answer" by publishing audio back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::call::events::{MediaKind, ParticipantId, TransportEvent};
use crate::call::transport::{
    DeviceError, EventStream, LocalTrack, MediaDevices, RealtimeClient, RealtimeProvider,
    TransportError,
};

pub const AGENT_PARTICIPANT: &str = "loopback-agent";

#[derive(Default)]
pub struct LoopbackProvider;

impl RealtimeProvider for LoopbackProvider {
    fn create_client(&self) -> Arc<dyn RealtimeClient> {
        Arc::new(LoopbackClient::default())
    }

    fn devices(&self) -> Arc<dyn MediaDevices> {
        Arc::new(LoopbackDevices)
    }
}

struct Membership {
    channel: String,
    participant: ParticipantId,
    events: mpsc::UnboundedSender<TransportEvent>,
    audio_published: bool,
}

#[derive(Default)]
pub struct LoopbackClient {
    membership: Mutex<Option<Membership>>,
}

#[async_trait]
impl RealtimeClient for LoopbackClient {
    async fn join(
        &self,
        app_id: &str,
        channel: &str,
        token: &str,
        participant: &ParticipantId,
    ) -> Result<EventStream, TransportError> {
        if token.is_empty() {
            return Err(TransportError::JoinRejected("empty token".to_string()));
        }

        let mut membership = self.membership.lock().await;
        if let Some(current) = membership.as_ref() {
            return Err(TransportError::JoinRejected(format!(
                "already in channel {}",
                current.channel
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *membership = Some(Membership {
            channel: channel.to_string(),
            participant: participant.clone(),
            events: tx,
            audio_published: false,
        });
        debug!("Loopback: {participant} joined {channel} (app {app_id})");
        Ok(rx)
    }

    async fn publish(&self, tracks: &[Arc<dyn LocalTrack>]) -> Result<(), TransportError> {
        let mut membership = self.membership.lock().await;
        let m = membership.as_mut().ok_or(TransportError::NotConnected)?;

        let has_audio = tracks.iter().any(|t| t.kind() == MediaKind::Audio);
        if has_audio && !m.audio_published {
            m.audio_published = true;
            let sent = m.events.send(TransportEvent::Published {
                participant: ParticipantId::new(AGENT_PARTICIPANT),
                media: MediaKind::Audio,
            });
            if sent.is_err() {
                debug!("Loopback: event stream for {} already closed", m.channel);
            }
        }
        debug!("Loopback: {} published {} track(s)", m.participant, tracks.len());
        Ok(())
    }

    async fn unpublish(&self, tracks: &[Arc<dyn LocalTrack>]) -> Result<(), TransportError> {
        let mut membership = self.membership.lock().await;
        let m = membership.as_mut().ok_or(TransportError::NotConnected)?;
        if tracks.iter().any(|t| t.kind() == MediaKind::Audio) {
            m.audio_published = false;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        participant: &ParticipantId,
        media: MediaKind,
    ) -> Result<(), TransportError> {
        let membership = self.membership.lock().await;
        if membership.is_none() {
            return Err(TransportError::NotConnected);
        }
        debug!("Loopback: subscribed to {participant} ({media})");
        Ok(())
    }

    async fn leave(&self) -> Result<(), TransportError> {
        // Dropping the sender ends the event stream.
        if let Some(m) = self.membership.lock().await.take() {
            debug!("Loopback: {} left {}", m.participant, m.channel);
        }
        Ok(())
    }
}

pub struct LoopbackDevices;

#[async_trait]
impl MediaDevices for LoopbackDevices {
    async fn create_microphone_track(&self) -> Result<Arc<dyn LocalTrack>, DeviceError> {
        Ok(Arc::new(SoftwareTrack::new(MediaKind::Audio)))
    }

    async fn create_camera_track(&self) -> Result<Arc<dyn LocalTrack>, DeviceError> {
        Ok(Arc::new(SoftwareTrack::new(MediaKind::Video)))
    }
}

/// A track with no hardware behind it.
pub struct SoftwareTrack {
    kind: MediaKind,
    muted: AtomicBool,
    closed: AtomicBool,
}

impl SoftwareTrack {
    fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            muted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl LocalTrack for SoftwareTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn set_muted(&self, muted: bool) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Other("track is closed".to_string()));
        }
        self.muted.store(muted, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        debug!("Loopback: {} track stopped", self.kind);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
