//! Recording fakes for the session's collaborators.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::backend::{BackendError, CallBackend, CallToken, Candidate, CandidateLookup};
use crate::call::events::{MediaKind, ParticipantId, TransportEvent};
use crate::call::transport::{
    DeviceError, EventStream, LocalTrack, MediaDevices, RealtimeClient, RealtimeProvider,
    TransportError,
};

/// How a faked call resolves.
#[derive(Clone, Default)]
pub enum Outcome {
    #[default]
    Succeed,
    Fail,
    /// Never resolves.
    Hang,
    /// Resolves successfully once the notify fires.
    WaitFor(Arc<Notify>),
}

impl Outcome {
    /// Returns `true` on success, `false` on failure, never returns on `Hang`.
    async fn settle(&self) -> bool {
        match self {
            Outcome::Succeed => true,
            Outcome::Fail => false,
            Outcome::Hang => std::future::pending::<bool>().await,
            Outcome::WaitFor(notify) => {
                notify.notified().await;
                true
            }
        }
    }
}

pub struct CountingTrack {
    pub kind: MediaKind,
    pub stops: AtomicUsize,
    pub closes: AtomicUsize,
    pub muted: AtomicBool,
    /// Holds `set_muted` until notified.
    pub mute_gate: Mutex<Option<Arc<Notify>>>,
    /// Set when `set_muted` touched the track after `close`.
    pub used_after_close: AtomicBool,
}

impl CountingTrack {
    pub fn new(kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            stops: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            muted: AtomicBool::new(false),
            mute_gate: Mutex::new(None),
            used_after_close: AtomicBool::new(false),
        })
    }

    /// Stopped and closed exactly once.
    pub fn released(&self) -> bool {
        self.stops.load(Ordering::SeqCst) == 1 && self.closes.load(Ordering::SeqCst) == 1
    }

    pub fn is_live(&self) -> bool {
        self.closes.load(Ordering::SeqCst) == 0
    }
}

#[async_trait]
impl LocalTrack for CountingTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn set_muted(&self, muted: bool) -> Result<(), TransportError> {
        let gate = self.mute_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if !self.is_live() {
            self.used_after_close.store(true, Ordering::SeqCst);
        }
        self.muted.store(muted, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeBackend {
    pub token: Outcome,
    pub start: Outcome,
    pub token_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(token: Outcome, start: Outcome) -> Arc<Self> {
        Arc::new(Self {
            token,
            start,
            token_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
        })
    }

    pub fn ok() -> Arc<Self> {
        Self::new(Outcome::Succeed, Outcome::Succeed)
    }

    pub fn calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst) + self.start_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CallBackend for FakeBackend {
    async fn fetch_call_token(&self, channel: &str) -> Result<CallToken, BackendError> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        if self.token.settle().await {
            Ok(CallToken {
                token: "test-token".to_string(),
                channel_name: channel.to_string(),
                participant: ParticipantId::new("1001"),
            })
        } else {
            Err(BackendError::Unauthorized)
        }
    }

    async fn start_call(&self, _channel: &str) -> Result<(), BackendError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.start.settle().await {
            Ok(())
        } else {
            Err(BackendError::Api {
                status: 503,
                message: "no agents available".to_string(),
            })
        }
    }
}

/// Every bot exists except `missing`.
#[async_trait]
impl CandidateLookup for FakeBackend {
    async fn fetch_candidate(&self, bot_id: &str) -> Result<Candidate, BackendError> {
        if bot_id == "missing" {
            return Err(BackendError::Api {
                status: 404,
                message: "Bot not found".to_string(),
            });
        }
        Ok(Candidate {
            id: bot_id.to_string(),
            name: "Grace Hopper".to_string(),
        })
    }
}

/// Realtime client fake. Records every call as a short string in `log`.
pub struct FakeClient {
    pub join: Outcome,
    pub publish: Outcome,
    pub log: Mutex<Vec<String>>,
    sender: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl FakeClient {
    pub fn new(join: Outcome, publish: Outcome) -> Arc<Self> {
        Arc::new(Self {
            join,
            publish,
            log: Mutex::new(Vec::new()),
            sender: Mutex::new(None),
        })
    }

    pub fn ok() -> Arc<Self> {
        Self::new(Outcome::Succeed, Outcome::Succeed)
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    /// Number of recorded calls whose entry starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Pushes an event into the live membership, if there is one.
    pub fn emit(&self, event: TransportEvent) -> bool {
        match self.sender.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

fn kinds(tracks: &[Arc<dyn LocalTrack>]) -> String {
    tracks
        .iter()
        .map(|t| t.kind().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl RealtimeClient for FakeClient {
    async fn join(
        &self,
        app_id: &str,
        channel: &str,
        _token: &str,
        participant: &ParticipantId,
    ) -> Result<EventStream, TransportError> {
        self.record(format!("join:{app_id}:{channel}:{participant}"));
        if !self.join.settle().await {
            return Err(TransportError::JoinRejected("invalid token".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn publish(&self, tracks: &[Arc<dyn LocalTrack>]) -> Result<(), TransportError> {
        self.record(format!("publish:{}", kinds(tracks)));
        if self.publish.settle().await {
            Ok(())
        } else {
            Err(TransportError::Other("publish refused".to_string()))
        }
    }

    async fn unpublish(&self, tracks: &[Arc<dyn LocalTrack>]) -> Result<(), TransportError> {
        self.record(format!("unpublish:{}", kinds(tracks)));
        Ok(())
    }

    async fn subscribe(
        &self,
        participant: &ParticipantId,
        media: MediaKind,
    ) -> Result<(), TransportError> {
        self.record(format!("subscribe:{participant}:{media}"));
        Ok(())
    }

    async fn leave(&self) -> Result<(), TransportError> {
        self.record("leave".to_string());
        self.sender.lock().unwrap().take();
        Ok(())
    }
}

pub struct FakeDevices {
    pub mic: Outcome,
    pub cam: Outcome,
    pub created: Mutex<Vec<Arc<CountingTrack>>>,
}

impl FakeDevices {
    pub fn new(mic: Outcome, cam: Outcome) -> Arc<Self> {
        Arc::new(Self {
            mic,
            cam,
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn ok() -> Arc<Self> {
        Self::new(Outcome::Succeed, Outcome::Succeed)
    }

    pub fn tracks(&self) -> Vec<Arc<CountingTrack>> {
        self.created.lock().unwrap().clone()
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks().iter().filter(|t| t.is_live()).count()
    }

    async fn create(
        &self,
        kind: MediaKind,
        outcome: &Outcome,
    ) -> Result<Arc<dyn LocalTrack>, DeviceError> {
        if !outcome.settle().await {
            return Err(DeviceError::PermissionDenied(kind));
        }
        let track = CountingTrack::new(kind);
        self.created.lock().unwrap().push(Arc::clone(&track));
        Ok(track as Arc<dyn LocalTrack>)
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn create_microphone_track(&self) -> Result<Arc<dyn LocalTrack>, DeviceError> {
        self.create(MediaKind::Audio, &self.mic).await
    }

    async fn create_camera_track(&self) -> Result<Arc<dyn LocalTrack>, DeviceError> {
        self.create(MediaKind::Video, &self.cam).await
    }
}

/// Hands out the same fake client and devices to every session.
pub struct FakeProvider {
    pub client: Arc<FakeClient>,
    pub devices: Arc<FakeDevices>,
}

impl FakeProvider {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            client: FakeClient::ok(),
            devices: FakeDevices::ok(),
        })
    }
}

impl RealtimeProvider for FakeProvider {
    fn create_client(&self) -> Arc<dyn RealtimeClient> {
        self.client.clone()
    }

    fn devices(&self) -> Arc<dyn MediaDevices> {
        self.devices.clone()
    }
}
