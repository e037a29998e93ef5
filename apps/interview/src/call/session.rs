//! Call Session Manager.
//!
//! Owns the UI-visible lifecycle of one interview call and mediates between
//! user intent and the realtime client:
//!
//! ```text
//! lobby ──join──▶ joining ──ok──▶ in_call ──leave──▶ leaving ──▶ lobby
//!                    │                                  ▲
//!                    └──fail──▶ error ──────leave───────┘
//! ```
//!
//! Every async continuation captures the session generation before it
//! suspends and re-checks it afterwards. `leave()` bumps the generation, so a
//! join still in flight finds itself stale and releases whatever it acquired
//! instead of publishing into a call nobody wants.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::CallBackend;
use crate::call::events::{MediaKind, TransportEvent};
use crate::call::state::{CallSnapshot, CallState, CallStatus, RemoteParticipant};
use crate::call::tracks::{release_track, LocalTrackSet};
use crate::call::transport::{EventStream, LocalTrack, MediaDevices, RealtimeClient};
use crate::call::CallError;

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Realtime application id. `None` makes every join a configuration error.
    pub app_id: Option<String>,
    /// Upper bound for each network or hardware step of a join.
    pub step_timeout: Duration,
    pub mic_enabled: bool,
    pub cam_enabled: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            app_id: None,
            step_timeout: Duration::from_secs(15),
            mic_enabled: true,
            cam_enabled: false,
        }
    }
}

/// What ended a call. All reasons share one teardown path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// The user pressed the hang-up button.
    User,
    /// The interview view was unmounted.
    Unmount,
    /// The process is shutting down.
    Unload,
}

impl fmt::Display for LeaveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaveReason::User => f.write_str("user"),
            LeaveReason::Unmount => f.write_str("unmount"),
            LeaveReason::Unload => f.write_str("unload"),
        }
    }
}

/// Outcome of a join attempt that did not reach `in_call`.
enum Abort {
    Failed(CallError),
    /// The session moved on (leave, or a newer attempt) while we were suspended.
    Stale,
}

impl From<CallError> for Abort {
    fn from(err: CallError) -> Self {
        Abort::Failed(err)
    }
}

#[derive(Default)]
struct Inner {
    state: CallState,
    status: CallStatus,
    mic_enabled: bool,
    cam_enabled: bool,
    remote: Option<RemoteParticipant>,
    error: Option<String>,
    /// Join attempts started, for display and logs.
    attempt: u64,
    /// Bumped by every join and every teardown.
    generation: u64,
    joined_at: Option<DateTime<Utc>>,
    tracks: LocalTrackSet,
    channel_joined: bool,
    listener: Option<JoinHandle<()>>,
}

impl Inner {
    fn snapshot(&self, channel_id: &str) -> CallSnapshot {
        CallSnapshot {
            channel_id: channel_id.to_string(),
            state: self.state,
            status_text: self.status.to_string(),
            mic_enabled: self.mic_enabled,
            cam_enabled: self.cam_enabled,
            remote: self.remote.clone(),
            error: self.error.clone(),
            attempt: self.attempt,
            joined_at: self.joined_at,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    fn wants(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.mic_enabled,
            MediaKind::Video => self.cam_enabled,
        }
    }

    fn set_wants(&mut self, kind: MediaKind, enabled: bool) {
        match kind {
            MediaKind::Audio => self.mic_enabled = enabled,
            MediaKind::Video => self.cam_enabled = enabled,
        }
    }

    /// Moves every live resource out, leaving the session holding nothing.
    fn take_resources(&mut self) -> Resources {
        Resources {
            tracks: std::mem::take(&mut self.tracks),
            listener: self.listener.take(),
            channel_joined: std::mem::replace(&mut self.channel_joined, false),
        }
    }

    fn reset_to_lobby(&mut self) {
        self.state = CallState::Lobby;
        self.status = CallStatus::Connecting;
        self.remote = None;
        self.error = None;
        self.joined_at = None;
    }
}

struct Resources {
    tracks: LocalTrackSet,
    listener: Option<JoinHandle<()>>,
    channel_joined: bool,
}

struct Shared {
    channel_id: String,
    app_id: Option<String>,
    step_timeout: Duration,
    backend: Arc<dyn CallBackend>,
    client: Arc<dyn RealtimeClient>,
    devices: Arc<dyn MediaDevices>,
    inner: Mutex<Inner>,
    /// Held for the whole of a join attempt so only one ever talks to the client.
    attempt_gate: Mutex<()>,
}

/// One interview call. Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct CallSession {
    shared: Arc<Shared>,
}

impl CallSession {
    pub fn new(
        channel_id: impl Into<String>,
        options: SessionOptions,
        backend: Arc<dyn CallBackend>,
        client: Arc<dyn RealtimeClient>,
        devices: Arc<dyn MediaDevices>,
    ) -> Self {
        let inner = Inner {
            mic_enabled: options.mic_enabled,
            cam_enabled: options.cam_enabled,
            ..Inner::default()
        };

        Self {
            shared: Arc::new(Shared {
                channel_id: channel_id.into(),
                app_id: options.app_id.filter(|id| !id.trim().is_empty()),
                step_timeout: options.step_timeout,
                backend,
                client,
                devices,
                inner: Mutex::new(inner),
                attempt_gate: Mutex::new(()),
            }),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.shared.channel_id
    }

    pub async fn snapshot(&self) -> CallSnapshot {
        self.shared.inner.lock().await.snapshot(&self.shared.channel_id)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Join
    // ────────────────────────────────────────────────────────────────────────

    /// Starts a call. Never fails: errors become `CallState::Error` with a
    /// user-facing message. A no-op unless the session is in `lobby` or `error`.
    pub async fn join(&self) -> CallSnapshot {
        let channel = self.channel_id();

        let (generation, app_id) = {
            let mut inner = self.shared.inner.lock().await;
            if !inner.state.can_join() {
                debug!(
                    "Join ignored for channel {channel}: session is {}",
                    inner.state
                );
                return inner.snapshot(channel);
            }

            inner.attempt += 1;
            inner.generation += 1;
            inner.remote = None;

            let Some(app_id) = self.shared.app_id.clone() else {
                warn!("Join refused for channel {channel}: realtime app id missing");
                inner.state = CallState::Error;
                inner.error = Some(CallError::NotConfigured.to_string());
                return inner.snapshot(channel);
            };

            inner.state = CallState::Joining;
            inner.status = CallStatus::Connecting;
            inner.error = None;
            info!("Joining channel {channel} (attempt {})", inner.attempt);
            (inner.generation, app_id)
        };

        let _gate = self.shared.attempt_gate.lock().await;

        match self.run_join(generation, &app_id).await {
            Ok(()) => {}
            Err(Abort::Stale) => {
                debug!("Join attempt for channel {channel} superseded; resources released");
            }
            Err(Abort::Failed(err)) => self.fail_attempt(generation, err).await,
        }

        self.snapshot().await
    }

    async fn run_join(&self, generation: u64, app_id: &str) -> Result<(), Abort> {
        let shared = &self.shared;
        let channel = shared.channel_id.as_str();

        self.ensure_current(generation).await?;

        let token = self
            .bounded(
                "fetching call credentials",
                shared.backend.fetch_call_token(channel),
                CallError::Token,
            )
            .await?;
        self.ensure_current(generation).await?;

        let joined = tokio::time::timeout(
            shared.step_timeout,
            shared
                .client
                .join(app_id, channel, &token.token, &token.participant),
        )
        .await;
        drop(token);

        let events = match joined {
            Ok(Ok(events)) => events,
            Ok(Err(err)) => return Err(CallError::Join(err).into()),
            Err(_) => {
                // The client may still complete the join after we gave up on it.
                self.leave_channel().await;
                return Err(CallError::Timeout {
                    step: "joining the channel",
                }
                .into());
            }
        };

        let (want_mic, want_cam) = {
            let mut inner = shared.inner.lock().await;
            if !inner.is_current(generation) {
                drop(inner);
                self.leave_channel().await;
                return Err(Abort::Stale);
            }
            inner.channel_joined = true;
            inner.listener = Some(self.spawn_listener(generation, events));
            (inner.mic_enabled, inner.cam_enabled)
        };

        // Dropping `pending` on any early return releases what it holds.
        let mut pending = LocalTrackSet::new();
        let mut notice = None;

        if want_mic {
            pending.insert(self.acquire(MediaKind::Audio).await?);
            self.ensure_current(generation).await?;
        }

        if want_cam {
            match self.acquire(MediaKind::Video).await {
                Ok(track) => pending.insert(track),
                Err(err) => {
                    warn!("Camera unavailable for channel {channel}, continuing without video: {err}");
                    shared.inner.lock().await.cam_enabled = false;
                    notice = Some(CallStatus::Notice(format!(
                        "Camera unavailable ({err}). Continuing with audio only."
                    )));
                }
            }
            self.ensure_current(generation).await?;
        }

        let to_publish = pending.unpublished();
        if !to_publish.is_empty() {
            self.bounded(
                "publishing local media",
                shared.client.publish(&to_publish),
                CallError::Publish,
            )
            .await?;
            for track in &to_publish {
                pending.mark_published(track.kind());
            }
        }

        {
            let mut inner = shared.inner.lock().await;
            if !inner.is_current(generation) {
                return Err(Abort::Stale);
            }
            inner.tracks = pending;
        }

        self.bounded(
            "summoning the interviewer",
            shared.backend.start_call(channel),
            CallError::Summon,
        )
        .await?;

        let mut inner = shared.inner.lock().await;
        if !inner.is_current(generation) {
            return Err(Abort::Stale);
        }
        inner.state = CallState::InCall;
        inner.joined_at = Some(Utc::now());
        if inner.status == CallStatus::Connecting {
            inner.status = notice.unwrap_or(CallStatus::Listening);
        }
        info!("In call on channel {channel} (attempt {})", inner.attempt);

        // Toggles made while joining only moved the flags.
        // A fresh mic track is unmuted, so holding one must mean the mic is wanted.
        let mic_drifted = inner.mic_enabled != inner.tracks.contains(MediaKind::Audio);
        let cam_drifted = inner.cam_enabled != inner.tracks.contains(MediaKind::Video);
        drop(inner);

        if mic_drifted {
            self.apply_intent(MediaKind::Audio, generation).await;
        }
        if cam_drifted {
            self.apply_intent(MediaKind::Video, generation).await;
        }
        Ok(())
    }

    /// Releases everything the failed attempt acquired, then enters `error`.
    async fn fail_attempt(&self, generation: u64, err: CallError) {
        let channel = self.channel_id();
        warn!("Join failed for channel {channel}: {err}");

        let resources = {
            let mut inner = self.shared.inner.lock().await;
            if !inner.is_current(generation) {
                return;
            }
            inner.take_resources()
        };

        self.release(resources).await;

        let mut inner = self.shared.inner.lock().await;
        if inner.is_current(generation) {
            inner.state = CallState::Error;
            inner.status = CallStatus::Connecting;
            inner.remote = None;
            inner.error = Some(err.to_string());
        }
    }

    async fn ensure_current(&self, generation: u64) -> Result<(), Abort> {
        if self.shared.inner.lock().await.is_current(generation) {
            Ok(())
        } else {
            Err(Abort::Stale)
        }
    }

    /// Runs one join step under the step timeout.
    async fn bounded<T, E, F>(
        &self,
        step: &'static str,
        fut: F,
        wrap: fn(E) -> CallError,
    ) -> Result<T, CallError>
    where
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.shared.step_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(wrap(err)),
            Err(_) => Err(CallError::Timeout { step }),
        }
    }

    async fn acquire(&self, kind: MediaKind) -> Result<Arc<dyn LocalTrack>, CallError> {
        let devices = &self.shared.devices;
        match kind {
            MediaKind::Audio => {
                self.bounded(
                    "opening the microphone",
                    devices.create_microphone_track(),
                    CallError::Device,
                )
                .await
            }
            MediaKind::Video => {
                self.bounded(
                    "opening the camera",
                    devices.create_camera_track(),
                    CallError::Device,
                )
                .await
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Leave
    // ────────────────────────────────────────────────────────────────────────

    /// Ends the call: stops and closes every local track, drops the event
    /// listener, leaves the channel. Idempotent, and always lands in `lobby`.
    /// Teardown errors are logged, never returned.
    pub async fn leave(&self, reason: LeaveReason) -> CallSnapshot {
        let channel = self.channel_id();

        let resources = {
            let mut inner = self.shared.inner.lock().await;
            if matches!(inner.state, CallState::Lobby | CallState::Leaving) {
                debug!(
                    "Leave ({reason}) ignored for channel {channel}: session is {}",
                    inner.state
                );
                return inner.snapshot(channel);
            }
            info!(
                "Leaving channel {channel} from {} (reason: {reason})",
                inner.state
            );
            inner.state = CallState::Leaving;
            inner.generation += 1;
            inner.take_resources()
        };

        self.release(resources).await;

        let mut inner = self.shared.inner.lock().await;
        inner.reset_to_lobby();
        info!("Left channel {channel}");
        inner.snapshot(channel)
    }

    /// The single teardown routine: tracks first, then listeners, then the channel.
    async fn release(&self, resources: Resources) {
        let Resources {
            mut tracks,
            listener,
            channel_joined,
        } = resources;

        let released = tracks.release_all();
        if let Some(listener) = listener {
            listener.abort();
        }
        if channel_joined {
            self.leave_channel().await;
        }
        debug!(
            "Teardown for channel {} released {released} track(s)",
            self.channel_id()
        );
    }

    async fn leave_channel(&self) {
        let channel = self.channel_id();
        match tokio::time::timeout(self.shared.step_timeout, self.shared.client.leave()).await {
            Ok(Ok(())) => debug!("Transport left channel {channel}"),
            Ok(Err(err)) => warn!("Error leaving channel {channel}: {err}"),
            Err(_) => warn!("Timed out leaving channel {channel}"),
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Toggles
    // ────────────────────────────────────────────────────────────────────────

    /// Flips the microphone. In a call an existing mic track is muted or
    /// unmuted in place; a call started with the mic off gets a new track.
    pub async fn toggle_mic(&self) -> CallSnapshot {
        self.toggle(MediaKind::Audio).await
    }

    /// Flips the camera. In a call the camera track is created and published,
    /// or unpublished and released.
    pub async fn toggle_cam(&self) -> CallSnapshot {
        self.toggle(MediaKind::Video).await
    }

    async fn toggle(&self, kind: MediaKind) -> CallSnapshot {
        let channel = self.channel_id();

        let generation = {
            let mut inner = self.shared.inner.lock().await;
            let enabled = !inner.wants(kind);
            inner.set_wants(kind, enabled);
            debug!(
                "{} {} for channel {channel} while {}",
                kind.device_name(),
                if enabled { "on" } else { "off" },
                inner.state
            );
            if inner.state != CallState::InCall {
                return inner.snapshot(channel);
            }
            inner.generation
        };

        self.apply_intent(kind, generation).await;
        self.snapshot().await
    }

    /// Brings the held track of `kind` in line with the user's intent flag.
    /// On failure the flag is reverted so it keeps describing the tracks.
    async fn apply_intent(&self, kind: MediaKind, generation: u64) {
        let channel = self.channel_id();

        let mut inner = self.shared.inner.lock().await;
        if !inner.is_current(generation) || inner.state != CallState::InCall {
            return;
        }
        let enabled = inner.wants(kind);

        let outcome = match (kind, inner.tracks.get(kind)) {
            (MediaKind::Audio, Some(mic)) => {
                // Muted with the lock held, so teardown cannot close the track first.
                let result = self.set_muted(mic, !enabled).await;
                drop(inner);
                result
            }
            (MediaKind::Video, Some(cam)) if !enabled => {
                inner.tracks.take(kind);
                drop(inner);
                self.drop_published(cam).await;
                Ok(())
            }
            (_, None) if enabled => {
                drop(inner);
                self.add_track(kind, generation)
                    .await
                    .map_err(|err| err.to_string())
            }
            _ => return,
        };

        if let Err(message) = outcome {
            warn!("Toggle failed for channel {channel}: {message}");
            let mut inner = self.shared.inner.lock().await;
            if inner.is_current(generation) {
                inner.set_wants(kind, !enabled);
                inner.status = CallStatus::Notice(message);
            }
        }
    }

    async fn set_muted(&self, mic: Arc<dyn LocalTrack>, muted: bool) -> Result<(), String> {
        let action = if muted { "mute" } else { "unmute" };
        match tokio::time::timeout(self.shared.step_timeout, mic.set_muted(muted)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(format!("Could not {action} microphone: {err}")),
            Err(_) => Err(format!("Timed out while trying to {action} the microphone.")),
        }
    }

    /// Acquires and publishes a track mid-call. The track is kept only if
    /// the call and the user's intent are both unchanged once it is ready.
    async fn add_track(&self, kind: MediaKind, generation: u64) -> Result<(), CallError> {
        let track = self.acquire(kind).await?;
        let published = self
            .bounded(
                "publishing local media",
                self.shared.client.publish(std::slice::from_ref(&track)),
                CallError::Publish,
            )
            .await;
        if let Err(err) = published {
            release_track(track);
            return Err(err);
        }

        let mut inner = self.shared.inner.lock().await;
        let still_in_call = inner.is_current(generation) && inner.state == CallState::InCall;
        if still_in_call && inner.wants(kind) {
            inner.tracks.insert(track);
            inner.tracks.mark_published(kind);
            return Ok(());
        }
        drop(inner);

        debug!("Discarding late {} track", kind.device_name());
        if still_in_call {
            self.drop_published(track).await;
        } else {
            release_track(track);
        }
        Ok(())
    }

    async fn drop_published(&self, track: Arc<dyn LocalTrack>) {
        if let Err(err) = self
            .shared
            .client
            .unpublish(std::slice::from_ref(&track))
            .await
        {
            warn!("Error unpublishing {} track: {err}", track.kind());
        }
        release_track(track);
    }

    // ────────────────────────────────────────────────────────────────────────
    // Remote events
    // ────────────────────────────────────────────────────────────────────────

    fn spawn_listener(&self, generation: u64, mut events: EventStream) -> JoinHandle<()> {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                CallSession { shared }.dispatch(generation, event).await;
            }
        })
    }

    /// Applies one transport event from the membership started by join
    /// attempt `generation`. Events from any other membership are dropped.
    async fn dispatch(&self, generation: u64, event: TransportEvent) {
        let channel = self.channel_id();

        if !self.accepts_events(generation).await {
            debug!(
                "Dropping stale event from {} on channel {channel}: {event:?}",
                event.participant()
            );
            return;
        }

        if let TransportEvent::Published { participant, media } = &event {
            if let Err(err) = self.shared.client.subscribe(participant, *media).await {
                warn!("Could not subscribe to {participant} ({media}) on channel {channel}: {err}");
                return;
            }
        }

        let mut inner = self.shared.inner.lock().await;
        if !inner.is_current(generation)
            || !matches!(inner.state, CallState::Joining | CallState::InCall)
        {
            return;
        }

        match event {
            TransportEvent::Published { participant, media } => {
                debug!("Subscribed to {participant} ({media}) on channel {channel}");
                inner.remote = Some(RemoteParticipant {
                    id: participant,
                    media,
                });
                if media == MediaKind::Audio {
                    inner.status = CallStatus::Speaking;
                }
            }
            TransportEvent::Unpublished {
                media: MediaKind::Audio,
                ..
            } => inner.status = CallStatus::Processing,
            TransportEvent::TrackEnded {
                media: MediaKind::Audio,
                ..
            } => inner.status = CallStatus::Listening,
            TransportEvent::Unpublished { .. } | TransportEvent::TrackEnded { .. } => {}
            TransportEvent::ParticipantLeft { participant } => {
                let is_counterparty = inner
                    .remote
                    .as_ref()
                    .map_or(true, |remote| remote.id == participant);
                if is_counterparty {
                    info!("Remote participant {participant} left channel {channel}");
                    inner.remote = None;
                    inner.status = CallStatus::RemoteLeft;
                }
            }
        }
    }

    async fn accepts_events(&self, generation: u64) -> bool {
        let inner = self.shared.inner.lock().await;
        inner.is_current(generation)
            && matches!(inner.state, CallState::Joining | CallState::InCall)
    }
}
