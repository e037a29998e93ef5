use std::sync::Arc;

use tracing::debug;

use crate::call::events::MediaKind;
use crate::call::transport::LocalTrack;

struct Slot {
    track: Arc<dyn LocalTrack>,
    published: bool,
}

/// The microphone and camera tracks a session currently holds.
///
/// At most one track per kind. Releasing a track stops it, closes it and
/// drops the handle, so nothing can reach it afterwards.
#[derive(Default)]
pub struct LocalTrackSet {
    mic: Option<Slot>,
    cam: Option<Slot>,
}

impl LocalTrackSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: MediaKind) -> &Option<Slot> {
        match kind {
            MediaKind::Audio => &self.mic,
            MediaKind::Video => &self.cam,
        }
    }

    fn slot_mut(&mut self, kind: MediaKind) -> &mut Option<Slot> {
        match kind {
            MediaKind::Audio => &mut self.mic,
            MediaKind::Video => &mut self.cam,
        }
    }

    /// Stores `track` in the slot for its kind. An occupant is released first.
    pub fn insert(&mut self, track: Arc<dyn LocalTrack>) {
        let kind = track.kind();
        if let Some(old) = self.slot_mut(kind).take() {
            release_track(old.track);
        }
        *self.slot_mut(kind) = Some(Slot {
            track,
            published: false,
        });
    }

    pub fn get(&self, kind: MediaKind) -> Option<Arc<dyn LocalTrack>> {
        self.slot(kind).as_ref().map(|s| Arc::clone(&s.track))
    }

    pub fn contains(&self, kind: MediaKind) -> bool {
        self.slot(kind).is_some()
    }

    /// Tracks that still need publishing. Publishing is idempotent per track,
    /// so already published slots are skipped.
    pub fn unpublished(&self) -> Vec<Arc<dyn LocalTrack>> {
        [&self.mic, &self.cam]
            .into_iter()
            .flatten()
            .filter(|s| !s.published)
            .map(|s| Arc::clone(&s.track))
            .collect()
    }

    pub fn mark_published(&mut self, kind: MediaKind) {
        if let Some(slot) = self.slot_mut(kind) {
            slot.published = true;
        }
    }

    /// Removes the track of `kind` without releasing it.
    pub fn take(&mut self, kind: MediaKind) -> Option<Arc<dyn LocalTrack>> {
        self.slot_mut(kind).take().map(|s| s.track)
    }

    /// Releases every held track. Returns how many were released.
    pub fn release_all(&mut self) -> usize {
        let mut released = 0;
        for slot in [self.mic.take(), self.cam.take()].into_iter().flatten() {
            release_track(slot.track);
            released += 1;
        }
        released
    }
}

impl Drop for LocalTrackSet {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Stops, then closes, then drops a track.
pub fn release_track(track: Arc<dyn LocalTrack>) {
    let kind = track.kind();
    track.stop();
    track.close();
    debug!("Released local {kind} track");
}
