use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::backend::{CallBackend, Candidate};
use crate::call::session::{CallSession, LeaveReason, SessionOptions};
use crate::call::state::CallSnapshot;
use crate::call::transport::RealtimeProvider;

/// One mounted interview: the candidate being called and its call session.
pub struct InterviewView {
    pub view_id: Uuid,
    pub candidate: Candidate,
    pub session: CallSession,
    pub mounted_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct InterviewSummary {
    pub view_id: Uuid,
    pub candidate: Candidate,
    pub mounted_at: DateTime<Utc>,
    pub call: CallSnapshot,
}

impl InterviewView {
    pub async fn summary(&self) -> InterviewSummary {
        InterviewSummary {
            view_id: self.view_id,
            candidate: self.candidate.clone(),
            mounted_at: self.mounted_at,
            call: self.session.snapshot().await,
        }
    }
}

/// Mounted views keyed by bot id. The bot id doubles as the channel id, so
/// there is at most one session per channel.
#[derive(Clone)]
pub struct InterviewRegistry {
    views: Arc<Mutex<HashMap<String, Arc<InterviewView>>>>,
    backend: Arc<dyn CallBackend>,
    provider: Arc<dyn RealtimeProvider>,
    options: SessionOptions,
}

impl InterviewRegistry {
    pub fn new(
        backend: Arc<dyn CallBackend>,
        provider: Arc<dyn RealtimeProvider>,
        options: SessionOptions,
    ) -> Self {
        Self {
            views: Arc::new(Mutex::new(HashMap::new())),
            backend,
            provider,
            options,
        }
    }

    pub async fn get(&self, bot_id: &str) -> Option<Arc<InterviewView>> {
        self.views.lock().await.get(bot_id).cloned()
    }

    /// Mounts a view for `bot_id`, or returns the one already mounted.
    pub async fn mount(&self, bot_id: &str, candidate: Candidate) -> Arc<InterviewView> {
        let mut views = self.views.lock().await;
        let view = views.entry(bot_id.to_string()).or_insert_with(|| {
            let session = CallSession::new(
                bot_id,
                self.options.clone(),
                Arc::clone(&self.backend),
                self.provider.create_client(),
                self.provider.devices(),
            );
            info!("Mounted interview view for bot {bot_id} ({})", candidate.name);
            Arc::new(InterviewView {
                view_id: Uuid::new_v4(),
                candidate,
                session,
                mounted_at: Utc::now(),
            })
        });
        Arc::clone(view)
    }

    /// Removes the view and tears its call down. `None` if nothing was mounted.
    pub async fn unmount(&self, bot_id: &str) -> Option<CallSnapshot> {
        let view = self.views.lock().await.remove(bot_id)?;
        info!("Unmounting interview view for bot {bot_id}");
        Some(view.session.leave(LeaveReason::Unmount).await)
    }

    /// Tears down every mounted view. Used on process shutdown.
    pub async fn unload_all(&self) -> usize {
        let views: Vec<_> = self.views.lock().await.drain().map(|(_, v)| v).collect();
        for view in &views {
            view.session.leave(LeaveReason::Unload).await;
        }
        views.len()
    }

    pub async fn len(&self) -> usize {
        self.views.lock().await.len()
    }
}
