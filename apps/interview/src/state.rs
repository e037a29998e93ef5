use std::sync::Arc;

use crate::backend::CandidateLookup;
use crate::interviews::registry::InterviewRegistry;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Public bot lookup used when a view is mounted.
    pub candidates: Arc<dyn CandidateLookup>,
    pub registry: InterviewRegistry,
}
