//! Axum route handlers for the interview control API.
//!
//! Join, leave and toggles always answer 200 with the call snapshot: a failed
//! join is a session state the client renders, not an HTTP error.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::warn;

use crate::backend::BackendError;
use crate::call::session::LeaveReason;
use crate::call::state::CallSnapshot;
use crate::errors::AppError;
use crate::interviews::registry::{InterviewSummary, InterviewView};
use crate::state::AppState;

const CANDIDATE_NOT_FOUND: &str = "Could not find the candidate you are trying to call.";

fn validate_bot_id(bot_id: &str) -> Result<(), AppError> {
    let valid = !bot_id.is_empty()
        && bot_id.len() <= 128
        && bot_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!("invalid bot id '{bot_id}'")))
    }
}

async fn mounted(state: &AppState, bot_id: &str) -> Result<Arc<InterviewView>, AppError> {
    state
        .registry
        .get(bot_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No interview mounted for bot {bot_id}")))
}

/// POST /api/v1/interviews/:bot_id
///
/// Mounts the interview view: looks the candidate up and creates its call
/// session in `lobby`. Mounting an already mounted bot returns the existing view.
pub async fn handle_mount(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<InterviewSummary>, AppError> {
    validate_bot_id(&bot_id)?;

    if let Some(view) = state.registry.get(&bot_id).await {
        return Ok(Json(view.summary().await));
    }

    let candidate = match state.candidates.fetch_candidate(&bot_id).await {
        Ok(candidate) => candidate,
        Err(BackendError::Unauthorized) => return Err(AppError::Unauthorized),
        Err(err) => {
            warn!("Failed to fetch candidate {bot_id}: {err}");
            return Err(AppError::NotFound(CANDIDATE_NOT_FOUND.to_string()));
        }
    };

    let view = state.registry.mount(&bot_id, candidate).await;
    Ok(Json(view.summary().await))
}

/// GET /api/v1/interviews/:bot_id
pub async fn handle_get(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<InterviewSummary>, AppError> {
    let view = mounted(&state, &bot_id).await?;
    Ok(Json(view.summary().await))
}

/// DELETE /api/v1/interviews/:bot_id
///
/// Unmounts the view; a live call is torn down first.
pub async fn handle_unmount(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<CallSnapshot>, AppError> {
    state
        .registry
        .unmount(&bot_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No interview mounted for bot {bot_id}")))
}

/// POST /api/v1/interviews/:bot_id/join
pub async fn handle_join(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<CallSnapshot>, AppError> {
    let view = mounted(&state, &bot_id).await?;
    Ok(Json(view.session.join().await))
}

/// POST /api/v1/interviews/:bot_id/leave
pub async fn handle_leave(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<CallSnapshot>, AppError> {
    let view = mounted(&state, &bot_id).await?;
    Ok(Json(view.session.leave(LeaveReason::User).await))
}

/// POST /api/v1/interviews/:bot_id/mic
pub async fn handle_toggle_mic(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<CallSnapshot>, AppError> {
    let view = mounted(&state, &bot_id).await?;
    Ok(Json(view.session.toggle_mic().await))
}

/// POST /api/v1/interviews/:bot_id/cam
pub async fn handle_toggle_cam(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<CallSnapshot>, AppError> {
    let view = mounted(&state, &bot_id).await?;
    Ok(Json(view.session.toggle_cam().await))
}
