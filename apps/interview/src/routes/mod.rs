pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::interviews::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/interviews/:bot_id",
            post(handlers::handle_mount)
                .get(handlers::handle_get)
                .delete(handlers::handle_unmount),
        )
        .route(
            "/api/v1/interviews/:bot_id/join",
            post(handlers::handle_join),
        )
        .route(
            "/api/v1/interviews/:bot_id/leave",
            post(handlers::handle_leave),
        )
        .route(
            "/api/v1/interviews/:bot_id/mic",
            post(handlers::handle_toggle_mic),
        )
        .route(
            "/api/v1/interviews/:bot_id/cam",
            post(handlers::handle_toggle_cam),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::call::session::SessionOptions;
    use crate::call::testing::{FakeBackend, FakeProvider};
    use crate::interviews::registry::InterviewRegistry;

    fn app(provider: Arc<FakeProvider>, app_id: Option<&str>) -> Router {
        let backend = FakeBackend::ok();
        let registry = InterviewRegistry::new(
            backend.clone(),
            provider,
            SessionOptions {
                app_id: app_id.map(str::to_string),
                ..SessionOptions::default()
            },
        );
        build_router(AppState {
            candidates: backend,
            registry,
        })
    }

    async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn test_health_reports_mounted_views() {
        let app = app(FakeProvider::ok(), Some("app-1"));
        send(&app, Method::POST, "/api/v1/interviews/bot-1").await;

        let (status, body) = send(&app, Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "interview");
        assert_eq!(body["mounted_views"], 1);
    }

    #[tokio::test]
    async fn test_mount_starts_in_lobby() {
        let app = app(FakeProvider::ok(), Some("app-1"));

        let (status, body) = send(&app, Method::POST, "/api/v1/interviews/bot-1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["candidate"]["name"], "Grace Hopper");
        assert_eq!(body["call"]["state"], "lobby");
        assert_eq!(body["call"]["mic_enabled"], true);
        assert_eq!(body["call"]["cam_enabled"], false);
    }

    #[tokio::test]
    async fn test_mount_unknown_candidate_is_not_found() {
        let app = app(FakeProvider::ok(), Some("app-1"));

        let (status, body) = send(&app, Method::POST, "/api/v1/interviews/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body["error"]["message"],
            "Could not find the candidate you are trying to call."
        );
    }

    #[tokio::test]
    async fn test_join_and_leave_over_http() {
        let provider = FakeProvider::ok();
        let app = app(provider.clone(), Some("app-1"));
        send(&app, Method::POST, "/api/v1/interviews/bot-1").await;

        let (status, body) = send(&app, Method::POST, "/api/v1/interviews/bot-1/join").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "in_call");
        assert_eq!(body["status_text"], "Listening...");

        let (_, body) = send(&app, Method::POST, "/api/v1/interviews/bot-1/leave").await;
        assert_eq!(body["state"], "lobby");
        assert_eq!(provider.client.count("leave"), 1);
        assert_eq!(provider.devices.live_tracks(), 0);
    }

    #[tokio::test]
    async fn test_join_without_app_id_reports_error_state() {
        let provider = FakeProvider::ok();
        let app = app(provider.clone(), None);
        send(&app, Method::POST, "/api/v1/interviews/bot-1").await;

        let (status, body) = send(&app, Method::POST, "/api/v1/interviews/bot-1/join").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "error");
        assert_eq!(
            body["error"],
            "Realtime app id is not configured. Please contact support."
        );
        assert!(provider.client.entries().is_empty());
    }

    #[tokio::test]
    async fn test_unmount_tears_down_and_forgets_view() {
        let provider = FakeProvider::ok();
        let app = app(provider.clone(), Some("app-1"));
        send(&app, Method::POST, "/api/v1/interviews/bot-1").await;
        send(&app, Method::POST, "/api/v1/interviews/bot-1/join").await;

        let (status, body) = send(&app, Method::DELETE, "/api/v1/interviews/bot-1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "lobby");
        assert_eq!(provider.client.count("leave"), 1);

        let (status, _) = send(&app, Method::GET, "/api/v1/interviews/bot-1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_toggles_on_unmounted_view_are_not_found() {
        let app = app(FakeProvider::ok(), Some("app-1"));

        let (status, body) = send(&app, Method::POST, "/api/v1/interviews/bot-1/mic").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_cam_toggle_in_lobby_only_records_intent() {
        let provider = FakeProvider::ok();
        let app = app(provider.clone(), Some("app-1"));
        send(&app, Method::POST, "/api/v1/interviews/bot-1").await;

        let (_, body) = send(&app, Method::POST, "/api/v1/interviews/bot-1/cam").await;
        assert_eq!(body["state"], "lobby");
        assert_eq!(body["cam_enabled"], true);
        assert!(provider.devices.tracks().is_empty());
    }
}
