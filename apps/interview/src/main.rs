mod backend;
mod call;
mod config;
mod errors;
mod interviews;
mod loopback;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::backend::BackendClient;
use crate::call::session::SessionOptions;
use crate::config::Config;
use crate::interviews::registry::InterviewRegistry;
use crate::loopback::LoopbackProvider;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting interview service v{}", env!("CARGO_PKG_VERSION"));

    if config.agora_app_id.is_none() {
        warn!("AGORA_APP_ID is not set; every join will fail with a configuration error");
    }

    let backend = Arc::new(BackendClient::new(
        config.api_url.clone(),
        config.auth_token.clone(),
        config.api_key.clone(),
    )?);
    info!("Backend client initialized ({})", config.api_url);

    let registry = InterviewRegistry::new(
        backend.clone(),
        Arc::new(LoopbackProvider),
        SessionOptions {
            app_id: config.agora_app_id.clone(),
            step_timeout: config.call_step_timeout,
            ..SessionOptions::default()
        },
    );

    let state = AppState {
        candidates: backend,
        registry: registry.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Process exit is the unload path: every live call is left before returning.
    let unloaded = registry.unload_all().await;
    info!("Shut down; tore down {unloaded} interview view(s)");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {err}");
    }
}
