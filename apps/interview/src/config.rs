use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
///
/// A missing `AGORA_APP_ID` is not a startup failure: every join then ends in
/// a configuration error without touching the network.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub agora_app_id: Option<String>,
    pub auth_token: Option<String>,
    pub api_key: Option<String>,
    pub call_step_timeout: Duration,
    pub port: u16,
    pub rust_log: String,
}

const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";
const DEFAULT_STEP_TIMEOUT_SECS: u64 = 15;

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            api_url: optional_env("API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            agora_app_id: optional_env("AGORA_APP_ID"),
            auth_token: optional_env("AUTH_TOKEN"),
            api_key: optional_env("API_KEY"),
            call_step_timeout: Duration::from_secs(
                optional_env("CALL_STEP_TIMEOUT_SECS")
                    .map(|v| v.parse::<u64>())
                    .transpose()
                    .context("CALL_STEP_TIMEOUT_SECS must be a whole number of seconds")?
                    .unwrap_or(DEFAULT_STEP_TIMEOUT_SECS),
            ),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8090".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Reads `key`, treating unset and blank values alike.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
