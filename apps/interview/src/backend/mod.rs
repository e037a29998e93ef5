//! Backend client: the single point of entry for calls to the product API.
//!
//! Covers the three endpoints the interview flow needs: realtime token
//! issuance, summoning the AI participant, and public candidate lookup.
//! Nothing here retries; a failed call is reported and the user decides.
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::call::events::ParticipantId;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Session expired, please sign in again")]
    Unauthorized,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Short-lived realtime credential. Consumed by one join attempt.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToken {
    pub token: String,
    pub channel_name: String,
    #[serde(rename = "uid")]
    pub participant: ParticipantId,
}

/// Public profile of the bot being interviewed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
struct ChannelRequest<'a> {
    channel_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// What a call session needs from the backend.
#[async_trait]
pub trait CallBackend: Send + Sync {
    async fn fetch_call_token(&self, channel: &str) -> Result<CallToken, BackendError>;

    /// Asks the backend to send the AI participant into `channel`.
    async fn start_call(&self, channel: &str) -> Result<(), BackendError>;
}

/// Public bot profile lookup.
#[async_trait]
pub trait CandidateLookup: Send + Sync {
    async fn fetch_candidate(&self, bot_id: &str) -> Result<Candidate, BackendError>;
}

#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    api_key: Option<String>,
}

impl BackendClient {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        api_key: Option<String>,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
            api_key,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request.header("content-type", "application/json");
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }
        request
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, BackendError> {
        let response = self
            .authorize(self.client.get(self.url(endpoint)))
            .send()
            .await?;
        decode(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        let response = self
            .authorize(self.client.post(self.url(endpoint)))
            .json(body)
            .send()
            .await?;
        decode(response).await
    }
}

#[async_trait]
impl CandidateLookup for BackendClient {
    /// GET /bots/public/:bot_id
    async fn fetch_candidate(&self, bot_id: &str) -> Result<Candidate, BackendError> {
        self.get(&format!("/bots/public/{bot_id}")).await
    }
}

#[async_trait]
impl CallBackend for BackendClient {
    /// POST /agora/token
    async fn fetch_call_token(&self, channel: &str) -> Result<CallToken, BackendError> {
        let token: CallToken = self
            .post("/agora/token", &ChannelRequest { channel_name: channel })
            .await?;
        debug!(
            "Issued call token for channel {} (participant {})",
            token.channel_name, token.participant
        );
        Ok(token)
    }

    /// POST /agora/start-call
    async fn start_call(&self, channel: &str) -> Result<(), BackendError> {
        let _: serde_json::Value = self
            .post("/agora/start-call", &ChannelRequest { channel_name: channel })
            .await?;
        Ok(())
    }
}

/// Turns a backend response into `T`, or into a `BackendError` carrying the
/// backend's `detail` message when it sent one.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let status = response.status();

    if status.as_u16() == 401 {
        return Err(BackendError::Unauthorized);
    }

    let body = response.text().await?;

    if !status.is_success() {
        warn!("Backend returned {}: {}", status, body);
        return Err(BackendError::Api {
            status: status.as_u16(),
            message: error_message(&body, status.canonical_reason()),
        });
    }

    serde_json::from_str(&body).map_err(BackendError::Parse)
}

fn error_message(body: &str, reason: Option<&str>) -> String {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|e| e.detail);

    match detail {
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => format!("API Error: {}", reason.unwrap_or("unknown")),
    }
}
