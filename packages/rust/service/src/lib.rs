//! Generative service client and reply parsing.
//!
//! [`ServiceClient`] POSTs a [`PromptPayload`] to a chat-completions
//! endpoint and hands back the raw [`ServiceReply`]. Non-200 statuses are
//! reply data, not errors; only transport failures (refused connection,
//! timeout, unreadable body) become [`KbForgeError::Transport`].

pub mod parser;

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{self, HeaderMap, HeaderValue};
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, instrument, warn};
use url::Url;

use kbforge_shared::{KbForgeError, PromptPayload, Result, ServiceConfig};

pub use parser::parse;

/// User-Agent string for service requests.
const USER_AGENT: &str = concat!("kbforge/", env!("CARGO_PKG_VERSION"));

/// Upper bound on a single backoff delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// ServiceReply
// ---------------------------------------------------------------------------

/// Raw reply from the generative service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReply {
    pub status_code: u16,
    pub raw_body: String,
}

impl ServiceReply {
    /// Whether the service answered with HTTP 200.
    pub fn is_ok(&self) -> bool {
        self.status_code == 200
    }

    /// The generated article text.
    ///
    /// Defined only when the status is 200 and the body holds at least one
    /// choice with non-empty message content.
    pub fn generated_text(&self) -> Option<String> {
        if !self.is_ok() {
            return None;
        }
        parser::parse(self).ok()
    }
}

// ---------------------------------------------------------------------------
// GenerativeService
// ---------------------------------------------------------------------------

/// Anything that can turn a prompt payload into a service reply.
#[allow(async_fn_in_trait)]
pub trait GenerativeService {
    /// Send one payload. Non-200 replies are `Ok`; transport failures are `Err`.
    async fn send(&self, payload: &PromptPayload) -> Result<ServiceReply>;
}

// ---------------------------------------------------------------------------
// ServiceClient
// ---------------------------------------------------------------------------

/// HTTP client for an OpenAI-style chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    max_retries: u32,
    retry_base_ms: u64,
}

impl ServiceClient {
    /// Build a client from config. The API key is read from the env var
    /// named by `api_key_env`; a missing key sends no auth header.
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let endpoint = config.endpoint_url()?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                KbForgeError::Transport(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key(),
            max_retries: config.max_retries,
            retry_base_ms: config.retry_base_ms.max(1),
        })
    }

    /// Override the API key.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                KbForgeError::config(format!("invalid API key header value: {e}"))
            })?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Delays between attempts: base, 2·base, 4·base, ... with jitter.
    fn retry_strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor((self.retry_base_ms / 2).max(1))
            .max_delay(MAX_RETRY_DELAY)
            .map(jitter)
            .take(self.max_retries as usize)
    }

    async fn send_once(&self, payload: &PromptPayload, headers: &HeaderMap) -> Result<ServiceReply> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(headers.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                warn!(endpoint = %self.endpoint, error = %e, "service request failed");
                KbForgeError::Transport(format!("{}: {e}", self.endpoint))
            })?;

        let status_code = response.status().as_u16();
        let raw_body = response.text().await.map_err(|e| {
            KbForgeError::Transport(format!("{}: failed to read body: {e}", self.endpoint))
        })?;

        debug!(status_code, body_len = raw_body.len(), "service replied");

        Ok(ServiceReply {
            status_code,
            raw_body,
        })
    }
}

impl GenerativeService for ServiceClient {
    #[instrument(skip_all, fields(endpoint = %self.endpoint, model = %payload.model))]
    async fn send(&self, payload: &PromptPayload) -> Result<ServiceReply> {
        let headers = self.request_headers()?;
        Retry::spawn(self.retry_strategy(), || self.send_once(payload, &headers)).await
    }
}
