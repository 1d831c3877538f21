//! Ephemeral JSON-RPC transport: one HTTP POST per call.
//!
//! The body is read as text whatever the HTTP status and parsed as a
//! JSON-RPC response; see [`crate::jsonrpc::envelope::parse_response`] for the
//! failure modes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::{SdkError, TransportError};
use crate::http::retry::{RetryConfig, RetryPolicy};
use crate::jsonrpc::envelope::{parse_response, Request};
use crate::jsonrpc::{JsonRpcClient, SendOptions, TransportKind};

/// Configuration for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub url: String,
    /// Whole-request timeout. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl HttpConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            timeout: None,
            retry: RetryPolicy::None,
        }
    }
}

/// JSON-RPC client over HTTP.
///
/// Clones share the connection pool and the request id counter.
#[derive(Clone)]
pub struct HttpClient {
    url: String,
    client: Client,
    next_id: Arc<AtomicU64>,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(url: &str) -> Result<Self, SdkError> {
        Self::with_config(HttpConfig::new(url))
    }

    pub fn with_config(config: HttpConfig) -> Result<Self, SdkError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(TransportError::from)?;

        Ok(Self {
            url: config.url,
            client,
            next_id: Arc::new(AtomicU64::new(0)),
            retry: config.retry,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post_with_retry(
        &self,
        request: &Request<'_>,
        options: &SendOptions,
    ) -> Result<String, TransportError> {
        let Some(config) = self.retry.config() else {
            return self.do_post(request, options).await;
        };

        let mut attempt = 0;
        loop {
            match self.do_post(request, options).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < config.max_retries && is_retryable(&e, &config) => {
                    let delay = config.delay_for_attempt(attempt);
                    attempt += 1;
                    tracing::debug!(
                        id = request.id,
                        attempt,
                        max = config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying request to {}: {}",
                        self.url,
                        e
                    );
                    futures_timer::Delay::new(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn do_post(
        &self,
        request: &Request<'_>,
        options: &SendOptions,
    ) -> Result<String, TransportError> {
        let mut req = self.client.post(&self.url).json(request);
        for (name, value) in &options.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(map_reqwest)?;
        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), "Non-success HTTP status, parsing body anyway");
        }
        Ok(text)
    }
}

#[async_trait]
impl JsonRpcClient for HttpClient {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn send_with(
        &self,
        method: &str,
        params: Vec<Value>,
        options: SendOptions,
    ) -> Result<Value, SdkError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let request = Request::new(id, method, &params);

        tracing::debug!(id, method, "JSON-RPC request");
        let text = self.post_with_retry(&request, &options).await?;
        let result = parse_response(&text);
        if let Err(e) = &result {
            tracing::debug!(id, method, "JSON-RPC request failed: {}", e);
        }
        Ok(result?)
    }
}

fn map_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Http(e)
    }
}

fn is_retryable(e: &TransportError, config: &RetryConfig) -> bool {
    match e {
        TransportError::Http(re) => re.is_connect(),
        TransportError::Timeout => config.retry_timeouts,
        _ => false,
    }
}
