//! High-level client: `BlinkClient` over any transport, plus its builder.
//!
//! `BlinkClient<C>` is an [`Authorized`] transport with the service's method
//! classification and typed helpers on top. The transport is picked at build
//! time: [`BlinkClientBuilder::http`] or [`BlinkClientBuilder::websocket`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use p256::ecdsa::SigningKey;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::{Authorized, MethodClassifier, MethodKind};
use crate::error::SdkError;
use crate::jsonrpc::{subscribe_events, EventStream, JsonRpcClient};

#[cfg(feature = "http")]
use crate::http::{HttpClient, HttpConfig, RetryPolicy};
#[cfg(feature = "ws-native")]
use crate::ws::native::WebsocketClient;
#[cfg(feature = "ws-native")]
use crate::ws::WsConfig;

/// Method classification used by the Blink service.
///
/// - `getUsersLeaderboard` is public.
/// - `swap` is signed with a server nonce.
/// - Everything else (including `getNonce`) is signed with a timestamp nonce.
pub fn blink_method_kind(method: &str) -> MethodKind {
    match method {
        "getUsersLeaderboard" => MethodKind::Public,
        "swap" => MethodKind::PrivateNonce,
        _ => MethodKind::Private,
    }
}

/// The primary entry point for the SDK.
pub struct BlinkClient<C> {
    rpc: Authorized<C>,
}

impl<C> Clone for BlinkClient<C> {
    fn clone(&self) -> Self {
        Self {
            rpc: self.rpc.clone(),
        }
    }
}

impl<C> fmt::Debug for BlinkClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlinkClient").field("rpc", &self.rpc).finish()
    }
}

impl<C: JsonRpcClient + 'static> BlinkClient<C> {
    /// Wrap `transport` with [`blink_method_kind`].
    pub fn new(transport: C, keypair: Option<SigningKey>) -> Result<Self, SdkError> {
        let rpc = Authorized::new(transport, keypair, blink_method_kind)?;
        Ok(Self { rpc })
    }

    pub fn from_authorized(rpc: Authorized<C>) -> Self {
        Self { rpc }
    }

    /// The authorization layer.
    pub fn rpc(&self) -> &Authorized<C> {
        &self.rpc
    }

    /// The underlying transport.
    pub fn transport(&self) -> &C {
        self.rpc.inner()
    }

    pub async fn send(&self, method: &str, params: Vec<Value>) -> Result<Value, SdkError> {
        self.rpc.send(method, params).await
    }

    /// Send and decode the result into `T`.
    ///
    /// A result that does not match `T` is a [`SdkError::Validation`].
    pub async fn send_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, SdkError> {
        let result = self.rpc.send(method, params).await?;
        serde_json::from_value(result).map_err(|e| {
            SdkError::Validation(format!("`{method}` result does not match schema: {e}"))
        })
    }

    pub async fn get_nonce(&self) -> Result<i64, SdkError> {
        self.rpc.get_nonce().await
    }

    /// Subscribe and decode each push into `T`.
    ///
    /// Requires a streaming transport.
    pub async fn subscribe<T: DeserializeOwned>(
        &self,
        subscribe_method: &str,
        unsubscribe_method: &str,
        params: Vec<Value>,
    ) -> Result<EventStream<T>, SdkError> {
        subscribe_events(&self.rpc, subscribe_method, unsubscribe_method, params).await
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Builder
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct BlinkClientBuilder {
    keypair: Option<SigningKey>,
    method_kind: MethodClassifier,
    request_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    bearer_token: Option<String>,
    #[cfg(feature = "http")]
    retry: RetryPolicy,
}

impl Default for BlinkClientBuilder {
    fn default() -> Self {
        Self {
            keypair: None,
            method_kind: Arc::new(blink_method_kind),
            request_timeout: None,
            connect_timeout: None,
            bearer_token: None,
            #[cfg(feature = "http")]
            retry: RetryPolicy::None,
        }
    }
}

impl fmt::Debug for BlinkClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlinkClientBuilder")
            .field("has_keypair", &self.keypair.is_some())
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl BlinkClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signing key for private methods.
    pub fn keypair(mut self, keypair: SigningKey) -> Self {
        self.keypair = Some(keypair);
        self
    }

    /// Replace [`blink_method_kind`]. `getNonce` must stay Private.
    pub fn method_kind(
        mut self,
        classifier: impl Fn(&str) -> MethodKind + Send + Sync + 'static,
    ) -> Self {
        self.method_kind = Arc::new(classifier);
        self
    }

    /// Limit on waiting for a response. Unset waits indefinitely.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Limit on opening the WebSocket.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Bearer token sent on the WebSocket upgrade request.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    #[cfg(feature = "http")]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Build a client over HTTP.
    #[cfg(feature = "http")]
    pub fn http(self, url: &str) -> Result<BlinkClient<HttpClient>, SdkError> {
        let transport = HttpClient::with_config(HttpConfig {
            url: url.to_string(),
            timeout: self.request_timeout,
            retry: self.retry,
        })?;
        let rpc = Authorized::with_classifier(transport, self.keypair, self.method_kind)?;
        Ok(BlinkClient { rpc })
    }

    /// Connect a client over a WebSocket and wait for the socket to open.
    #[cfg(feature = "ws-native")]
    pub async fn websocket(self, url: &str) -> Result<BlinkClient<WebsocketClient>, SdkError> {
        // Classifier is checked before any connection is made.
        if (self.method_kind)(crate::auth::GET_NONCE_METHOD) != MethodKind::Private {
            return Err(crate::error::AuthError::InvalidGetNonceMethodKind.into());
        }

        let mut config = WsConfig::new(url);
        config.request_timeout = self.request_timeout;
        config.bearer_token = self.bearer_token;
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout = timeout;
        }

        let transport = WebsocketClient::connect(config).await?;
        let rpc = Authorized::with_classifier(transport, self.keypair, self.method_kind)?;
        Ok(BlinkClient { rpc })
    }
}
