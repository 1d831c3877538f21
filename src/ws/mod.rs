//! JSON-RPC over a persistent WebSocket connection.
//!
//! The transport lives in `native.rs` (`ws-native` feature, `tokio-tungstenite`).
//! This module defines its configuration and connection state.

#[cfg(feature = "ws-native")]
pub mod native;

use std::fmt;
use std::time::Duration;

/// Configuration for the WS transport.
#[derive(Clone)]
pub struct WsConfig {
    pub url: String,
    /// Limit for opening the socket (TCP + TLS + upgrade).
    pub connect_timeout: Duration,
    /// Limit for waiting on a response. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Sent as `Authorization: Bearer <token>` on the upgrade request.
    pub bearer_token: Option<String>,
}

impl WsConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: None,
            bearer_token: None,
        }
    }
}

impl fmt::Debug for WsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConfig")
            .field("url", &self.url)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Connection state, published by the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    /// The socket never opened.
    Failed(String),
    /// The socket was open and is now gone.
    Closed { code: Option<u16>, reason: String },
}

impl ReadyState {
    pub fn is_open(&self) -> bool {
        matches!(self, ReadyState::Open)
    }
}
