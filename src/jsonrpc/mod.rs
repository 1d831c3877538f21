//! Transport-agnostic JSON-RPC 2.0 core.
//!
//! [`JsonRpcClient`] is the contract every transport (and the authorization
//! wrapper) implements. Domain clients only ever talk to this trait.

pub mod correlation;
pub mod envelope;
pub mod subscription;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{SdkError, SubscriptionError};

pub use correlation::{
    CorrelationStore, Dispatch, NotificationCallback, PendingSubscribe, SubscriptionTable,
};
pub use envelope::{Id, IncomingMessage, JsonRpcError, Notification, Request, Response};
pub use subscription::{subscribe_events, subscribe_via, EventStream, Subscription};

/// How a transport moves messages. Decides how authorization is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// One HTTP request per call; no push.
    Http,
    /// A persistent connection with server push.
    Streaming,
}

/// Per-call options. Headers only apply to HTTP transports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub headers: Vec<(String, String)>,
}

impl SendOptions {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A JSON-RPC client: `send(method, params) → result`, optionally `subscribe`.
#[async_trait]
pub trait JsonRpcClient: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn is_http(&self) -> bool {
        self.kind() == TransportKind::Http
    }

    async fn send_with(
        &self,
        method: &str,
        params: Vec<Value>,
        options: SendOptions,
    ) -> Result<Value, SdkError>;

    async fn send(&self, method: &str, params: Vec<Value>) -> Result<Value, SdkError> {
        self.send_with(method, params, SendOptions::default()).await
    }

    /// The table receiving pushes, for transports that have one.
    fn subscription_table(&self) -> Option<SubscriptionTable> {
        None
    }

    /// Subscribe and register `callback` for the resulting pushes.
    ///
    /// Transports without push fail with [`SubscriptionError::Unsupported`].
    async fn subscribe(
        &self,
        _subscribe_method: &str,
        _unsubscribe_method: &str,
        _params: Vec<Value>,
        _callback: NotificationCallback,
    ) -> Result<Subscription, SdkError> {
        Err(SubscriptionError::Unsupported.into())
    }
}
