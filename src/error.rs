//! Unified SDK error types.

use thiserror::Error;

use crate::jsonrpc::JsonRpcError;

/// Top-level SDK error.
#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl SdkError {
    /// The server-reported JSON-RPC error, if this is one.
    pub fn json_rpc(&self) -> Option<&JsonRpcError> {
        match self {
            SdkError::Transport(TransportError::JsonRpc(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<JsonRpcError> for SdkError {
    fn from(e: JsonRpcError) -> Self {
        SdkError::Transport(TransportError::JsonRpc(e))
    }
}

/// Failures of a single request/response exchange, shared by both transports.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The response body is not valid JSON.
    #[error("Malformed response body: {source} (text = {text})")]
    Syntax {
        #[source]
        source: serde_json::Error,
        text: String,
    },

    /// Valid JSON, but not a JSON-RPC 2.0 response envelope.
    #[error("Invalid JSON-RPC envelope: {0}")]
    Schema(String),

    /// The server answered with an `error` object.
    #[error("{0}")]
    JsonRpc(#[from] JsonRpcError),

    /// The envelope has neither `result` nor `error`.
    #[error("Response has neither result nor error")]
    ResultUndefined,

    #[cfg(feature = "http")]
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timeout")]
    Timeout,
}

/// WebSocket connection errors.
#[derive(Error, Debug)]
pub enum WsError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Writing a frame failed; the connection is gone.
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection closed: code={code:?} reason={reason}")]
    Closed { code: Option<u16>, reason: String },
}

/// Subscription protocol violations.
#[derive(Error, Debug)]
pub enum SubscriptionError {
    /// The subscribe call returned something other than a plain integer.
    #[error("Subscribe method `{method}` returned {ty}, expected an integer subscription id")]
    InvalidSubscriptionId { method: String, ty: &'static str },

    /// The unsubscribe call returned something other than `true`.
    #[error("Unsubscribe method `{method}` returned `{value}`, expected `true`")]
    InvalidUnsubscribeReply {
        method: String,
        value: serde_json::Value,
    },

    /// The transport has no push capability.
    #[error("`subscribe` unsupported by this transport")]
    Unsupported,
}

/// Authorization-layer errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Keypair not provided")]
    KeypairNotProvided,

    /// `getNonce` must be classified as `MethodKind::Private`.
    #[error("`getNonce` must be classified as Private")]
    InvalidGetNonceMethodKind,

    /// `getNonce` returned a non-numeric result.
    #[error("Invalid getNonce response: {0}")]
    Schema(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    /// An authorization token that does not decode to the 73-byte layout.
    #[error("Invalid authorization token: {0}")]
    InvalidToken(String),
}

/// Session bootstrap errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Session parameters are missing or malformed.
    #[error("Invalid session parameters: {0}")]
    Schema(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// AES-GCM authentication failed.
    #[error("Session key decryption failed")]
    Decryption,
}

/// Short JSON type name, used in protocol violation messages.
pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
