//! JSON-RPC 2.0 wire envelopes.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// The `jsonrpc` member; only `"2.0"` is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Version {
    #[serde(rename = "2.0")]
    V2,
}

/// Outbound request: `{jsonrpc:"2.0", id, method, params}`.
#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    pub jsonrpc: Version,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a [Value],
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a [Value]) -> Self {
        Self {
            jsonrpc: Version::V2,
            id,
            method,
            params,
        }
    }
}

/// Response identifier. Only non-negative integers correlate with requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(serde_json::Number),
    String(String),
    Null,
}

impl Id {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Id::Number(n) => n.as_u64(),
            _ => None,
        }
    }
}

/// Server-reported error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JsonRpcError(code = {}, message = {})",
            self.code, self.message
        )
    }
}

impl std::error::Error for JsonRpcError {}

/// Response envelope: `{jsonrpc:"2.0", id, result?, error?}`.
///
/// `result: null` is a present result, distinct from a missing one.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub jsonrpc: Version,
    pub id: Id,
    #[serde(default, deserialize_with = "present")]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl Response {
    /// Collapse the envelope into the call's outcome. `error` wins over `result`.
    pub fn into_result(self) -> Result<Value, TransportError> {
        if let Some(error) = self.error {
            return Err(TransportError::JsonRpc(error));
        }
        self.result.ok_or(TransportError::ResultUndefined)
    }
}

/// Push notification: `{jsonrpc:"2.0", method, params:{subscription, result}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub jsonrpc: Version,
    pub method: String,
    pub params: NotificationParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationParams {
    pub subscription: u64,
    #[serde(default, deserialize_with = "present")]
    pub result: Option<Value>,
}

/// Anything the server may send over a persistent connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IncomingMessage {
    Response(Response),
    Notification(Notification),
}

/// Parse a raw HTTP response body into the call's outcome.
///
/// Malformed JSON, a non-conformant envelope, a server error and a missing
/// result each map to their own [`TransportError`] variant.
pub fn parse_response(text: &str) -> Result<Value, TransportError> {
    let json: Value = serde_json::from_str(text).map_err(|source| TransportError::Syntax {
        source,
        text: text.to_string(),
    })?;
    let response: Response =
        serde_json::from_value(json).map_err(|e| TransportError::Schema(e.to_string()))?;
    response.into_result()
}

/// Parse one inbound frame of a persistent connection.
pub fn parse_incoming(text: &str) -> Result<IncomingMessage, TransportError> {
    let json: Value = serde_json::from_str(text).map_err(|source| TransportError::Syntax {
        source,
        text: text.to_string(),
    })?;
    serde_json::from_value(json).map_err(|e| TransportError::Schema(e.to_string()))
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
