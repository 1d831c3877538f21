//! # Blink SDK
//!
//! A Rust client for the Blink JSON-RPC service: typed calls over HTTP or a
//! persistent WebSocket, server-push subscriptions, and signed requests.
//!
//! ## Architecture
//!
//! The SDK is organized in layers:
//!
//! 1. **Core**: JSON-RPC envelopes, request correlation, subscriptions
//! 2. **Transports**: `HttpClient` (one POST per call) / `WebsocketClient` (`tokio-tungstenite`)
//! 3. **Auth**: method classification, request signing, session bootstrap
//! 4. **High-Level Client**: `BlinkClient` and its builder
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use blink_sdk::prelude::*;
//!
//! let session = init_session();
//! println!("Open {}", session.url);
//! // ... the bot redirects back with `?publicKey=..&sessionKey=..&iv=..`
//! let key = decrypt_session_key_pair_from_query(&session.private_key, &query)?;
//!
//! let client = BlinkClientBuilder::new()
//!     .keypair(key)
//!     .websocket("wss://example.invalid/rpc")
//!     .await?;
//!
//! let board = client.send("getUsersLeaderboard", vec![150.into()]).await?;
//! let mut statuses = client
//!     .subscribe::<serde_json::Value>(
//!         "subscribeTransactionsStatuses",
//!         "unsubscribeTransactionsStatuses",
//!         vec![],
//!     )
//!     .await?;
//! while let Some(status) = statuses.next().await {
//!     println!("{:?}", status?);
//! }
//! ```

// ── Layer 1: Core ────────────────────────────────────────────────────────────

/// Unified SDK error types.
pub mod error;

/// Network URL constants.
pub mod network;

/// JSON-RPC 2.0 envelopes, correlation and subscriptions.
pub mod jsonrpc;

// ── Layer 2: Transports ──────────────────────────────────────────────────────

/// HTTP transport with retry policies.
#[cfg(feature = "http")]
pub mod http;

/// WebSocket transport.
pub mod ws;

// ── Layer 3: Auth ────────────────────────────────────────────────────────────

/// Request authorization and session bootstrap.
pub mod auth;

// ── Layer 4: High-Level Client ───────────────────────────────────────────────

/// `BlinkClient`: the primary entry point.
pub mod client;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    // Errors
    pub use crate::error::{
        AuthError, CryptoError, SdkError, SubscriptionError, TransportError, WsError,
    };

    // Network
    pub use crate::network::SESSION_BOT_URL;

    // JSON-RPC core
    pub use crate::jsonrpc::{
        EventStream, JsonRpcClient, JsonRpcError, NotificationCallback, SendOptions,
        Subscription, TransportKind,
    };

    // Auth
    pub use crate::auth::session::{
        decrypt_session_key_pair, decrypt_session_key_pair_from_query, init_session,
        init_session_with, SessionInit, SessionParams,
    };
    pub use crate::auth::{AuthorizationToken, Authorized, MethodKind};

    // Transports
    #[cfg(feature = "http")]
    pub use crate::http::{HttpClient, HttpConfig, RetryConfig, RetryPolicy};
    #[cfg(feature = "ws-native")]
    pub use crate::ws::native::WebsocketClient;
    pub use crate::ws::{ReadyState, WsConfig};

    // High-level client
    pub use crate::client::{blink_method_kind, BlinkClient, BlinkClientBuilder};

    // Re-exported so callers can build keys and drive streams without extra imports.
    pub use futures_util::StreamExt;
    pub use p256::ecdsa::SigningKey;
}
