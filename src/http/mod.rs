//! JSON-RPC over HTTP: `HttpClient` with an opt-in retry policy.

pub mod client;
pub mod retry;

pub use client::{HttpClient, HttpConfig};
pub use retry::{RetryConfig, RetryPolicy};
