//! Integration tests against a running Blink endpoint.
//!
//! All tests are `#[ignore]` because they require network access and a
//! deployment. Endpoints come from the environment (a `.env` file works):
//!
//! - `BLINK_WS_URL`: WebSocket RPC endpoint
//! - `BLINK_HTTP_URL`: HTTP RPC endpoint
//! - `BLINK_PRIVATE_KEY`: optional hex session key for private calls
//!
//! Run with:
//! ```bash
//! cargo test --test live_integration -- --ignored
//! ```

use std::time::Duration;

use futures_util::StreamExt;
use p256::ecdsa::SigningKey;
use serde_json::{json, Value};
use tokio::time::timeout;

use blink_sdk::client::BlinkClientBuilder;

const TEST_TIMEOUT: Duration = Duration::from_secs(15);

fn env(name: &str) -> String {
    let _ = dotenvy::dotenv();
    std::env::var(name).unwrap_or_else(|_| panic!("{name} must be set"))
}

fn signing_key() -> Option<SigningKey> {
    let _ = dotenvy::dotenv();
    let hex_key = std::env::var("BLINK_PRIVATE_KEY").ok()?;
    let bytes = hex::decode(hex_key.trim()).expect("BLINK_PRIVATE_KEY must be hex");
    Some(SigningKey::from_slice(&bytes).expect("BLINK_PRIVATE_KEY must be a P-256 scalar"))
}

#[tokio::test]
#[ignore]
async fn test_live_leaderboard_over_http() {
    let client = BlinkClientBuilder::new()
        .request_timeout(TEST_TIMEOUT)
        .http(&env("BLINK_HTTP_URL"))
        .unwrap();

    let board = client
        .send("getUsersLeaderboard", vec![json!(10)])
        .await
        .unwrap();
    assert!(board.is_array() || board.is_object(), "unexpected result: {board}");
}

#[tokio::test]
#[ignore]
async fn test_live_leaderboard_over_ws() {
    let client = BlinkClientBuilder::new()
        .request_timeout(TEST_TIMEOUT)
        .websocket(&env("BLINK_WS_URL"))
        .await
        .unwrap();

    let board = client
        .send("getUsersLeaderboard", vec![json!(10)])
        .await
        .unwrap();
    assert!(!board.is_null());
}

#[tokio::test]
#[ignore]
async fn test_live_private_calls() {
    let Some(key) = signing_key() else {
        eprintln!("BLINK_PRIVATE_KEY not set, skipping");
        return;
    };
    let client = BlinkClientBuilder::new()
        .keypair(key)
        .request_timeout(TEST_TIMEOUT)
        .websocket(&env("BLINK_WS_URL"))
        .await
        .unwrap();

    let nonce = client.get_nonce().await.unwrap();
    assert!(nonce > 0);

    let settings: Value = client.send_typed("getSettings", vec![]).await.unwrap();
    assert!(settings.is_object(), "unexpected settings: {settings}");

    let mut statuses = client
        .subscribe::<Value>(
            "subscribeTransactionsStatuses",
            "unsubscribeTransactionsStatuses",
            vec![],
        )
        .await
        .unwrap();

    // No traffic is guaranteed; just make sure the stream stays healthy.
    if let Ok(Some(event)) = timeout(Duration::from_secs(3), statuses.next()).await {
        event.unwrap();
    }
    statuses.unsubscribe().await.unwrap();
}
