//! Network URL constants for the Blink SDK.
//!
//! RPC endpoints are deployment specific and always supplied by the caller.

/// Deep link that starts a session with the Telegram bot.
///
/// The compressed session public key is appended as the `start` parameter.
pub const SESSION_BOT_URL: &str = "https://t.me/magick_dev277_development3_bot";
