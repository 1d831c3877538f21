//! Session bootstrap: recover a signing key through the bot handshake.
//!
//! 1. [`init_session`] generates a local P-256 key pair and a bot URL carrying
//!    the compressed public key.
//! 2. The bot answers with `publicKey`, `sessionKey` and `iv` query params.
//! 3. [`decrypt_session_key_pair`] derives the AES key
//!    (`SHA-256(ECDH(local, peer).x)`) and decrypts the session signing key.

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use p256::ecdh::diffie_hellman;
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CryptoError, SdkError};
use crate::network::SESSION_BOT_URL;

/// AES-GCM nonce length.
const IV_LEN: usize = 12;

/// base64url, padding optional.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A freshly generated local key pair and the bot URL to open.
#[derive(Clone)]
pub struct SessionInit {
    /// Hex-encoded private scalar. Keep it until the bot answers.
    pub private_key: String,
    /// base64url (no padding) compressed public key, 33 bytes decoded.
    pub public_key: String,
    pub url: String,
}

impl fmt::Debug for SessionInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionInit")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .field("url", &self.url)
            .finish()
    }
}

/// Start a session against the default bot.
pub fn init_session() -> SessionInit {
    init_session_with(SESSION_BOT_URL)
}

/// Start a session against `base_url`.
pub fn init_session_with(base_url: &str) -> SessionInit {
    let secret = SecretKey::random(&mut OsRng);
    let compressed = secret.public_key().to_encoded_point(true);
    let public_key = URL_SAFE_NO_PAD.encode(compressed.as_bytes());

    SessionInit {
        private_key: hex::encode(secret.to_bytes()),
        url: format!("{base_url}?start={public_key}"),
        public_key,
    }
}

/// Parameters returned by the bot, base64url encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    pub public_key: String,
    pub session_key: String,
    pub iv: String,
}

impl SessionParams {
    /// Parse a query string, with or without the leading `?`.
    pub fn from_query(query: &str) -> Result<Self, CryptoError> {
        serde_urlencoded::from_str(query.trim_start_matches('?'))
            .map_err(|e| CryptoError::Schema(e.to_string()))
    }
}

impl FromStr for SessionParams {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_query(s)
    }
}

/// Recover the session signing key.
///
/// `private_key` is the hex scalar from [`SessionInit::private_key`].
pub fn decrypt_session_key_pair(
    private_key: &str,
    params: &SessionParams,
) -> Result<SigningKey, SdkError> {
    let peer_bytes = decode_param("publicKey", &params.public_key)?;
    let session_key = decode_param("sessionKey", &params.session_key)?;
    let iv = decode_param("iv", &params.iv)?;
    if iv.len() != IV_LEN {
        return Err(CryptoError::Schema(format!(
            "iv must be {} bytes, got {}",
            IV_LEN,
            iv.len()
        ))
        .into());
    }

    let peer = PublicKey::from_sec1_bytes(&peer_bytes)
        .map_err(|_| CryptoError::Schema("publicKey is not a P-256 point".into()))?;
    let secret = parse_private_key(private_key)?;

    let shared = diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
    let aes_key = Sha256::digest(shared.raw_secret_bytes());

    let cipher = Aes256Gcm::new_from_slice(&aes_key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), session_key.as_slice())
        .map_err(|_| CryptoError::Decryption)?;

    let key = SigningKey::from_slice(&plaintext)
        .map_err(|e| CryptoError::InvalidKey(format!("session key: {e}")))?;
    tracing::debug!("Session key decrypted");
    Ok(key)
}

/// [`decrypt_session_key_pair`] with params given as a query string.
pub fn decrypt_session_key_pair_from_query(
    private_key: &str,
    query: &str,
) -> Result<SigningKey, SdkError> {
    decrypt_session_key_pair(private_key, &SessionParams::from_query(query)?)
}

fn decode_param(name: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    URL_SAFE_LENIENT
        .decode(value)
        .map_err(|e| CryptoError::Schema(format!("{name}: {e}")))
}

fn parse_private_key(private_key: &str) -> Result<SecretKey, CryptoError> {
    let trimmed = private_key.trim();
    if trimmed.is_empty() || trimmed.len() > 64 {
        return Err(CryptoError::InvalidKey(format!(
            "expected up to 64 hex digits, got {}",
            trimmed.len()
        )));
    }

    // Short scalars may come without leading zeros.
    let padded = format!("{trimmed:0>64}");
    let bytes = hex::decode(padded).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    SecretKey::from_slice(&bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}
