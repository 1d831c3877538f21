//! Request authorization: method classification, nonces, signed tokens.
//!
//! Every non-public call carries an authorization token:
//!
//! ```text
//! base64( nonce i64 LE (8) ‖ r LE (32) ‖ s LE (32) ‖ recovery id (1) )
//! ```
//!
//! where `(r, s)` is a P-256 ECDSA signature over
//! `SHA-256(nonce i64 LE ‖ method ‖ compact JSON of params)`.
//!
//! - [`client::Authorized`] decorates any transport with this scheme.
//! - [`session`] recovers a signing key through the out-of-band bot handshake.

pub mod client;
pub mod session;

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ecdsa::RecoveryId;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{AuthError, SdkError};

pub use client::Authorized;

/// Method used to fetch a server nonce. Must itself be [`MethodKind::Private`].
pub const GET_NONCE_METHOD: &str = "getNonce";

/// Added to the wall clock for timestamp nonces.
pub const NONCE_SKEW_MS: i64 = 1000;

/// Encoded length of an [`AuthorizationToken`].
pub const TOKEN_LEN: usize = 73;

// ============================================================================
// Method classification
// ============================================================================

/// How a method is authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Sent as-is.
    Public,
    /// Signed with a timestamp nonce.
    Private,
    /// Signed with a nonce fetched from `getNonce`.
    PrivateNonce,
}

impl MethodKind {
    pub fn is_public(&self) -> bool {
        matches!(self, MethodKind::Public)
    }
}

/// Maps a method name to its [`MethodKind`].
pub type MethodClassifier = Arc<dyn Fn(&str) -> MethodKind + Send + Sync>;

// ============================================================================
// Nonce + canonical hash
// ============================================================================

/// Timestamp nonce: milliseconds since the epoch plus [`NONCE_SKEW_MS`].
///
/// Two calls within the same millisecond get the same nonce.
pub fn timestamp_nonce() -> i64 {
    chrono::Utc::now().timestamp_millis() + NONCE_SKEW_MS
}

/// SHA-256 of the canonical request payload.
pub fn hash_request(nonce: i64, method: &str, params: &[Value]) -> Result<[u8; 32], SdkError> {
    let params_json = serde_json::to_vec(params)?;

    let mut hasher = Sha256::new();
    hasher.update(nonce.to_le_bytes());
    hasher.update(method.as_bytes());
    hasher.update(&params_json);
    Ok(hasher.finalize().into())
}

// ============================================================================
// Authorization token
// ============================================================================

/// Decoded authorization token. `r` and `s` are stored little-endian, as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationToken {
    pub nonce: i64,
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub recovery_id: u8,
}

impl AuthorizationToken {
    /// Sign `(nonce, method, params)` with `key`.
    pub fn sign(
        key: &SigningKey,
        nonce: i64,
        method: &str,
        params: &[Value],
    ) -> Result<Self, SdkError> {
        let digest = hash_request(nonce, method, params)?;
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| AuthError::Signing(e.to_string()))?;

        let (r_be, s_be) = signature.split_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&r_be);
        s.copy_from_slice(&s_be);
        r.reverse();
        s.reverse();

        Ok(Self {
            nonce,
            r,
            s,
            recovery_id: recovery_id.to_byte(),
        })
    }

    pub fn to_bytes(&self) -> [u8; TOKEN_LEN] {
        let mut out = [0u8; TOKEN_LEN];
        out[..8].copy_from_slice(&self.nonce.to_le_bytes());
        out[8..40].copy_from_slice(&self.r);
        out[40..72].copy_from_slice(&self.s);
        out[72] = self.recovery_id;
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AuthError> {
        if bytes.len() != TOKEN_LEN {
            return Err(AuthError::InvalidToken(format!(
                "expected {} bytes, got {}",
                TOKEN_LEN,
                bytes.len()
            )));
        }

        let mut nonce = [0u8; 8];
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        nonce.copy_from_slice(&bytes[..8]);
        r.copy_from_slice(&bytes[8..40]);
        s.copy_from_slice(&bytes[40..72]);

        Ok(Self {
            nonce: i64::from_le_bytes(nonce),
            r,
            s,
            recovery_id: bytes[72],
        })
    }

    /// Standard base64 (padded) of [`Self::to_bytes`].
    pub fn encode(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn decode(token: &str) -> Result<Self, AuthError> {
        let bytes = STANDARD
            .decode(token)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Rebuild the ECDSA signature and recovery id.
    pub fn signature(&self) -> Result<(Signature, RecoveryId), AuthError> {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes[..32].reverse();
        bytes[32..].reverse();

        let signature =
            Signature::from_slice(&bytes).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let recovery_id = RecoveryId::from_byte(self.recovery_id).ok_or_else(|| {
            AuthError::InvalidToken(format!("recovery id {} out of range", self.recovery_id))
        })?;
        Ok((signature, recovery_id))
    }

    /// Recover the signer's public key for `(method, params)`.
    pub fn recover(&self, method: &str, params: &[Value]) -> Result<VerifyingKey, SdkError> {
        let digest = hash_request(self.nonce, method, params)?;
        let (signature, recovery_id) = self.signature()?;
        VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
            .map_err(|e| AuthError::InvalidToken(e.to_string()).into())
    }
}
