use serde_derive::{Deserialize, Serialize};

use crate::error::{GateError, Result};
use crate::time_util::timestamp_secs;

use super::token_aes::TokenAesKey;

/// Body of the first client packet, `seq == SYSTEM_SEQ_HANDSHAKE`. See SPEC_FULL.md §4.G.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsHandshake {
    /// Opaque, AES-encrypted + base64-encoded token minted by the account service.
    pub token: String,
    pub server_id: i64,
    /// DER-encoded RSA public key the gateway should encrypt its reply with.
    pub client_pub: Vec<u8>,
}

/// Gateway's reply to a successful handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScHandshake {
    pub start_index: i64,
    /// Wire-encoded session [`super::aes_cbc::AesKey`] (32-byte key || 16-byte iv).
    pub key: Vec<u8>,
}

/// Decrypted, deserialized auth token contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub account_id: i64,
    pub color: String,
    pub status: i64,
    pub timeout: i64,
}

impl CsHandshake {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|_| GateError::Protocol("cs handshake encode failed"))
    }

    pub fn decode(bytes: &[u8]) -> Result<CsHandshake> {
        bincode::deserialize(bytes).map_err(|_| GateError::Protocol("cs handshake decode failed"))
    }
}

impl ScHandshake {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|_| GateError::Protocol("sc handshake encode failed"))
    }

    pub fn decode(bytes: &[u8]) -> Result<ScHandshake> {
        bincode::deserialize(bytes).map_err(|_| GateError::Protocol("sc handshake decode failed"))
    }
}

impl AuthToken {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|_| GateError::Protocol("auth token encode failed"))
    }

    pub fn decode(bytes: &[u8]) -> Result<AuthToken> {
        bincode::deserialize(bytes).map_err(|_| GateError::Protocol("auth token decode failed"))
    }

    /// `true` if the token's deadline has already passed.
    pub fn is_expired(&self) -> bool {
        timestamp_secs() > self.timeout
    }
}

/// Base64-decodes and AES-decrypts an auth token, per SPEC_FULL.md §4.G step 2.
///
/// Rejects expired tokens so callers don't have to remember to check separately.
pub fn decrypt_auth_token(token_key: &TokenAesKey, token: &str) -> Result<AuthToken> {
    if token.is_empty() {
        return Err(GateError::Protocol("auth token is empty"));
    }

    use base64::Engine;
    let blob = base64::engine::general_purpose::URL_SAFE
        .decode(token)
        .map_err(|_| GateError::Crypto("auth token base64 decode failed"))?;

    let plain = token_key.decrypt(&blob)?;
    let auth = AuthToken::decode(&plain)?;

    if auth.is_expired() {
        return Err(GateError::TokenExpired);
    }

    Ok(auth)
}
