use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::crypto::{RsaHandshakeKey, TokenAesKey};
use crate::error::{GateError, Result};

/// Process-wide crypto material, set once at startup from config.
///
/// Grounded on the teacher's `neutronium/src/identity.rs` `lazy_static! { static ref ... }`
/// idiom for process-wide singletons, replacing its ctor-based libsodium init (dropped along
/// with the libsodium dependency, see SPEC_FULL.md §10).
struct Secrets {
    rsa: RwLock<Option<RsaHandshakeKey>>,
    token_aes: RwLock<Option<TokenAesKey>>,
    crypto_enabled: RwLock<bool>,
}

lazy_static! {
    static ref SECRETS: Secrets = Secrets {
        rsa: RwLock::new(None),
        token_aes: RwLock::new(None),
        crypto_enabled: RwLock::new(false),
    };
}

/// Installs the process-wide handshake/token keys. Call once during startup, before accepting
/// any connections.
pub fn init(rsa: RsaHandshakeKey, token_aes: TokenAesKey, crypto_enabled: bool) {
    *SECRETS.rsa.write() = Some(rsa);
    *SECRETS.token_aes.write() = Some(token_aes);
    *SECRETS.crypto_enabled.write() = crypto_enabled;
}

/// Whether session body crypto is turned on for this deployment.
pub fn crypto_enabled() -> bool {
    *SECRETS.crypto_enabled.read()
}

/// Decrypts an RSA-OAEP ciphertext using the installed handshake key.
pub fn rsa_decrypt(cipher: &[u8]) -> Result<Vec<u8>> {
    let guard = SECRETS.rsa.read();
    let key = guard
        .as_ref()
        .ok_or(GateError::Crypto("rsa handshake key not initialized"))?;
    key.decrypt(cipher)
}

/// Decrypts an auth token blob using the installed process-wide token key.
pub fn token_decrypt(blob: &[u8]) -> Result<Vec<u8>> {
    let guard = SECRETS.token_aes.read();
    let key = guard
        .as_ref()
        .ok_or(GateError::Crypto("token aes key not initialized"))?;
    key.decrypt(blob)
}
