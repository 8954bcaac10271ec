use base64::Engine;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::{GateError, Result};

/// Process-wide RSA keypair material used to decrypt the handshake frame body.
///
/// Grounded on `app/gate/internal/pkg/security/crypto.go`'s `Init`, which parses a base64
/// PKCS8-encoded private key once at process start and caches it.
pub struct RsaHandshakeKey {
    private: RsaPrivateKey,
}

impl RsaHandshakeKey {
    /// Parses a base64-encoded PKCS8 private key, as loaded from `Secret.PrivateKey` config.
    pub fn from_base64_pkcs8(b64: &str) -> Result<RsaHandshakeKey> {
        let der = base64::engine::general_purpose::URL_SAFE
            .decode(b64)
            .map_err(|_| GateError::Crypto("rsa key base64 decode failed"))?;
        let private = RsaPrivateKey::from_pkcs8_der(&der)
            .map_err(|_| GateError::Crypto("rsa pkcs8 parse failed"))?;
        Ok(RsaHandshakeKey { private })
    }

    /// Decrypts the RSA-OAEP ciphertext carried by the CS handshake frame.
    pub fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>> {
        self.private
            .decrypt(Oaep::new::<Sha256>(), cipher)
            .map_err(|_| GateError::Crypto("rsa decrypt failed"))
    }
}

/// Encrypts the SC handshake reply with the client's public key, as carried in the CS handshake.
pub fn encrypt_with_client_pub(client_pub_der: &[u8], plain: &[u8]) -> Result<Vec<u8>> {
    let pub_key = rsa::pkcs8::DecodePublicKey::from_public_key_der(client_pub_der)
        .map_err(|_| GateError::Crypto("rsa public key parse failed"))?;
    let pub_key: RsaPublicKey = pub_key;
    let mut rng = rand::thread_rng();
    pub_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), plain)
        .map_err(|_| GateError::Crypto("rsa encrypt failed"))
}
