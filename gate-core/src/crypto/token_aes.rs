use aes::Aes128;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

use crate::error::{GateError, Result};

/// Fixed-size AES-128 key used to decrypt auth tokens minted by the account service.
///
/// Distinct from the per-session [`super::aes_cbc::AesKey`]: this key is process-wide and
/// configured once at startup (`Secret.aes_key`), never rotated per connection.
pub const TOKEN_KEY_SIZE: usize = 16;
const IV_SIZE: usize = 16;

type Encryptor = cbc::Encryptor<Aes128>;
type Decryptor = cbc::Decryptor<Aes128>;

#[derive(Clone)]
pub struct TokenAesKey {
    key: [u8; TOKEN_KEY_SIZE],
}

impl TokenAesKey {
    pub fn new(key: [u8; TOKEN_KEY_SIZE]) -> TokenAesKey {
        TokenAesKey { key }
    }

    pub fn from_slice(key: &[u8]) -> Result<TokenAesKey> {
        if key.len() != TOKEN_KEY_SIZE {
            return Err(GateError::Crypto("token aes key has wrong length"));
        }
        let mut buf = [0u8; TOKEN_KEY_SIZE];
        buf.copy_from_slice(key);
        Ok(TokenAesKey { key: buf })
    }

    /// Encrypts `plain`, prefixing the ciphertext with a fresh random IV.
    pub fn encrypt(&self, plain: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);
        let enc = Encryptor::new(&self.key.into(), &iv.into());
        let body = enc.encrypt_padded_vec_mut::<Pkcs7>(plain);

        let mut out = Vec::with_capacity(IV_SIZE + body.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&body);
        out
    }

    /// Decrypts a blob produced by [`Self::encrypt`] (IV-prefixed ciphertext).
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < IV_SIZE {
            return Err(GateError::Crypto("token aes blob too short"));
        }
        let (iv, body) = blob.split_at(IV_SIZE);
        let dec = Decryptor::new(&self.key.into(), iv.into());
        dec.decrypt_padded_vec_mut::<Pkcs7>(body)
            .map_err(|_| GateError::Crypto("token aes decrypt failed"))
    }
}
