use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

use crate::error::{GateError, Result};

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;

type Encryptor = cbc::Encryptor<Aes256>;
type Decryptor = cbc::Decryptor<Aes256>;

/// AES-256-CBC key + IV pair, generated fresh per session at handshake time.
#[derive(Clone)]
pub struct AesKey {
    pub key: [u8; KEY_SIZE],
    pub iv: [u8; IV_SIZE],
}

impl AesKey {
    /// Generates a fresh random key and IV using the crate-wide CSPRNG.
    pub fn generate() -> AesKey {
        let mut key = [0u8; KEY_SIZE];
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        rand::thread_rng().fill_bytes(&mut iv);
        AesKey { key, iv }
    }

    pub fn from_parts(key: [u8; KEY_SIZE], iv: [u8; IV_SIZE]) -> AesKey {
        AesKey { key, iv }
    }

    /// Builds a key from a raw 48-byte blob as carried on the wire (32-byte key || 16-byte iv).
    pub fn from_wire_bytes(bytes: &[u8]) -> Result<AesKey> {
        if bytes.len() != KEY_SIZE + IV_SIZE {
            return Err(GateError::Crypto("aes key blob has wrong length"));
        }
        let mut key = [0u8; KEY_SIZE];
        let mut iv = [0u8; IV_SIZE];
        key.copy_from_slice(&bytes[..KEY_SIZE]);
        iv.copy_from_slice(&bytes[KEY_SIZE..]);
        Ok(AesKey { key, iv })
    }

    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(KEY_SIZE + IV_SIZE);
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.iv);
        out
    }
}

pub fn encrypt(aes: &AesKey, plain: &[u8]) -> Result<Vec<u8>> {
    let enc = Encryptor::new(&aes.key.into(), &aes.iv.into());
    Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plain))
}

pub fn decrypt(aes: &AesKey, cipher: &[u8]) -> Result<Vec<u8>> {
    let dec = Decryptor::new(&aes.key.into(), &aes.iv.into());
    dec.decrypt_padded_vec_mut::<Pkcs7>(cipher)
        .map_err(|_| GateError::Crypto("aes-cbc decrypt failed"))
}
