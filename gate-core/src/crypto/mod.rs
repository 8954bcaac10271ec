pub mod aes_cbc;
pub mod handshake;
pub mod rsa_handshake;
pub mod token_aes;

pub use aes_cbc::AesKey;
pub use handshake::{AuthToken, CsHandshake, ScHandshake};
pub use rsa_handshake::RsaHandshakeKey;
pub use token_aes::TokenAesKey;
