//! AES-128-CBC / PKCS#7 / Base64 codec for the proxy's JSON-RPC payloads.
//!
//! The key and IV are fixed for the lifetime of the process and reused across
//! every request — a protocol compatibility requirement of the upstream
//! endpoint, not a recommended cryptographic practice.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("encryption failed: {0}")]
    Encrypt(String),
}

/// Symmetric codec over the fixed key/IV pair supplied at process start.
#[derive(Clone)]
pub struct Cryptor {
    key: [u8; 16],
    iv: [u8; 16],
}

impl Cryptor {
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    /// Encrypts `plaintext` and returns the base64-encoded ciphertext.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let encryptor = Aes128CbcEnc::new(&self.key.into(), &self.iv.into());
        let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        Ok(BASE64_STANDARD.encode(ciphertext))
    }

    /// Decrypts a base64-encoded ciphertext back into its UTF-8 plaintext.
    /// Mirrors the original's behavior of collapsing every failure mode
    /// (bad base64, bad padding, invalid UTF-8) into a single decrypt error.
    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<String, CryptoError> {
        let ciphertext = BASE64_STANDARD
            .decode(ciphertext_b64)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;
        let decryptor = Aes128CbcDec::new(&self.key.into(), &self.iv.into());
        let plaintext = decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| CryptoError::Decrypt(e.to_string()))
    }
}
