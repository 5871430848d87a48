//! Password-keyed frame encryption.
//!
//! Every frame on the TCP transport is encrypted independently:
//!
//! ```text
//! key   = SHA-256(password)                      (32 bytes, derived per call)
//! iv    = 16 fresh random bytes                  (never reused)
//! frame = hex(iv) ":" hex(AES-256-CBC-PKCS7(key, iv, plaintext))
//! ```
//!
//! The key is not cached: each call is self-contained given the password
//! string.  A wrong password almost always shows up as a padding failure; the
//! rare case where garbage happens to unpad correctly is caught by the UTF-8
//! check (and, for objects, by JSON parsing).

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Identifier of the cipher used for every frame.
pub const ENCRYPTION_ALGORITHM: &str = "aes-256-cbc";

/// Length of a derived key in bytes.
pub const KEY_LENGTH: usize = 32;

/// Length of the CBC initialization vector in bytes.
pub const IV_LENGTH: usize = 16;

/// Errors produced while encrypting or decrypting a frame.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The encoded frame is not `hex(iv):hex(ciphertext)`.
    #[error("invalid encrypted data format: {0}")]
    Format(String),

    /// Padding or UTF-8 validation failed; usually a wrong password.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// The plaintext is not valid JSON for the requested type.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stateless encrypt/decrypt helper.
///
/// Holds only the algorithm identifier; the key is derived from the password
/// passed to every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncryptionContext;

impl EncryptionContext {
    pub fn new() -> Self {
        Self
    }

    /// Name of the cipher, for logging.
    pub fn algorithm(&self) -> &'static str {
        ENCRYPTION_ALGORITHM
    }

    /// Derives the 256-bit key for `password`.
    pub fn derive_key(&self, password: &str) -> [u8; KEY_LENGTH] {
        Sha256::digest(password.as_bytes()).into()
    }

    /// Encrypts `plaintext` under `password` with a fresh random IV.
    pub fn encrypt(&self, plaintext: &str, password: &str) -> String {
        let key = self.derive_key(password);
        let mut iv = [0u8; IV_LENGTH];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        format!("{}:{}", hex::encode(iv), hex::encode(ciphertext))
    }

    /// Decrypts a frame produced by [`EncryptionContext::encrypt`].
    ///
    /// # Errors
    ///
    /// - [`CryptoError::Format`] if the frame does not have exactly two
    ///   `:`-separated hex parts or the IV has the wrong length.
    /// - [`CryptoError::Decryption`] on a padding failure (wrong password or
    ///   corrupted ciphertext) or non-UTF-8 plaintext.
    pub fn decrypt(&self, encoded: &str, password: &str) -> Result<String, CryptoError> {
        let parts: Vec<&str> = encoded.split(':').collect();
        if parts.len() != 2 {
            return Err(CryptoError::Format(format!(
                "expected 2 parts, got {}",
                parts.len()
            )));
        }

        let iv = hex::decode(parts[0])
            .map_err(|e| CryptoError::Format(format!("IV is not hex: {e}")))?;
        let iv: [u8; IV_LENGTH] = iv
            .try_into()
            .map_err(|v: Vec<u8>| CryptoError::Format(format!("IV must be 16 bytes, got {}", v.len())))?;
        let ciphertext = hex::decode(parts[1])
            .map_err(|e| CryptoError::Format(format!("ciphertext is not hex: {e}")))?;

        let key = self.derive_key(password);
        let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CryptoError::Decryption("bad padding".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Decryption("plaintext is not UTF-8".to_string()))
    }

    /// Serializes `value` to JSON and encrypts it.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Json`] if serialization fails.
    pub fn encrypt_object<T: Serialize>(
        &self,
        value: &T,
        password: &str,
    ) -> Result<String, CryptoError> {
        let json = serde_json::to_string(value)?;
        Ok(self.encrypt(&json, password))
    }

    /// Decrypts a frame and parses the JSON plaintext.
    ///
    /// # Errors
    ///
    /// Same as [`EncryptionContext::decrypt`], plus [`CryptoError::Json`].
    pub fn decrypt_object<T: DeserializeOwned>(
        &self,
        encoded: &str,
        password: &str,
    ) -> Result<T, CryptoError> {
        let json = self.decrypt(encoded, password)?;
        Ok(serde_json::from_str(&json)?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
