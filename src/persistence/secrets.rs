//! Field-level secret encryption.
//!
//! Connection passwords and LLM API keys are encrypted at rest with a single
//! symmetric key from configuration (`SCHEMA_ENCRYPTION_KEY`), not by a
//! per-row or per-user key. Ciphertext is stored as a self-contained
//! base64 blob (random 12-byte nonce prefix + AES-256-GCM output) so no
//! separate nonce column is needed.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::Engine as _;

use crate::error::{EngineError, Result};

/// Encrypts and decrypts secret fields with a single process-wide key.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypts `plaintext`, returning a base64 string of `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| EngineError::internal("failed to encrypt secret"))?;

        let mut blob = Vec::with_capacity(nonce.len() + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    /// Decrypts a blob produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| EngineError::internal(format!("malformed secret blob: {e}")))?;

        if blob.len() < 12 {
            return Err(EngineError::internal("secret blob too short"));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| EngineError::internal("failed to decrypt secret"))?;

        String::from_utf8(plaintext)
            .map_err(|_| EngineError::internal("decrypted secret was not valid UTF-8"))
    }
}

/// Masks a secret for display, showing only the last 4 characters.
pub fn mask_secret(secret: &str) -> String {
    if secret.len() <= 4 {
        "*".repeat(secret.len())
    } else {
        format!("{}...{}", "*".repeat(4), &secret[secret.len() - 4..])
    }
}
