//! At-rest encryption envelope for persisted payloads.
//!
//! Sealed payloads are written as `ENCv1:` followed by base64 of
//! `nonce || ciphertext+tag` (AES-256-GCM, 12-byte nonce). The key is the
//! SHA-256 digest of a shared secret, so every process configured with the
//! same secret derives the same key. Payloads without the marker are passed
//! through untouched, which keeps older plaintext files readable.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Marker prefix identifying a sealed payload.
pub const ENVELOPE_PREFIX: &[u8] = b"ENCv1:";

const NONCE_LEN: usize = 12;

/// Envelope error.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("storage_secret required to read encrypted history")]
    KeyRequired,
    #[error("Encrypted payload corrupt or truncated: {0}")]
    Corrupt(String),
    #[error("Encryption failed: {0}")]
    Seal(String),
}

/// Transparent encryption applied to every payload that goes through the store.
#[derive(Clone)]
pub struct Envelope {
    cipher: Option<Aes256Gcm>,
}

impl Envelope {
    /// Envelope that leaves payloads unchanged.
    #[must_use]
    pub const fn plaintext() -> Self {
        Self { cipher: None }
    }

    /// Envelope keyed by the SHA-256 digest of `secret`.
    #[must_use]
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Some(Aes256Gcm::new(key)),
        }
    }

    /// Whether payloads are sealed on write.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Seal `plaintext` with a fresh random nonce.
    ///
    /// # Errors
    /// Returns error if the cipher rejects the input.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        let Some(cipher) = &self.cipher else {
            return Ok(plaintext.to_vec());
        };

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| EnvelopeError::Seal(e.to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        let mut out = ENVELOPE_PREFIX.to_vec();
        out.extend_from_slice(BASE64.encode(payload).as_bytes());
        Ok(out)
    }

    /// Reverse [`Envelope::seal`]; unmarked input is returned as is.
    ///
    /// # Errors
    /// Returns error if the payload is sealed and no key is configured, or if
    /// the payload fails to decode or authenticate.
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        let trimmed = data.trim_ascii();
        let Some(encoded) = trimmed.strip_prefix(ENVELOPE_PREFIX) else {
            return Ok(data.to_vec());
        };
        let cipher = self.cipher.as_ref().ok_or(EnvelopeError::KeyRequired)?;

        let payload = BASE64
            .decode(encoded)
            .map_err(|e| EnvelopeError::Corrupt(e.to_string()))?;
        if payload.len() < NONCE_LEN {
            return Err(EnvelopeError::Corrupt("payload shorter than nonce".to_string()));
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);

        // Wrong key and tampering are indistinguishable under GCM.
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| EnvelopeError::Corrupt("authentication failed".to_string()))
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::plaintext()
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}
