//! # Payload Encryption Module
//!
//! Authenticated symmetric encryption for dead-letter payloads.
//!
//! Dead-lettered payloads contain PHI/PII, so they are never persisted in the
//! clear. The [`Encryptor`] wraps AES-256-GCM with a 96-bit random IV per
//! call and a 128-bit authentication tag, producing
//! `base64(iv ‖ tag ‖ ciphertext)`.
//!
//! Decryption failures are reported as a single generic error regardless of
//! cause (tag mismatch, wrong key, truncated input) so the error surface
//! cannot be used as a padding/format oracle. Plaintext and ciphertext are
//! never logged.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

/// Required key length for AES-256 (bytes).
pub const KEY_LEN: usize = 32;

/// IV length for AES-GCM (96 bits).
pub const IV_LEN: usize = 12;

/// Authentication tag length (128 bits).
pub const TAG_LEN: usize = 16;

// ============================================================================
// Error Types
// ============================================================================

/// Errors from encryption operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid key encoding: {message}")]
    InvalidKeyEncoding { message: String },

    #[error("Encryption failed")]
    EncryptionFailed,

    /// Deliberately carries no detail about why decryption failed.
    #[error("Decryption failed")]
    DecryptionFailed,
}

// ============================================================================
// Encryptor
// ============================================================================

/// AES-256-GCM encryptor over arbitrary byte payloads.
///
/// Constructed once from validated configuration and injected into the
/// components that need it. The key never appears in `Debug` output.
#[derive(Clone)]
pub struct Encryptor {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encryptor")
            .field("key", &"<REDACTED>")
            .finish()
    }
}

impl Encryptor {
    /// Construct from a raw 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] when the key is not exactly
    /// 32 bytes.
    pub fn from_key_bytes(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: key.len(),
            });
        }

        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: key.len(),
            })?;

        Ok(Self { cipher })
    }

    /// Construct from a base64-encoded 32-byte key, the form the key takes in
    /// configuration. The decoded key material is wiped once the cipher holds
    /// its own copy.
    pub fn from_base64_key(encoded: &str) -> Result<Self, CryptoError> {
        let key = Zeroizing::new(BASE64.decode(encoded.trim()).map_err(|e| {
            CryptoError::InvalidKeyEncoding {
                message: e.to_string(),
            }
        })?);
        Self::from_key_bytes(&key)
    }

    /// Encrypt `plaintext`, returning `base64(iv ‖ tag ‖ ciphertext)`.
    ///
    /// A fresh random IV is drawn from the OS CSPRNG on every call, so
    /// encrypting identical plaintexts twice yields different outputs.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        // aes-gcm appends the tag to the ciphertext; re-order to the fixed
        // iv ‖ tag ‖ ciphertext layout so decrypt can split at known offsets.
        let sealed = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        if sealed.len() < TAG_LEN {
            return Err(CryptoError::EncryptionFailed);
        }
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let mut out = Vec::with_capacity(IV_LEN + TAG_LEN + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(tag);
        out.extend_from_slice(ciphertext);

        Ok(BASE64.encode(out))
    }

    /// Decrypt a blob produced by [`Encryptor::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] for any malformed input,
    /// wrong key, or authentication-tag mismatch.
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, CryptoError> {
        let blob = BASE64
            .decode(encoded)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        if blob.len() < IV_LEN + TAG_LEN {
            return Err(CryptoError::DecryptionFailed);
        }

        let (iv, rest) = blob.split_at(IV_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        // Rebuild the ciphertext ‖ tag order the AEAD implementation expects.
        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        self.cipher
            .decrypt(Nonce::from_slice(iv), sealed.as_ref())
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

#[cfg(test)]
#[path = "crypto_tests.rs"]
mod tests;
