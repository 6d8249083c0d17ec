// Token encryption for the client-held session artifact
//
// Ciphertext layout: base64(nonce[12] || aes-256-gcm(plaintext) || tag[16])

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Largest token accepted for encryption
pub const MAX_PLAINTEXT_LEN: usize = 64 * 1024;

/// Key derivation label, keeps the cipher key distinct from the session signing key
const KEY_CONTEXT: &[u8] = b"sealed-session/token-encryption\0";

/// Errors raised while setting up the codec or encrypting
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encryption secret must not be empty")]
    EmptySecret,

    #[error("Invalid cipher key: {0}")]
    InvalidKey(String),

    #[error("Plaintext too large: {len} bytes (max {max})")]
    PlaintextTooLarge { len: usize, max: usize },

    #[error("Failed to encrypt payload")]
    Encrypt,
}

/// Ciphertext could not be turned back into a token
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptionError {
    #[error("Ciphertext is not valid base64")]
    InvalidEncoding,

    #[error("Ciphertext is too short ({0} bytes)")]
    Truncated(usize),

    /// Tampered, or produced under a different secret
    #[error("Ciphertext failed authentication")]
    Authentication,

    #[error("Decrypted payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Symmetric token codec keyed by the server-held secret
#[derive(Clone)]
pub struct TokenCodec {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec from the configured encryption secret
    pub fn new(secret: &str) -> Result<Self, CodecError> {
        if secret.is_empty() {
            return Err(CodecError::EmptySecret);
        }

        let mut hasher = Sha256::new();
        hasher.update(KEY_CONTEXT);
        hasher.update(secret.as_bytes());
        let key = hasher.finalize();

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CodecError::InvalidKey(e.to_string()))?;

        Ok(Self { cipher })
    }

    /// Encrypt a token. A fresh random nonce is used for every call.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CodecError> {
        if plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(CodecError::PlaintextTooLarge {
                len: plaintext.len(),
                max: MAX_PLAINTEXT_LEN,
            });
        }

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CodecError::Encrypt)?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64_STANDARD.encode(&combined))
    }

    /// Decrypt a token produced by [`TokenCodec::encrypt`]
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptionError> {
        let combined = BASE64_STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| DecryptionError::InvalidEncoding)?;

        if combined.len() < NONCE_SIZE + TAG_SIZE {
            return Err(DecryptionError::Truncated(combined.len()));
        }

        let (nonce_bytes, payload) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, payload)
            .map_err(|_| DecryptionError::Authentication)?;

        String::from_utf8(plaintext).map_err(|_| DecryptionError::InvalidUtf8)
    }
}
