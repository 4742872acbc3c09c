//! Data-at-rest encryption boundary.
//!
//! Entry content and conversation titles pass through a [`ContentCipher`]
//! before they reach the persistence layer. The production cipher is a
//! pluggable provider; [`PlaintextCipher`] is the identity default.

use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Opaque byte-level cipher applied to message content and titles.
pub trait ContentCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>>;
}

/// Identity cipher used when no encryption provider is configured.
#[derive(Debug, Default)]
pub struct PlaintextCipher;

impl ContentCipher for PlaintextCipher {
    fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

/// Shared cipher handle.
pub type CipherHandle = Arc<dyn ContentCipher>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaintext_cipher_round_trip() {
        let cipher = PlaintextCipher;
        let data = b"hello world";
        let encrypted = cipher.encrypt(data).unwrap();
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), data);
    }
}
