//! Symmetric crypto for `VaultMesh`.
//!
//! AES-256-GCM with a fresh 96-bit nonce per message, wrapped around a
//! zeroize-on-drop key newtype. The same key type serves as the node's root
//! key (barrier) and as each vault's storage key.
//!
//! Ciphertext format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

/// Nonce length for AES-256-GCM (96 bits).
const NONCE_LEN: usize = 12;

/// Minimum ciphertext length: nonce + 16-byte tag.
const MIN_CIPHERTEXT_LEN: usize = NONCE_LEN + 16;

/// A 256-bit key that is zeroized on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a new random key using the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&key);
        Self(bytes)
    }

    /// Borrow the raw key bytes. Callers must not log or persist them
    /// outside an encrypted store.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encode the key for storage behind the barrier or in a key file.
    #[must_use]
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.0))
    }

    /// Parse a key produced by [`to_hex`](Self::to_hex).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the input is not 64 hex digits.
    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        let decoded = Zeroizing::new(hex::decode(encoded.trim()).map_err(|e| {
            CryptoError::InvalidKey {
                reason: e.to_string(),
            }
        })?);
        let bytes: [u8; 32] =
            decoded
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidKey {
                    reason: format!("expected 32 bytes, got {}", decoded.len()),
                })?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypt plaintext using AES-256-GCM with a fresh random nonce.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the AEAD operation fails.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption {
            reason: e.to_string(),
        })?;

    let mut out = Vec::with_capacity(NONCE_LEN.saturating_add(sealed.len()));
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt ciphertext produced by [`encrypt`].
///
/// # Errors
///
/// Returns [`CryptoError::CiphertextTooShort`] if the input cannot hold a
/// nonce and tag, and [`CryptoError::Decryption`] if authentication fails.
pub fn decrypt(key: &EncryptionKey, combined: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if combined.len() < MIN_CIPHERTEXT_LEN {
        return Err(CryptoError::CiphertextTooShort {
            expected: MIN_CIPHERTEXT_LEN,
            actual: combined.len(),
        });
    }

    let (nonce_bytes, sealed) = combined.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed)
        .map_err(|e| CryptoError::Decryption {
            reason: e.to_string(),
        })
}
