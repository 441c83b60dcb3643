//! Cryptographic primitives for Kubeward.
//!
//! AES-256-GCM authenticated encryption over raw bytes and the zeroizing
//! [`EncryptionKey`] newtype. Everything above this module works with the
//! base64-url text forms; this module only deals in bytes.
//!
//! Ciphertext layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`,
//! with a fresh `OsRng` nonce on every call.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

/// Raw key length in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the base64-url (padded) text form of a key.
pub const ENCODED_KEY_LEN: usize = 44;

/// Nonce length for AES-256-GCM (96 bits).
const NONCE_LEN: usize = 12;

/// Minimum ciphertext length: nonce + 16-byte tag.
const MIN_CIPHERTEXT_LEN: usize = NONCE_LEN + 16;

/// Bytes of the SHA-256 digest kept in a key fingerprint.
const FINGERPRINT_BYTES: usize = 8;

/// A 256-bit master key, zeroized on drop and redacted in `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh key from the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&key);
        Self(bytes)
    }

    /// Borrow the raw key bytes. Never log or persist these.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// The 44-character base64-url form used in env vars and key files.
    #[must_use]
    pub fn to_encoded(&self) -> Zeroizing<String> {
        Zeroizing::new(URL_SAFE.encode(self.0))
    }

    /// Short, stable identifier of this key for diagnostics.
    ///
    /// Hex of the first 8 bytes of `SHA-256(key)`. Reveals nothing usable
    /// about the key itself.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..FINGERPRINT_BYTES])
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Encrypt `plaintext` with AES-256-GCM under a fresh random nonce.
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

/// Decrypt bytes produced by [`encrypt`].
///
/// # Errors
///
/// - [`CryptoError::CiphertextTooShort`] if the input cannot hold a nonce and tag.
/// - [`CryptoError::DecryptionFailed`] if authentication fails.
pub fn decrypt(key: &EncryptionKey, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < MIN_CIPHERTEXT_LEN {
        return Err(CryptoError::CiphertextTooShort {
            expected: MIN_CIPHERTEXT_LEN,
            actual: sealed.len(),
        });
    }

    let (nonce, body) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(nonce), body)
        .map_err(|e| CryptoError::DecryptionFailed {
            reason: e.to_string(),
        })
}

/// Encrypt and decrypt a fixed sample under `key` to prove it is usable.
///
/// # Errors
///
/// Returns the underlying [`CryptoError`] if either direction fails, or
/// [`CryptoError::DecryptionFailed`] if the sample does not survive.
pub fn self_test(key: &EncryptionKey) -> Result<(), CryptoError> {
    const SAMPLE: &[u8] = b"kubeward-key-check";
    let sealed = encrypt(key, SAMPLE)?;
    if decrypt(key, &sealed)? == SAMPLE {
        Ok(())
    } else {
        Err(CryptoError::DecryptionFailed {
            reason: "self-test round-trip mismatch".to_owned(),
        })
    }
}
