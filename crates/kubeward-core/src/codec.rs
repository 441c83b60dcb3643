//! Text-level credential codec with hot key rotation.
//!
//! [`EncryptionCodec`] owns the single active master key. Blobs are the
//! base64-url encoding of the AES-256-GCM output from [`crate::crypto`], so
//! they fit in any text column. The empty string is the identity value in
//! both directions and is never an encryption result.
//!
//! The active key sits behind an `RwLock`. Every call takes a read guard for
//! its whole duration, so a concurrent [`rotate_key`](EncryptionCodec::rotate_key)
//! is observed either entirely before or entirely after it.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use tracing::{info, warn};

use crate::crypto::{self, EncryptionKey};
use crate::error::CryptoError;
use crate::keyring;

/// Encrypts and decrypts credential strings under the active master key.
pub struct EncryptionCodec {
    key: RwLock<EncryptionKey>,
}

impl fmt::Debug for EncryptionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionCodec")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl EncryptionCodec {
    /// Create a codec with `key` active.
    #[must_use]
    pub fn new(key: EncryptionKey) -> Self {
        Self {
            key: RwLock::new(key),
        }
    }

    fn with_key<T>(&self, f: impl FnOnce(&EncryptionKey) -> T) -> T {
        // The guarded value is replaced atomically, so a poisoned lock still
        // holds a whole key.
        let guard = self.key.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Encrypt `plaintext` into a base64-url blob. `""` maps to `""`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encryption`] if the cipher fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let sealed = self.with_key(|key| crypto::encrypt(key, plaintext.as_bytes()))?;
        Ok(URL_SAFE.encode(sealed))
    }

    /// Decrypt a blob produced by [`encrypt`](Self::encrypt). `""` maps to `""`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] for every failure: bad
    /// encoding, truncation, a different key, tampering, or non-UTF-8 output.
    pub fn decrypt(&self, blob: &str) -> Result<String, CryptoError> {
        if blob.is_empty() {
            return Ok(String::new());
        }
        let failed = |reason: String| CryptoError::DecryptionFailed { reason };

        let sealed = URL_SAFE
            .decode(blob.trim())
            .map_err(|e| failed(format!("blob is not valid base64-url: {e}")))?;
        let plaintext = self
            .with_key(|key| crypto::decrypt(key, &sealed))
            .map_err(|e| match e {
                CryptoError::DecryptionFailed { .. } => e,
                other => failed(other.to_string()),
            })?;
        String::from_utf8(plaintext).map_err(|_| failed("plaintext is not valid UTF-8".to_owned()))
    }

    /// Swap in `new_key` after a round-trip self-test.
    ///
    /// Returns `false` and keeps the current key if the self-test fails.
    /// Existing blobs are not re-encrypted.
    pub fn rotate_key(&self, new_key: EncryptionKey) -> bool {
        if let Err(e) = crypto::self_test(&new_key) {
            warn!(error = %e, "key rotation rejected: self-test failed");
            return false;
        }

        let fingerprint = new_key.fingerprint();
        let mut guard = self.key.write().unwrap_or_else(PoisonError::into_inner);
        let previous = guard.fingerprint();
        *guard = new_key;
        drop(guard);

        info!(from = %previous, to = %fingerprint, "encryption key rotated");
        true
    }

    /// Parse a 44-character encoded key and rotate to it.
    ///
    /// Returns `false` and keeps the current key if the value is malformed.
    pub fn rotate_encoded(&self, encoded: &str) -> bool {
        match keyring::parse_key(encoded, "rotation request") {
            Ok(key) => self.rotate_key(key),
            Err(e) => {
                warn!(error = %e, "key rotation rejected");
                false
            }
        }
    }

    /// Fingerprint of the active key.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        self.with_key(EncryptionKey::fingerprint)
    }

    /// A detached codec pinned to the currently active key.
    ///
    /// Taken before a rotation so blobs sealed under the outgoing key can
    /// still be read by [`ClusterRegistry::reencrypt_all`](crate::ClusterRegistry::reencrypt_all).
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self::new(self.with_key(|key| EncryptionKey::from_bytes(*key.as_bytes())))
    }
}
