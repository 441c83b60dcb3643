//! Shared application state.

use std::sync::Arc;

use kubeward_core::{ClusterRegistry, EncryptionCodec, SecretStore};

/// Shared by every handler via `Arc`.
pub struct AppState {
    /// Cluster registration, queries, and credential lifecycle.
    pub registry: Arc<ClusterRegistry>,
    /// SSH keys and generic credentials.
    pub secrets: Arc<SecretStore>,
    /// The active-key codec; the same instance the registry encrypts with.
    pub codec: Arc<EncryptionCodec>,
    /// SHA-256 of the admin token guarding key rotation, if configured.
    pub admin_token_digest: Option<[u8; 32]>,
}

impl AppState {
    /// Build state around `registry`, sharing its codec. `secrets` must be
    /// built on the same codec so one rotation covers both.
    #[must_use]
    pub fn new(
        registry: Arc<ClusterRegistry>,
        secrets: Arc<SecretStore>,
        admin_token: Option<&str>,
    ) -> Self {
        let codec = Arc::clone(registry.codec());
        Self {
            registry,
            secrets,
            codec,
            admin_token_digest: admin_token.map(digest),
        }
    }
}

/// SHA-256 of an admin token, compared instead of the raw value.
#[must_use]
pub fn digest(token: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    Sha256::digest(token.as_bytes()).into()
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("key_fingerprint", &self.codec.fingerprint())
            .field("admin_token", &self.admin_token_digest.is_some())
            .finish_non_exhaustive()
    }
}
