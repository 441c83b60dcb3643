//! Credential recovery for stored clusters.

use std::sync::Arc;

use tracing::warn;
use zeroize::Zeroizing;

use crate::cluster::{AuthType, ClusterRecord};
use crate::codec::EncryptionCodec;

/// A decrypted credential ready for [`ClusterQueryEngine`](super::ClusterQueryEngine).
pub struct ResolvedAuth {
    pub payload: Zeroizing<String>,
    pub auth_type: AuthType,
}

impl std::fmt::Debug for ResolvedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedAuth")
            .field("auth_type", &self.auth_type)
            .finish_non_exhaustive()
    }
}

/// Decrypts a record's credential blob with the active key.
#[derive(Debug, Clone)]
pub struct ClusterAuthResolver {
    codec: Arc<EncryptionCodec>,
}

impl ClusterAuthResolver {
    #[must_use]
    pub fn new(codec: Arc<EncryptionCodec>) -> Self {
        Self { codec }
    }

    /// Decrypt the record's credential.
    ///
    /// `None` means the credential is missing or was sealed under another
    /// key; the cluster needs re-registration. Never an error.
    #[must_use]
    pub fn resolve(&self, record: &ClusterRecord) -> Option<ResolvedAuth> {
        if !record.has_credentials() {
            warn!(cluster_id = %record.id, "cluster has no stored credentials");
            return None;
        }
        match self.codec.decrypt(&record.encrypted_auth) {
            Ok(payload) => Some(ResolvedAuth {
                payload: Zeroizing::new(payload),
                auth_type: record.auth_type,
            }),
            Err(e) => {
                warn!(
                    cluster_id = %record.id,
                    key_fingerprint = %self.codec.fingerprint(),
                    error = %e,
                    "cluster credentials cannot be decrypted with the active key"
                );
                None
            }
        }
    }
}
