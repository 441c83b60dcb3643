//! Cluster registration and the resolve → query → persist pipeline.
//!
//! [`ClusterRegistry`] is the only component that writes cluster records.
//! Registration validates input before anything is encrypted or stored.
//! Queries never destroy stored state: a failed refresh leaves the
//! last-known counts in place and hands the failure back as
//! [`NodeReport::Stale`].

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use kubeward_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cluster::{AuthType, ClusterRecord, ClusterRepository, ClusterStatus};
use crate::codec::EncryptionCodec;
use crate::error::{QueryError, RegistryError};
use crate::kube::kubeconfig::{self, Kubeconfig, MIN_TOKEN_LEN};
use crate::kube::{ClusterAuthResolver, ClusterHealth, ClusterQueryEngine, NodeInfo, NodeSummary};

/// Longest accepted cluster name.
pub const MAX_NAME_LEN: usize = 128;

/// Input for [`ClusterRegistry::register`].
#[derive(Clone, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub auth_type: AuthType,
    /// Raw kubeconfig YAML or bearer token.
    pub auth_data: String,
    #[serde(default)]
    pub api_server: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("name", &self.name)
            .field("auth_type", &self.auth_type)
            .field("api_server", &self.api_server)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Partial update for [`ClusterRegistry::update`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<ClusterStatus>,
}

/// Result of [`validate_credentials`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CredentialValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<AuthType>,
}

impl CredentialValidation {
    fn invalid(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Nodes and counts from one successful query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub summary: NodeSummary,
    pub nodes: Vec<NodeInfo>,
}

/// Outcome of a node query for a stored cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeReport {
    /// The query succeeded and the stored counts were updated.
    Live(NodeSnapshot),
    /// The query failed; the stored counts are returned untouched.
    Stale {
        masters: u32,
        workers: u32,
        error: QueryError,
    },
    /// The credential is missing or sealed under another key.
    CredentialsUnavailable,
}

/// Result of [`ClusterRegistry::health`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterHealthReport {
    pub cluster_id: Uuid,
    pub name: String,
    pub status: ClusterStatus,
    pub summary: Option<NodeSummary>,
    pub health: ClusterHealth,
}

/// Operator view of a record. Never includes credential content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterDiagnostics {
    pub id: Uuid,
    pub name: String,
    pub auth_type: AuthType,
    pub api_server: Option<String>,
    pub has_credentials: bool,
    pub credentials_decryptable: bool,
    pub status: ClusterStatus,
    pub master_count: u32,
    pub worker_count: u32,
    pub key_fingerprint: String,
}

/// Result of [`ClusterRegistry::reencrypt_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub migrated: u32,
    pub already_current: u32,
    pub skipped_empty: u32,
    /// Records readable under neither key. Left untouched.
    pub failed: Vec<Uuid>,
}

/// A validated credential, ready to encrypt.
struct PreparedCredential {
    payload: Zeroizing<String>,
    api_server: Option<String>,
    default_description: String,
}

/// Pre-registration check that reports problems instead of failing.
///
/// Kubeconfigs must carry `apiVersion` and the `clusters`, `contexts` and
/// `users` sections. Tokens must be at least ten characters once trimmed.
#[must_use]
pub fn validate_credentials(auth_data: &str, auth_type: AuthType) -> CredentialValidation {
    match auth_type {
        AuthType::Kubeconfig => {
            let config = match Kubeconfig::parse(auth_data) {
                Ok(config) => config,
                Err(e) => return CredentialValidation::invalid(format!("invalid YAML format: {e}")),
            };
            if config.api_version.is_none() {
                return CredentialValidation::invalid("invalid kubeconfig: missing apiVersion");
            }
            let missing: Vec<&str> = [
                ("clusters", config.clusters.is_none()),
                ("contexts", config.contexts.is_none()),
                ("users", config.users.is_none()),
            ]
            .into_iter()
            .filter_map(|(section, absent)| absent.then_some(section))
            .collect();
            if !missing.is_empty() {
                return CredentialValidation::invalid(format!(
                    "missing required sections: {}",
                    missing.join(", ")
                ));
            }
            CredentialValidation {
                valid: true,
                error: None,
                cluster_name: config.current_context.clone(),
                api_server: config.first_server().map(str::to_owned),
                auth_type: Some(AuthType::Kubeconfig),
            }
        }
        AuthType::Token => {
            if auth_data.trim().chars().count() < MIN_TOKEN_LEN {
                return CredentialValidation::invalid("token appears to be invalid (too short)");
            }
            CredentialValidation {
                valid: true,
                auth_type: Some(AuthType::Token),
                ..CredentialValidation::default()
            }
        }
    }
}

fn validation(reason: impl Into<String>) -> RegistryError {
    RegistryError::Validation {
        reason: reason.into(),
    }
}

fn validate_name(name: &str) -> Result<String, RegistryError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(validation("cluster name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(validation(format!(
            "cluster name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_owned())
}

fn validate_api_server(url: &str) -> Result<String, RegistryError> {
    let url = url.trim();
    if kubeconfig::is_http_url(url) {
        Ok(url.to_owned())
    } else {
        Err(validation(
            "API server URL must start with http:// or https://",
        ))
    }
}

/// Validate a credential for storage. No side effects.
fn prepare_credential(
    auth_type: AuthType,
    auth_data: &str,
    api_server: Option<&str>,
) -> Result<PreparedCredential, RegistryError> {
    match auth_type {
        AuthType::Kubeconfig => {
            let summary = kubeconfig::inspect_kubeconfig(auth_data).map_err(validation)?;
            let default_description = summary.cluster_name.map_or_else(
                || "Registered Kubernetes cluster".to_owned(),
                |name| format!("Registered cluster: {name}"),
            );
            Ok(PreparedCredential {
                payload: Zeroizing::new(auth_data.to_owned()),
                api_server: Some(summary.api_server),
                default_description,
            })
        }
        AuthType::Token => {
            let token = auth_data.trim();
            if token.chars().count() < MIN_TOKEN_LEN {
                return Err(validation(format!(
                    "token must be at least {MIN_TOKEN_LEN} characters"
                )));
            }
            let api_server = api_server
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| validation("API server URL is required for token authentication"))
                .and_then(validate_api_server)?;
            Ok(PreparedCredential {
                payload: Zeroizing::new(token.to_owned()),
                default_description: format!("Token-authenticated cluster: {api_server}"),
                api_server: Some(api_server),
            })
        }
    }
}

/// Orchestrates cluster registration, queries and credential maintenance.
pub struct ClusterRegistry {
    repo: ClusterRepository,
    codec: Arc<EncryptionCodec>,
    resolver: ClusterAuthResolver,
    engine: ClusterQueryEngine,
    /// Held across every load-modify-store of a record, so a slow query
    /// never writes back over a concurrent delete or credential change.
    writes: Mutex<()>,
}

impl fmt::Debug for ClusterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterRegistry")
            .field("codec", &self.codec)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl ClusterRegistry {
    #[must_use]
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        codec: Arc<EncryptionCodec>,
        engine: ClusterQueryEngine,
    ) -> Self {
        Self {
            repo: ClusterRepository::new(backend),
            resolver: ClusterAuthResolver::new(Arc::clone(&codec)),
            codec,
            engine,
            writes: Mutex::new(()),
        }
    }

    /// The codec holding the active key.
    #[must_use]
    pub fn codec(&self) -> &Arc<EncryptionCodec> {
        &self.codec
    }

    async fn load(&self, user_id: Uuid, id: Uuid) -> Result<ClusterRecord, RegistryError> {
        self.repo
            .get(user_id, id)
            .await?
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }

    /// Register a cluster.
    ///
    /// Input is validated before anything is encrypted or stored. After the
    /// record is stored, one node query runs to fill in the counts; its
    /// failure does not fail registration.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::Validation`] for malformed input.
    /// - [`RegistryError::Conflict`] if the user already has a cluster with this name.
    /// - [`RegistryError::Crypto`] or [`RegistryError::Storage`] if storing fails.
    pub async fn register(
        &self,
        user_id: Uuid,
        request: RegisterRequest,
    ) -> Result<ClusterRecord, RegistryError> {
        let name = validate_name(&request.name)?;
        let prepared = prepare_credential(
            request.auth_type,
            &request.auth_data,
            request.api_server.as_deref(),
        )?;

        let record = {
            let _guard = self.writes.lock().await;
            if self.repo.name_taken(user_id, &name, None).await? {
                return Err(RegistryError::Conflict { name });
            }

            let now = Utc::now();
            let record = ClusterRecord {
                id: Uuid::new_v4(),
                user_id,
                name,
                auth_type: request.auth_type,
                api_server: prepared.api_server,
                encrypted_auth: self.codec.encrypt(&prepared.payload)?,
                master_count: 0,
                worker_count: 0,
                status: ClusterStatus::Registered,
                description: request
                    .description
                    .filter(|d| !d.trim().is_empty())
                    .or(Some(prepared.default_description)),
                created_at: now,
                updated_at: now,
            };
            self.repo.put(&record).await?;
            record
        };

        info!(
            cluster_id = %record.id,
            user_id = %user_id,
            name = %record.name,
            auth_type = %record.auth_type,
            "cluster registered"
        );

        // Best effort: counts stay at zero until the next refresh on failure.
        let (record, report) = self.query_and_store(record).await;
        if let NodeReport::Stale { error, .. } = &report {
            warn!(
                cluster_id = %record.id,
                error = %error,
                "initial node query failed; counts pending refresh"
            );
        }
        Ok(record)
    }

    /// Run resolve → query on `record` and persist new counts on success.
    ///
    /// The query runs without the write lock. Counts are then applied to a
    /// fresh copy of the stored record, so only `master_count`,
    /// `worker_count`, `status` and `updated_at` change. A record deleted
    /// while the query ran stays deleted. A failed write is logged and the
    /// unchanged record is returned.
    async fn query_and_store(&self, record: ClusterRecord) -> (ClusterRecord, NodeReport) {
        let Some(auth) = self.resolver.resolve(&record) else {
            return (record, NodeReport::CredentialsUnavailable);
        };

        match self
            .engine
            .list_nodes(&auth.payload, auth.auth_type, record.api_server.as_deref())
            .await
        {
            Ok(nodes) => {
                let summary = NodeSummary::from_nodes(&nodes);
                let record = self.store_counts(record, summary).await;
                (record, NodeReport::Live(NodeSnapshot { summary, nodes }))
            }
            Err(error) => {
                warn!(cluster_id = %record.id, code = error.code(), error = %error, "node query failed");
                let report = NodeReport::Stale {
                    masters: record.master_count,
                    workers: record.worker_count,
                    error,
                };
                (record, report)
            }
        }
    }

    async fn store_counts(&self, record: ClusterRecord, summary: NodeSummary) -> ClusterRecord {
        let _guard = self.writes.lock().await;
        let mut current = match self.repo.get(record.user_id, record.id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                debug!(cluster_id = %record.id, "cluster deleted during node query; counts dropped");
                return record;
            }
            Err(e) => {
                warn!(cluster_id = %record.id, error = %e, "failed to reload cluster for node counts");
                return record;
            }
        };

        current.master_count = summary.masters;
        current.worker_count = summary.workers;
        current.status = ClusterStatus::Registered;
        current.updated_at = Utc::now();
        if let Err(e) = self.repo.put(&current).await {
            warn!(cluster_id = %record.id, error = %e, "failed to store node counts");
            return record;
        }
        info!(
            cluster_id = %current.id,
            masters = summary.masters,
            workers = summary.workers,
            "cluster node counts updated"
        );
        current
    }

    /// Query the cluster's nodes, updating stored counts on success.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] or a storage error. Query failures are
    /// reported inside [`NodeReport`].
    pub async fn node_summary(&self, user_id: Uuid, id: Uuid) -> Result<NodeReport, RegistryError> {
        let record = self.load(user_id, id).await?;
        Ok(self.query_and_store(record).await.1)
    }

    /// Re-run the node query for a cluster. Same pipeline as
    /// [`node_summary`](Self::node_summary).
    ///
    /// # Errors
    ///
    /// See [`node_summary`](Self::node_summary).
    pub async fn refresh(&self, user_id: Uuid, id: Uuid) -> Result<NodeReport, RegistryError> {
        info!(cluster_id = %id, "refreshing cluster nodes");
        self.node_summary(user_id, id).await
    }

    /// Health from a fresh node snapshot. `unknown` if the query failed.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] or a storage error.
    pub async fn health(&self, user_id: Uuid, id: Uuid) -> Result<ClusterHealthReport, RegistryError> {
        let record = self.load(user_id, id).await?;
        let (record, report) = self.query_and_store(record).await;
        let (summary, health) = match report {
            NodeReport::Live(snapshot) => (Some(snapshot.summary), snapshot.summary.health()),
            NodeReport::Stale { .. } | NodeReport::CredentialsUnavailable => {
                (None, ClusterHealth::Unknown)
            }
        };
        Ok(ClusterHealthReport {
            cluster_id: record.id,
            name: record.name,
            status: record.status,
            summary,
            health,
        })
    }

    /// # Errors
    ///
    /// [`RegistryError::NotFound`] or a storage error.
    pub async fn get(&self, user_id: Uuid, id: Uuid) -> Result<ClusterRecord, RegistryError> {
        self.load(user_id, id).await
    }

    /// The user's clusters, sorted by name.
    ///
    /// # Errors
    ///
    /// A storage error.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<ClusterRecord>, RegistryError> {
        self.repo.list(user_id).await
    }

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`], [`RegistryError::Validation`],
    /// [`RegistryError::Conflict`] on a clashing rename, or a storage error.
    pub async fn update(
        &self,
        user_id: Uuid,
        id: Uuid,
        update: ClusterUpdate,
    ) -> Result<ClusterRecord, RegistryError> {
        let _guard = self.writes.lock().await;
        let mut record = self.load(user_id, id).await?;

        if let Some(name) = update.name {
            let name = validate_name(&name)?;
            if name != record.name && self.repo.name_taken(user_id, &name, Some(id)).await? {
                return Err(RegistryError::Conflict { name });
            }
            record.name = name;
        }
        if let Some(description) = update.description {
            record.description = Some(description).filter(|d| !d.trim().is_empty());
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        record.updated_at = Utc::now();
        self.repo.put(&record).await?;
        Ok(record)
    }

    /// Delete a cluster. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// A storage error.
    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<bool, RegistryError> {
        let _guard = self.writes.lock().await;
        let deleted = self.repo.delete(user_id, id).await?;
        if deleted {
            info!(cluster_id = %id, user_id = %user_id, "cluster deleted");
        }
        Ok(deleted)
    }

    /// Replace a missing or wrong API server URL.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`], [`RegistryError::Validation`] for a
    /// non-HTTP URL, or a storage error.
    pub async fn set_api_server(
        &self,
        user_id: Uuid,
        id: Uuid,
        url: &str,
    ) -> Result<ClusterRecord, RegistryError> {
        let url = validate_api_server(url)?;
        let _guard = self.writes.lock().await;
        let mut record = self.load(user_id, id).await?;
        info!(cluster_id = %id, api_server = %url, "updating cluster API server");
        record.api_server = Some(url);
        record.updated_at = Utc::now();
        self.repo.put(&record).await?;
        Ok(record)
    }

    /// The decrypted credential as a kubeconfig document.
    ///
    /// Token clusters get the same synthesized document the query engine uses.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`], [`RegistryError::CredentialsUnavailable`],
    /// or [`RegistryError::Validation`] if a token cluster has no API server.
    pub async fn kubeconfig(&self, user_id: Uuid, id: Uuid) -> Result<Zeroizing<String>, RegistryError> {
        let record = self.load(user_id, id).await?;
        let auth = self
            .resolver
            .resolve(&record)
            .ok_or_else(|| RegistryError::CredentialsUnavailable { id: id.to_string() })?;
        self.engine
            .descriptor(&auth.payload, auth.auth_type, record.api_server.as_deref())
            .and_then(|d| d.to_kubeconfig())
            .map_err(|e| validation(e.to_string()))
    }

    /// Operator diagnostics for one record.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] or a storage error.
    pub async fn diagnostics(&self, user_id: Uuid, id: Uuid) -> Result<ClusterDiagnostics, RegistryError> {
        let record = self.load(user_id, id).await?;
        let credentials_decryptable = self.resolver.resolve(&record).is_some();
        Ok(ClusterDiagnostics {
            id: record.id,
            has_credentials: record.has_credentials(),
            credentials_decryptable,
            name: record.name,
            auth_type: record.auth_type,
            api_server: record.api_server,
            status: record.status,
            master_count: record.master_count,
            worker_count: record.worker_count,
            key_fingerprint: self.codec.fingerprint(),
        })
    }

    /// Replace a cluster's credential with a freshly supplied one, encrypted
    /// under the active key. Used after a key change made the old blob
    /// unreadable.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`], [`RegistryError::Validation`], or a
    /// crypto or storage error.
    pub async fn migrate_credentials(
        &self,
        user_id: Uuid,
        id: Uuid,
        new_auth_data: &str,
    ) -> Result<ClusterRecord, RegistryError> {
        let _guard = self.writes.lock().await;
        let mut record = self.load(user_id, id).await?;
        let prepared =
            prepare_credential(record.auth_type, new_auth_data, record.api_server.as_deref())?;

        record.encrypted_auth = self.codec.encrypt(&prepared.payload)?;
        record.api_server = prepared.api_server;
        record.status = ClusterStatus::Registered;
        record.updated_at = Utc::now();
        self.repo.put(&record).await?;

        info!(
            cluster_id = %id,
            key_fingerprint = %self.codec.fingerprint(),
            "cluster credentials migrated to active key"
        );
        Ok(record)
    }

    /// Re-encrypt every stored credential from `previous` to the active key.
    ///
    /// Records that `previous` cannot decrypt are left untouched and listed
    /// in the report; records already readable under the active key are
    /// counted and skipped.
    ///
    /// # Errors
    ///
    /// A storage or crypto error aborts the sweep. Records already written
    /// stay migrated, so the sweep can be re-run.
    pub async fn reencrypt_all(&self, previous: &EncryptionCodec) -> Result<MigrationReport, RegistryError> {
        let mut report = MigrationReport::default();

        for listed in self.repo.list_all().await? {
            let _guard = self.writes.lock().await;
            // Re-read under the lock; the listing may be stale by now.
            let Some(mut record) = self.repo.get(listed.user_id, listed.id).await? else {
                continue;
            };
            if !record.has_credentials() {
                report.skipped_empty = report.skipped_empty.saturating_add(1);
                continue;
            }
            if self.codec.decrypt(&record.encrypted_auth).is_ok() {
                report.already_current = report.already_current.saturating_add(1);
                continue;
            }
            let Ok(plaintext) = previous.decrypt(&record.encrypted_auth).map(Zeroizing::new) else {
                warn!(cluster_id = %record.id, "credential unreadable under previous key; left as is");
                report.failed.push(record.id);
                continue;
            };

            record.encrypted_auth = self.codec.encrypt(&plaintext)?;
            record.updated_at = Utc::now();
            self.repo.put(&record).await?;
            report.migrated = report.migrated.saturating_add(1);
        }

        info!(
            from = %previous.fingerprint(),
            to = %self.codec.fingerprint(),
            migrated = report.migrated,
            failed = report.failed.len(),
            "credential re-encryption finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use kubeward_storage::MemoryBackend;

    use super::*;
    use crate::crypto::EncryptionKey;
    use crate::kube::query::tests::{FakeLister, TWO_NODES};
    use crate::kube::{NodeLister, TlsPolicy};

    const KUBECONFIG: &str = "\
apiVersion: v1
kind: Config
clusters:
- name: prod
  cluster:
    server: https://10.0.0.1:6443
contexts:
- name: prod-admin
  context:
    cluster: prod
    user: admin
users:
- name: admin
  user:
    token: kubeconfig-embedded-token
current-context: prod-admin
";

    struct Harness {
        backend: Arc<MemoryBackend>,
        codec: Arc<EncryptionCodec>,
        lister: Arc<FakeLister>,
        registry: ClusterRegistry,
    }

    fn harness_with(backend: Arc<MemoryBackend>, codec: Arc<EncryptionCodec>, lister: FakeLister) -> Harness {
        let lister = Arc::new(lister);
        let engine = ClusterQueryEngine::new(
            Arc::clone(&lister) as Arc<dyn NodeLister>,
            Duration::from_secs(30),
            TlsPolicy::Verify,
        );
        let registry = ClusterRegistry::new(
            Arc::clone(&backend) as Arc<dyn StorageBackend>,
            Arc::clone(&codec),
            engine,
        );
        Harness {
            backend,
            codec,
            lister,
            registry,
        }
    }

    fn harness(lister: FakeLister) -> Harness {
        harness_with(
            Arc::new(MemoryBackend::new()),
            Arc::new(EncryptionCodec::new(EncryptionKey::generate())),
            lister,
        )
    }

    fn connect_error() -> QueryError {
        QueryError::Connect {
            reason: "connection refused".to_owned(),
        }
    }

    fn token_request(name: &str) -> RegisterRequest {
        RegisterRequest {
            name: name.to_owned(),
            auth_type: AuthType::Token,
            auth_data: "abcdefghij".to_owned(),
            api_server: Some("https://10.0.0.5:6443".to_owned()),
            description: None,
        }
    }

    #[tokio::test]
    async fn register_token_cluster() {
        let h = harness(FakeLister::ok(TWO_NODES));
        let user = Uuid::new_v4();
        let record = h.registry.register(user, token_request("prod")).await.unwrap();

        assert_eq!(record.auth_type, AuthType::Token);
        assert_eq!(record.api_server.as_deref(), Some("https://10.0.0.5:6443"));
        assert_eq!(record.status, ClusterStatus::Registered);
        assert_eq!(h.codec.decrypt(&record.encrypted_auth).unwrap(), "abcdefghij");
        assert_eq!(
            record.description.as_deref(),
            Some("Token-authenticated cluster: https://10.0.0.5:6443")
        );
        assert_eq!((record.master_count, record.worker_count), (1, 1));

        let stored = h.registry.get(user, record.id).await.unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn register_kubeconfig_extracts_server_and_description() {
        let h = harness(FakeLister::ok(TWO_NODES));
        let record = h
            .registry
            .register(
                Uuid::new_v4(),
                RegisterRequest {
                    name: "kc".to_owned(),
                    auth_type: AuthType::Kubeconfig,
                    auth_data: KUBECONFIG.to_owned(),
                    api_server: None,
                    description: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(record.api_server.as_deref(), Some("https://10.0.0.1:6443"));
        assert_eq!(record.description.as_deref(), Some("Registered cluster: prod"));
        assert_eq!(h.codec.decrypt(&record.encrypted_auth).unwrap(), KUBECONFIG);
        assert_eq!(h.lister.seen.lock().unwrap()[0], KUBECONFIG);
    }

    #[tokio::test]
    async fn kubeconfig_without_clusters_is_rejected_before_storage() {
        let h = harness(FakeLister::ok(TWO_NODES));
        let err = h
            .registry
            .register(
                Uuid::new_v4(),
                RegisterRequest {
                    name: "bad".to_owned(),
                    auth_type: AuthType::Kubeconfig,
                    auth_data: "apiVersion: v1\nkind: Config\nusers: []\n".to_owned(),
                    api_server: None,
                    description: None,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::Validation { .. }));
        assert!(h.backend.is_empty().await);
        assert_eq!(h.lister.calls(), 0);
    }

    #[tokio::test]
    async fn token_validation_rules() {
        let h = harness(FakeLister::ok(TWO_NODES));
        let user = Uuid::new_v4();

        let mut short = token_request("a");
        short.auth_data = "123456789".to_owned();
        let mut no_server = token_request("b");
        no_server.api_server = None;
        let mut bad_scheme = token_request("c");
        bad_scheme.api_server = Some("10.0.0.5:6443".to_owned());
        let mut blank_name = token_request("  ");
        blank_name.name = "  ".to_owned();

        for request in [short, no_server, bad_scheme, blank_name] {
            let err = h.registry.register(user, request).await.unwrap_err();
            assert!(matches!(err, RegistryError::Validation { .. }), "{err}");
        }
        assert!(h.backend.is_empty().await);
    }

    #[tokio::test]
    async fn duplicate_name_conflicts_per_user() {
        let h = harness(FakeLister::ok(TWO_NODES));
        let user = Uuid::new_v4();
        h.registry.register(user, token_request("prod")).await.unwrap();

        let err = h.registry.register(user, token_request("prod")).await.unwrap_err();
        assert!(matches!(err, RegistryError::Conflict { ref name } if name == "prod"));

        h.registry
            .register(Uuid::new_v4(), token_request("prod"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_initial_query_does_not_fail_registration() {
        let h = harness(FakeLister::failing(connect_error()));
        let record = h
            .registry
            .register(Uuid::new_v4(), token_request("offline"))
            .await
            .unwrap();
        assert_eq!(record.status, ClusterStatus::Registered);
        assert_eq!(record.total_nodes(), 0);
        assert_eq!(h.lister.calls(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_last_known_counts() {
        let backend = Arc::new(MemoryBackend::new());
        let codec = Arc::new(EncryptionCodec::new(EncryptionKey::generate()));
        let online = harness_with(Arc::clone(&backend), Arc::clone(&codec), FakeLister::ok(TWO_NODES));
        let user = Uuid::new_v4();
        let record = online.registry.register(user, token_request("prod")).await.unwrap();

        let offline = harness_with(backend, codec, FakeLister::failing(connect_error()));
        let report = offline.registry.refresh(user, record.id).await.unwrap();
        assert_eq!(
            report,
            NodeReport::Stale {
                masters: 1,
                workers: 1,
                error: connect_error()
            }
        );
        assert_eq!(offline.registry.get(user, record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn refresh_reports_live_snapshot() {
        let h = harness(FakeLister::ok(TWO_NODES));
        let user = Uuid::new_v4();
        let record = h.registry.register(user, token_request("prod")).await.unwrap();

        let report = h.registry.refresh(user, record.id).await.unwrap();
        assert!(matches!(
            report,
            NodeReport::Live(ref snapshot) if snapshot.nodes.len() == 2 && snapshot.summary.ready == 2
        ));
    }

    #[tokio::test]
    async fn rotated_key_means_credentials_unavailable() {
        let h = harness(FakeLister::ok(TWO_NODES));
        let user = Uuid::new_v4();
        let record = h.registry.register(user, token_request("prod")).await.unwrap();
        assert!(h.codec.rotate_key(EncryptionKey::generate()));

        assert_eq!(
            h.registry.node_summary(user, record.id).await.unwrap(),
            NodeReport::CredentialsUnavailable
        );
        assert!(matches!(
            h.registry.kubeconfig(user, record.id).await,
            Err(RegistryError::CredentialsUnavailable { .. })
        ));
        let diag = h.registry.diagnostics(user, record.id).await.unwrap();
        assert!(diag.has_credentials);
        assert!(!diag.credentials_decryptable);
    }

    #[tokio::test]
    async fn health_live_and_unknown() {
        let backend = Arc::new(MemoryBackend::new());
        let codec = Arc::new(EncryptionCodec::new(EncryptionKey::generate()));
        let online = harness_with(Arc::clone(&backend), Arc::clone(&codec), FakeLister::ok(TWO_NODES));
        let user = Uuid::new_v4();
        let record = online.registry.register(user, token_request("prod")).await.unwrap();

        let healthy = online.registry.health(user, record.id).await.unwrap();
        assert_eq!(healthy.health, ClusterHealth::Healthy);
        assert_eq!(healthy.summary.unwrap().total, 2);

        let offline = harness_with(backend, codec, FakeLister::failing(connect_error()));
        let unknown = offline.registry.health(user, record.id).await.unwrap();
        assert_eq!(unknown.health, ClusterHealth::Unknown);
        assert!(unknown.summary.is_none());
        assert_eq!(unknown.name, "prod");
    }

    #[tokio::test]
    async fn other_users_cluster_is_not_found() {
        let h = harness(FakeLister::ok(TWO_NODES));
        let record = h
            .registry
            .register(Uuid::new_v4(), token_request("prod"))
            .await
            .unwrap();
        let stranger = Uuid::new_v4();
        assert!(matches!(
            h.registry.get(stranger, record.id).await,
            Err(RegistryError::NotFound { .. })
        ));
        assert!(!h.registry.delete(stranger, record.id).await.unwrap());
    }

    #[tokio::test]
    async fn update_rename_and_conflict() {
        let h = harness(FakeLister::ok(TWO_NODES));
        let user = Uuid::new_v4();
        let a = h.registry.register(user, token_request("a")).await.unwrap();
        h.registry.register(user, token_request("b")).await.unwrap();

        let err = h
            .registry
            .update(
                user,
                a.id,
                ClusterUpdate {
                    name: Some("b".to_owned()),
                    ..ClusterUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict { .. }));

        let updated = h
            .registry
            .update(
                user,
                a.id,
                ClusterUpdate {
                    name: Some("a".to_owned()),
                    description: Some("edge site".to_owned()),
                    status: Some(ClusterStatus::Error),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("edge site"));
        assert_eq!(updated.status, ClusterStatus::Error);
        assert_eq!(updated.encrypted_auth, a.encrypted_auth);
    }

    #[tokio::test]
    async fn set_api_server_validates_scheme() {
        let h = harness(FakeLister::ok(TWO_NODES));
        let user = Uuid::new_v4();
        let record = h.registry.register(user, token_request("prod")).await.unwrap();

        assert!(matches!(
            h.registry.set_api_server(user, record.id, "tcp://x").await,
            Err(RegistryError::Validation { .. })
        ));
        let updated = h
            .registry
            .set_api_server(user, record.id, " https://10.0.0.9:6443 ")
            .await
            .unwrap();
        assert_eq!(updated.api_server.as_deref(), Some("https://10.0.0.9:6443"));
    }

    #[tokio::test]
    async fn kubeconfig_for_token_cluster_is_synthesized() {
        let h = harness(FakeLister::ok(TWO_NODES));
        let user = Uuid::new_v4();
        let record = h.registry.register(user, token_request("prod")).await.unwrap();

        let doc = h.registry.kubeconfig(user, record.id).await.unwrap();
        assert!(doc.contains("token: abcdefghij"));
        assert!(doc.contains("current-context: token-context"));
    }

    #[tokio::test]
    async fn diagnostics_do_not_leak_credentials() {
        let h = harness(FakeLister::ok(TWO_NODES));
        let user = Uuid::new_v4();
        let record = h.registry.register(user, token_request("prod")).await.unwrap();

        let diag = h.registry.diagnostics(user, record.id).await.unwrap();
        assert!(diag.credentials_decryptable);
        assert_eq!(diag.key_fingerprint, h.codec.fingerprint());
        let json = serde_json::to_string(&diag).unwrap();
        assert!(!json.contains("abcdefghij"));
        assert!(!json.contains(&record.encrypted_auth));
    }

    #[tokio::test]
    async fn migrate_credentials_restores_access_after_key_change() {
        let h = harness(FakeLister::ok(TWO_NODES));
        let user = Uuid::new_v4();
        let record = h.registry.register(user, token_request("prod")).await.unwrap();
        h.codec.rotate_key(EncryptionKey::generate());

        let migrated = h
            .registry
            .migrate_credentials(user, record.id, "new-token-0123")
            .await
            .unwrap();
        assert_eq!(h.codec.decrypt(&migrated.encrypted_auth).unwrap(), "new-token-0123");
        assert!(matches!(
            h.registry.node_summary(user, record.id).await.unwrap(),
            NodeReport::Live(_)
        ));
    }

    #[tokio::test]
    async fn reencrypt_all_moves_readable_records() {
        let old_key = EncryptionKey::generate();
        let previous = EncryptionCodec::new(old_key.clone());
        let h = harness_with(
            Arc::new(MemoryBackend::new()),
            Arc::new(EncryptionCodec::new(old_key)),
            FakeLister::ok(TWO_NODES),
        );
        let user = Uuid::new_v4();
        let a = h.registry.register(user, token_request("a")).await.unwrap();
        let b = h.registry.register(user, token_request("b")).await.unwrap();

        // A record sealed under some unrelated key.
        let mut orphan = h.registry.get(user, b.id).await.unwrap();
        orphan.encrypted_auth = EncryptionCodec::new(EncryptionKey::generate())
            .encrypt("lost-token-value")
            .unwrap();
        ClusterRepository::new(Arc::clone(&h.backend) as Arc<dyn StorageBackend>)
            .put(&orphan)
            .await
            .unwrap();

        assert!(h.codec.rotate_key(EncryptionKey::generate()));
        let report = h.registry.reencrypt_all(&previous).await.unwrap();
        assert_eq!(report.migrated, 1);
        assert_eq!(report.failed, vec![b.id]);

        let moved = h.registry.get(user, a.id).await.unwrap();
        assert_eq!(h.codec.decrypt(&moved.encrypted_auth).unwrap(), "abcdefghij");

        let again = h.registry.reencrypt_all(&previous).await.unwrap();
        assert_eq!(again.migrated, 0);
        assert_eq!(again.already_current, 1);
    }

    // ── Mutations racing a slow node query ───────────────────────────

    const SLOW_QUERY: Duration = Duration::from_secs(5);

    /// Register under a fast lister, then hand back a registry over the same
    /// store whose queries take [`SLOW_QUERY`].
    async fn slow_harness() -> (Harness, Uuid, ClusterRecord) {
        let backend = Arc::new(MemoryBackend::new());
        let codec = Arc::new(EncryptionCodec::new(EncryptionKey::generate()));
        let fast = harness_with(Arc::clone(&backend), Arc::clone(&codec), FakeLister::ok(TWO_NODES));
        let user = Uuid::new_v4();
        let record = fast.registry.register(user, token_request("prod")).await.unwrap();
        (harness_with(backend, codec, FakeLister::slow(SLOW_QUERY)), user, record)
    }

    #[tokio::test(start_paused = true)]
    async fn delete_during_refresh_stays_deleted() {
        let (h, user, record) = slow_harness().await;

        let (report, deleted) = tokio::join!(h.registry.refresh(user, record.id), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            h.registry.delete(user, record.id).await.unwrap()
        });

        assert!(deleted);
        assert!(matches!(report.unwrap(), NodeReport::Live(_)));
        assert!(matches!(
            h.registry.get(user, record.id).await,
            Err(RegistryError::NotFound { .. })
        ));
        assert!(h.backend.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn migrated_credentials_survive_concurrent_refresh() {
        let (h, user, record) = slow_harness().await;

        let (report, migrated) = tokio::join!(h.registry.refresh(user, record.id), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            h.registry
                .migrate_credentials(user, record.id, "new-token-0123")
                .await
                .unwrap()
        });
        assert!(matches!(report.unwrap(), NodeReport::Live(_)));

        let stored = h.registry.get(user, record.id).await.unwrap();
        assert_eq!(stored.encrypted_auth, migrated.encrypted_auth);
        assert_eq!(h.codec.decrypt(&stored.encrypted_auth).unwrap(), "new-token-0123");
        assert_eq!((stored.master_count, stored.worker_count), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn api_server_change_survives_concurrent_node_summary() {
        let (h, user, record) = slow_harness().await;

        let (report, _) = tokio::join!(h.registry.node_summary(user, record.id), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            h.registry
                .set_api_server(user, record.id, "https://10.0.0.9:6443")
                .await
                .unwrap()
        });
        assert!(matches!(report.unwrap(), NodeReport::Live(_)));

        let stored = h.registry.get(user, record.id).await.unwrap();
        assert_eq!(stored.api_server.as_deref(), Some("https://10.0.0.9:6443"));
    }

    #[tokio::test(start_paused = true)]
    async fn reencryption_during_node_summary_is_not_reverted() {
        let (h, user, record) = slow_harness().await;
        let previous = h.codec.snapshot();

        let (report, migration) = tokio::join!(h.registry.node_summary(user, record.id), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(h.codec.rotate_key(EncryptionKey::generate()));
            h.registry.reencrypt_all(&previous).await.unwrap()
        });
        assert!(matches!(report.unwrap(), NodeReport::Live(_)));
        assert_eq!(migration.migrated, 1);

        let stored = h.registry.get(user, record.id).await.unwrap();
        assert_eq!(h.codec.decrypt(&stored.encrypted_auth).unwrap(), "abcdefghij");
        assert!(previous.decrypt(&stored.encrypted_auth).is_err());
    }

    #[test]
    fn validate_kubeconfig_sections() {
        let ok = validate_credentials(KUBECONFIG, AuthType::Kubeconfig);
        assert!(ok.valid);
        assert_eq!(ok.cluster_name.as_deref(), Some("prod-admin"));
        assert_eq!(ok.api_server.as_deref(), Some("https://10.0.0.1:6443"));

        let missing = validate_credentials("apiVersion: v1\nclusters: []\n", AuthType::Kubeconfig);
        assert!(!missing.valid);
        assert_eq!(
            missing.error.as_deref(),
            Some("missing required sections: contexts, users")
        );

        let no_version = validate_credentials("clusters: []\n", AuthType::Kubeconfig);
        assert!(no_version.error.unwrap().contains("apiVersion"));

        let garbage = validate_credentials("{{{", AuthType::Kubeconfig);
        assert!(garbage.error.unwrap().starts_with("invalid YAML format"));
    }

    #[test]
    fn validate_token_length() {
        assert!(validate_credentials("  abcdefghij  ", AuthType::Token).valid);
        let short = validate_credentials("abc", AuthType::Token);
        assert!(!short.valid);
        assert!(short.auth_type.is_none());
    }

    #[test]
    fn register_request_debug_hides_auth_data() {
        let request = token_request("prod");
        assert!(!format!("{request:?}").contains("abcdefghij"));
    }
}
