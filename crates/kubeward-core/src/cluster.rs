//! Cluster records and their storage layout.
//!
//! Records are JSON under `clusters/<user_id>/<cluster_id>`, so ownership
//! is part of the key and a lookup for the wrong user simply misses.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kubeward_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RegistryError;

const KEY_PREFIX: &str = "clusters/";

/// How a cluster's credential is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// A full kubeconfig YAML document.
    Kubeconfig,
    /// A bearer token for `api_server`.
    Token,
}

impl AuthType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kubeconfig => "kubeconfig",
            Self::Token => "token",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kubeconfig" => Ok(Self::Kubeconfig),
            "token" => Ok(Self::Token),
            other => Err(format!("unsupported auth type: {other}")),
        }
    }
}

/// Lifecycle state of a registered cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Creating,
    Registered,
    Error,
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Creating => "creating",
            Self::Registered => "registered",
            Self::Error => "error",
        })
    }
}

/// One registered cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Unique per owner.
    pub name: String,
    pub auth_type: AuthType,
    /// Required for token auth, extracted from the kubeconfig otherwise.
    pub api_server: Option<String>,
    /// Codec blob of the kubeconfig YAML or bearer token. Stored byte-exact.
    pub encrypted_auth: String,
    pub master_count: u32,
    pub worker_count: u32,
    pub status: ClusterStatus,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClusterRecord {
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.encrypted_auth.is_empty()
    }

    #[must_use]
    pub fn total_nodes(&self) -> u32 {
        self.master_count.saturating_add(self.worker_count)
    }
}

/// Persists [`ClusterRecord`]s on a [`StorageBackend`].
#[derive(Clone)]
pub struct ClusterRepository {
    backend: Arc<dyn StorageBackend>,
}

impl fmt::Debug for ClusterRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterRepository").finish_non_exhaustive()
    }
}

impl ClusterRepository {
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    fn record_key(user_id: Uuid, id: Uuid) -> String {
        format!("{KEY_PREFIX}{user_id}/{id}")
    }

    fn decode(key: &str, data: &[u8]) -> Result<ClusterRecord, RegistryError> {
        serde_json::from_slice(data).map_err(|e| RegistryError::Corrupt {
            key: key.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Fetch one record owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] or [`RegistryError::Corrupt`].
    pub async fn get(&self, user_id: Uuid, id: Uuid) -> Result<Option<ClusterRecord>, RegistryError> {
        let key = Self::record_key(user_id, id);
        match self.backend.get(&key).await? {
            Some(data) => Self::decode(&key, &data).map(Some),
            None => Ok(None),
        }
    }

    /// Insert or overwrite a record.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] or [`RegistryError::Corrupt`].
    pub async fn put(&self, record: &ClusterRecord) -> Result<(), RegistryError> {
        let key = Self::record_key(record.user_id, record.id);
        let data = serde_json::to_vec(record).map_err(|e| RegistryError::Corrupt {
            key: key.clone(),
            reason: format!("serialization failed: {e}"),
        })?;
        self.backend.put(&key, &data).await?;
        Ok(())
    }

    /// Delete a record. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`].
    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<bool, RegistryError> {
        let key = Self::record_key(user_id, id);
        if !self.backend.exists(&key).await? {
            return Ok(false);
        }
        self.backend.delete(&key).await?;
        Ok(true)
    }

    /// All records owned by `user_id`, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] or [`RegistryError::Corrupt`].
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<ClusterRecord>, RegistryError> {
        let mut records = self.load_prefix(&format!("{KEY_PREFIX}{user_id}/")).await?;
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Every record of every user, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] or [`RegistryError::Corrupt`].
    pub async fn list_all(&self) -> Result<Vec<ClusterRecord>, RegistryError> {
        self.load_prefix(KEY_PREFIX).await
    }

    async fn load_prefix(&self, prefix: &str) -> Result<Vec<ClusterRecord>, RegistryError> {
        let keys = self.backend.list(prefix).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            // A concurrent delete between list and get is not an error.
            if let Some(data) = self.backend.get(&key).await? {
                records.push(Self::decode(&key, &data)?);
            }
        }
        Ok(records)
    }

    /// Whether `user_id` already owns a cluster called `name`, other than `except`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] or [`RegistryError::Corrupt`].
    pub async fn name_taken(
        &self,
        user_id: Uuid,
        name: &str,
        except: Option<Uuid>,
    ) -> Result<bool, RegistryError> {
        Ok(self
            .list(user_id)
            .await?
            .iter()
            .any(|r| r.name == name && Some(r.id) != except))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use kubeward_storage::MemoryBackend;

    use super::*;

    fn record(user_id: Uuid, name: &str) -> ClusterRecord {
        let now = Utc::now();
        ClusterRecord {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_owned(),
            auth_type: AuthType::Token,
            api_server: Some("https://10.0.0.5:6443".to_owned()),
            encrypted_auth: "blob".to_owned(),
            master_count: 1,
            worker_count: 2,
            status: ClusterStatus::Registered,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn repo() -> ClusterRepository {
        ClusterRepository::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn put_get_roundtrip_is_exact() {
        let repo = repo();
        let user = Uuid::new_v4();
        let rec = record(user, "prod");
        repo.put(&rec).await.unwrap();
        assert_eq!(repo.get(user, rec.id).await.unwrap(), Some(rec));
    }

    #[tokio::test]
    async fn other_user_cannot_see_record() {
        let repo = repo();
        let rec = record(Uuid::new_v4(), "prod");
        repo.put(&rec).await.unwrap();
        assert_eq!(repo.get(Uuid::new_v4(), rec.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_is_per_user_and_sorted() {
        let repo = repo();
        let user = Uuid::new_v4();
        repo.put(&record(user, "zeta")).await.unwrap();
        repo.put(&record(user, "alpha")).await.unwrap();
        repo.put(&record(Uuid::new_v4(), "other")).await.unwrap();

        let names: Vec<_> = repo
            .list(user)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(repo.list_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let repo = repo();
        let rec = record(Uuid::new_v4(), "prod");
        repo.put(&rec).await.unwrap();
        assert!(repo.delete(rec.user_id, rec.id).await.unwrap());
        assert!(!repo.delete(rec.user_id, rec.id).await.unwrap());
    }

    #[tokio::test]
    async fn name_taken_ignores_self() {
        let repo = repo();
        let rec = record(Uuid::new_v4(), "prod");
        repo.put(&rec).await.unwrap();
        assert!(repo.name_taken(rec.user_id, "prod", None).await.unwrap());
        assert!(!repo.name_taken(rec.user_id, "prod", Some(rec.id)).await.unwrap());
        assert!(!repo.name_taken(Uuid::new_v4(), "prod", None).await.unwrap());
    }

    #[test]
    fn enums_use_lowercase_wire_names() {
        assert_eq!(serde_json::to_string(&AuthType::Kubeconfig).unwrap(), "\"kubeconfig\"");
        assert_eq!(serde_json::to_string(&ClusterStatus::Registered).unwrap(), "\"registered\"");
        assert_eq!("token".parse::<AuthType>().unwrap(), AuthType::Token);
        assert!("ssh".parse::<AuthType>().is_err());
    }
}
