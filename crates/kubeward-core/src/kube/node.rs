//! Normalized node model parsed from `kubectl get nodes -o json`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

const ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";
const LEGACY_ROLE_LABEL: &str = "kubernetes.io/role";

/// Fallback for fields the API server did not report.
pub const UNKNOWN: &str = "unknown";

/// One cluster node, derived per query and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    /// Status of the `Ready` condition: `True`, `False`, or `Unknown`.
    pub ready: String,
    pub roles: Vec<String>,
    pub kubelet_version: String,
    pub os: String,
    pub architecture: String,
    pub internal_ip: String,
    pub created_at: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
}

impl NodeInfo {
    /// Control-plane iff the role set contains `control-plane` or `master`.
    #[must_use]
    pub fn is_master(&self) -> bool {
        self.roles.iter().any(|r| r == "control-plane" || r == "master")
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready == "True"
    }
}

/// Aggregate counts derived from a node list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeSummary {
    pub total: u32,
    pub masters: u32,
    pub workers: u32,
    pub ready: u32,
}

impl NodeSummary {
    #[must_use]
    pub fn from_nodes(nodes: &[NodeInfo]) -> Self {
        let count = |f: fn(&NodeInfo) -> bool| {
            u32::try_from(nodes.iter().filter(|n| f(n)).count()).unwrap_or(u32::MAX)
        };
        let total = u32::try_from(nodes.len()).unwrap_or(u32::MAX);
        let masters = count(NodeInfo::is_master);
        Self {
            total,
            masters,
            workers: total.saturating_sub(masters),
            ready: count(NodeInfo::is_ready),
        }
    }

    #[must_use]
    pub fn health(&self) -> ClusterHealth {
        ClusterHealth::classify(self.ready, self.total)
    }
}

/// Cluster health, a pure function of one node snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterHealth {
    Healthy,
    Warning,
    Critical,
    /// No snapshot could be taken.
    Unknown,
}

impl ClusterHealth {
    /// `critical` for an empty cluster, `healthy` when all nodes are ready,
    /// `warning` when at least half are, `critical` otherwise.
    #[must_use]
    pub fn classify(ready: u32, total: u32) -> Self {
        if total == 0 {
            Self::Critical
        } else if ready >= total {
            Self::Healthy
        } else if u64::from(ready) * 2 >= u64::from(total) {
            Self::Warning
        } else {
            Self::Critical
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ClusterHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
struct RawNodeList {
    #[serde(default)]
    items: Vec<RawNode>,
}

#[derive(Deserialize)]
struct RawNode {
    metadata: RawMetadata,
    #[serde(default)]
    status: RawStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatus {
    #[serde(default)]
    conditions: Vec<RawCondition>,
    #[serde(default)]
    addresses: Vec<RawAddress>,
    #[serde(default)]
    node_info: RawNodeInfo,
}

#[derive(Deserialize)]
struct RawCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

#[derive(Deserialize)]
struct RawAddress {
    #[serde(rename = "type")]
    kind: String,
    address: String,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNodeInfo {
    #[serde(default)]
    kubelet_version: Option<String>,
    #[serde(default)]
    operating_system: Option<String>,
    #[serde(default)]
    architecture: Option<String>,
}

/// Parse a `NodeList` JSON document.
///
/// # Errors
///
/// Returns [`QueryError::Parse`] if the document is not a node list.
pub fn parse_node_list(json: &str) -> Result<Vec<NodeInfo>, QueryError> {
    let list: RawNodeList = serde_json::from_str(json).map_err(|e| QueryError::Parse {
        reason: format!("malformed node list: {e}"),
    })?;
    Ok(list.items.into_iter().map(normalize).collect())
}

fn normalize(raw: RawNode) -> NodeInfo {
    let RawNode { metadata, status } = raw;

    let internal_ip = status
        .addresses
        .into_iter()
        .find(|a| a.kind == "InternalIP")
        .map_or_else(|| UNKNOWN.to_owned(), |a| a.address);

    let ready = status
        .conditions
        .into_iter()
        .find(|c| c.kind == "Ready")
        .map_or_else(|| "Unknown".to_owned(), |c| c.status);

    let or_unknown = |v: Option<String>| v.unwrap_or_else(|| UNKNOWN.to_owned());

    NodeInfo {
        name: metadata.name,
        ready,
        roles: roles_from_labels(&metadata.labels),
        kubelet_version: or_unknown(status.node_info.kubelet_version),
        os: or_unknown(status.node_info.operating_system),
        architecture: or_unknown(status.node_info.architecture),
        internal_ip,
        created_at: metadata.creation_timestamp,
        labels: metadata.labels,
    }
}

/// Role names from `node-role.kubernetes.io/<role>` labels, falling back to
/// the legacy `kubernetes.io/role=master` label.
#[must_use]
pub fn roles_from_labels(labels: &BTreeMap<String, String>) -> Vec<String> {
    let mut roles: Vec<String> = labels
        .keys()
        .filter_map(|k| k.strip_prefix(ROLE_LABEL_PREFIX))
        .filter(|role| !role.is_empty())
        .map(str::to_owned)
        .collect();

    if roles.is_empty() && labels.get(LEGACY_ROLE_LABEL).is_some_and(|v| v == "master") {
        roles.push("master".to_owned());
    }
    roles
}
