//! Kubernetes side: kubeconfig handling, credential recovery, node queries.

pub mod auth;
pub mod kubeconfig;
pub mod node;
pub mod query;

pub use auth::{ClusterAuthResolver, ResolvedAuth};
pub use kubeconfig::TlsPolicy;
pub use node::{ClusterHealth, NodeInfo, NodeSummary};
pub use query::{
    ClusterQueryEngine, ConnectionDescriptor, DEFAULT_QUERY_TIMEOUT, KubectlNodeLister, NodeLister,
};
