//! Live node queries against a remote Kubernetes API.
//!
//! [`ClusterQueryEngine`] turns a decrypted credential into a
//! [`ConnectionDescriptor`], hands it to a [`NodeLister`] under a fixed
//! timeout and parses the result. The production lister shells out to
//! `kubectl`; tests substitute their own.

use std::fmt;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::cluster::AuthType;
use crate::error::QueryError;
use crate::kube::kubeconfig::{self, TlsPolicy};
use crate::kube::node::{self, NodeInfo};

/// Default bound on a single node listing.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest diagnostic kept in an error reason.
const MAX_REASON_LEN: usize = 300;

/// Longest raw stderr excerpt written to the debug log.
const MAX_LOGGED_STDERR: usize = 500;

/// Credential half of a [`ConnectionDescriptor`].
#[derive(Clone)]
enum Credential {
    Kubeconfig(Zeroizing<String>),
    BearerToken(Zeroizing<String>),
}

/// Everything needed to issue one query. Built per call and dropped after;
/// `Debug` never prints the credential.
#[derive(Clone)]
pub struct ConnectionDescriptor {
    api_server: Option<String>,
    tls: TlsPolicy,
    credential: Credential,
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.credential {
            Credential::Kubeconfig(_) => "kubeconfig",
            Credential::BearerToken(_) => "token",
        };
        f.debug_struct("ConnectionDescriptor")
            .field("api_server", &self.api_server)
            .field("tls", &self.tls)
            .field("credential", &kind)
            .finish()
    }
}

impl ConnectionDescriptor {
    /// Build a descriptor from a decrypted payload.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Connect`] if `auth_type` is token and no API
    /// server is known.
    pub fn new(
        payload: &str,
        auth_type: AuthType,
        api_server: Option<&str>,
        tls: TlsPolicy,
    ) -> Result<Self, QueryError> {
        let api_server = api_server.filter(|s| !s.trim().is_empty()).map(str::to_owned);
        let credential = match auth_type {
            AuthType::Kubeconfig => Credential::Kubeconfig(Zeroizing::new(payload.to_owned())),
            AuthType::Token => {
                if api_server.is_none() {
                    return Err(QueryError::Connect {
                        reason: "token authentication requires an API server URL".to_owned(),
                    });
                }
                Credential::BearerToken(Zeroizing::new(payload.trim().to_owned()))
            }
        };
        Ok(Self {
            api_server,
            tls,
            credential,
        })
    }

    #[must_use]
    pub fn api_server(&self) -> Option<&str> {
        self.api_server.as_deref()
    }

    /// The kubeconfig document to hand to `kubectl`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Parse`] if a token kubeconfig cannot be rendered.
    pub fn to_kubeconfig(&self) -> Result<Zeroizing<String>, QueryError> {
        match &self.credential {
            Credential::Kubeconfig(doc) => Ok(doc.clone()),
            Credential::BearerToken(token) => {
                let server = self.api_server.as_deref().unwrap_or_default();
                kubeconfig::token_kubeconfig(token, server, self.tls)
                    .map(Zeroizing::new)
                    .map_err(|e| QueryError::Parse {
                        reason: format!("failed to render token kubeconfig: {e}"),
                    })
            }
        }
    }
}

/// Issues the raw "list nodes" request.
#[async_trait::async_trait]
pub trait NodeLister: Send + Sync {
    /// Return the raw `NodeList` JSON.
    async fn list_nodes(&self, descriptor: &ConnectionDescriptor) -> Result<String, QueryError>;
}

/// [`NodeLister`] backed by `kubectl get nodes -o json`.
#[derive(Debug, Clone)]
pub struct KubectlNodeLister {
    program: PathBuf,
}

impl Default for KubectlNodeLister {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

impl KubectlNodeLister {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// Write the descriptor's kubeconfig to an owner-only temp file.
///
/// The file is `0600` from creation and is removed when the handle drops,
/// including when the surrounding future is cancelled by a timeout.
fn stage_kubeconfig(descriptor: &ConnectionDescriptor) -> Result<NamedTempFile, QueryError> {
    let staging = |e: std::io::Error| QueryError::Connect {
        reason: format!("failed to stage kubeconfig: {e}"),
    };
    let document = descriptor.to_kubeconfig()?;
    let mut file = tempfile::Builder::new()
        .prefix("kubeward-")
        .suffix(".kubeconfig")
        .tempfile()
        .map_err(staging)?;
    file.write_all(document.as_bytes()).map_err(staging)?;
    file.flush().map_err(staging)?;
    Ok(file)
}

#[async_trait::async_trait]
impl NodeLister for KubectlNodeLister {
    async fn list_nodes(&self, descriptor: &ConnectionDescriptor) -> Result<String, QueryError> {
        let staged = stage_kubeconfig(descriptor)?;

        let output = Command::new(&self.program)
            .args(["get", "nodes", "-o", "json", "--kubeconfig"])
            .arg(staged.path())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| QueryError::Connect {
                reason: format!("failed to run '{}': {e}", self.program.display()),
            })?;
        drop(staged);

        if output.status.success() {
            return String::from_utf8(output.stdout).map_err(|_| QueryError::Parse {
                reason: "kubectl output is not valid UTF-8".to_owned(),
            });
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let excerpt: String = stderr.trim().chars().take(MAX_LOGGED_STDERR).collect();
        debug!(
            api_server = ?descriptor.api_server(),
            status = ?output.status.code(),
            stderr = %excerpt,
            "kubectl get nodes failed"
        );
        Err(classify_failure(&stderr))
    }
}

/// Map `kubectl` stderr onto a [`QueryError`] class.
#[must_use]
pub fn classify_failure(stderr: &str) -> QueryError {
    const CONNECT: [&str; 5] = [
        "Unable to connect to the server",
        "connection refused",
        "no such host",
        "i/o timeout",
        "context deadline exceeded",
    ];
    const AUTH: [&str; 4] = [
        "Unauthorized",
        "Forbidden",
        "forbidden",
        "You must be logged in",
    ];

    let reason = summarize(stderr);
    if CONNECT.iter().any(|m| stderr.contains(m)) {
        QueryError::Connect { reason }
    } else if AUTH.iter().any(|m| stderr.contains(m)) {
        QueryError::Auth { reason }
    } else {
        QueryError::Parse { reason }
    }
}

/// First non-empty line, capped.
fn summarize(stderr: &str) -> String {
    let line = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no diagnostic output");
    line.chars().take(MAX_REASON_LEN).collect()
}

/// Runs node listings with a fixed timeout and TLS policy.
#[derive(Clone)]
pub struct ClusterQueryEngine {
    lister: Arc<dyn NodeLister>,
    timeout: Duration,
    tls: TlsPolicy,
}

impl fmt::Debug for ClusterQueryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterQueryEngine")
            .field("timeout", &self.timeout)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

impl ClusterQueryEngine {
    #[must_use]
    pub fn new(lister: Arc<dyn NodeLister>, timeout: Duration, tls: TlsPolicy) -> Self {
        Self {
            lister,
            timeout,
            tls,
        }
    }

    /// Engine over `kubectl` at `program`.
    #[must_use]
    pub fn kubectl(program: impl Into<PathBuf>, timeout: Duration, tls: TlsPolicy) -> Self {
        Self::new(Arc::new(KubectlNodeLister::new(program)), timeout, tls)
    }

    #[must_use]
    pub fn tls_policy(&self) -> TlsPolicy {
        self.tls
    }

    /// Build a descriptor with this engine's TLS policy.
    ///
    /// # Errors
    ///
    /// See [`ConnectionDescriptor::new`].
    pub fn descriptor(
        &self,
        payload: &str,
        auth_type: AuthType,
        api_server: Option<&str>,
    ) -> Result<ConnectionDescriptor, QueryError> {
        ConnectionDescriptor::new(payload, auth_type, api_server, self.tls)
    }

    /// List and parse the cluster's nodes.
    ///
    /// A timeout is reported as [`QueryError::Connect`] and is not retried.
    ///
    /// # Errors
    ///
    /// [`QueryError::Connect`], [`QueryError::Auth`] or [`QueryError::Parse`].
    pub async fn list_nodes(
        &self,
        payload: &str,
        auth_type: AuthType,
        api_server: Option<&str>,
    ) -> Result<Vec<NodeInfo>, QueryError> {
        let descriptor = self.descriptor(payload, auth_type, api_server)?;

        let raw = tokio::time::timeout(self.timeout, self.lister.list_nodes(&descriptor))
            .await
            .map_err(|_| {
                warn!(
                    api_server = ?descriptor.api_server(),
                    timeout_secs = self.timeout.as_secs(),
                    "node query timed out"
                );
                QueryError::Connect {
                    reason: format!("query timed out after {}s", self.timeout.as_secs()),
                }
            })??;

        let nodes = node::parse_node_list(&raw)?;
        debug!(api_server = ?descriptor.api_server(), count = nodes.len(), "nodes listed");
        Ok(nodes)
    }
}
