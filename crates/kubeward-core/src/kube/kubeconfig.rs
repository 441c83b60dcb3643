//! Minimal kubeconfig model.
//!
//! Only the fields Kubeward reads or synthesizes are modelled; everything
//! else in a user-supplied document is ignored on parse and the original
//! text is what gets stored and handed to `kubectl`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Synthesized names for token-authenticated clusters.
const TOKEN_CLUSTER: &str = "token-cluster";
const TOKEN_USER: &str = "token-user";
const TOKEN_CONTEXT: &str = "token-context";

/// Shortest bearer token accepted before the first live query.
pub const MIN_TOKEN_LEN: usize = 10;

/// TLS verification policy for synthesized token kubeconfigs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Verify the API server certificate (default).
    #[default]
    Verify,
    /// Skip verification for `https://` servers. Exposes the bearer token to
    /// anyone able to intercept the connection.
    InsecureSkipVerify,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clusters: Option<Vec<NamedCluster>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contexts: Option<Vec<NamedContext>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<NamedUser>>,
    #[serde(rename = "current-context", default, skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamedCluster {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_tls_verify: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamedContext {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamedUser {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserEntry>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct UserEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl fmt::Debug for UserEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserEntry")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Kubeconfig {
    /// Parse a kubeconfig document.
    ///
    /// # Errors
    ///
    /// Returns the YAML error if the text is not a kubeconfig-shaped mapping.
    pub fn parse(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// `server` of the first cluster entry, if any.
    #[must_use]
    pub fn first_server(&self) -> Option<&str> {
        self.clusters
            .as_deref()?
            .first()?
            .cluster
            .as_ref()?
            .server
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }

    /// Cluster name referenced by the current context.
    #[must_use]
    pub fn current_cluster_name(&self) -> Option<&str> {
        let current = self.current_context.as_deref()?;
        self.contexts
            .as_deref()?
            .iter()
            .find(|c| c.name == current)?
            .context
            .as_ref()?
            .cluster
            .as_deref()
    }
}

/// What registration needs from a kubeconfig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeconfigSummary {
    pub api_server: String,
    pub cluster_name: Option<String>,
}

/// Check a kubeconfig for registration: `apiVersion` present, `clusters`
/// non-empty and the first cluster carrying a `server`.
///
/// # Errors
///
/// Returns a human-readable reason on rejection.
pub fn inspect_kubeconfig(yaml: &str) -> Result<KubeconfigSummary, String> {
    let config = Kubeconfig::parse(yaml).map_err(|e| format!("invalid kubeconfig YAML: {e}"))?;

    if config.api_version.as_deref().is_none_or(str::is_empty) {
        return Err("invalid kubeconfig: missing apiVersion".to_owned());
    }
    if config.clusters.as_deref().is_none_or(<[NamedCluster]>::is_empty) {
        return Err("invalid kubeconfig: no clusters defined".to_owned());
    }
    let api_server = config
        .first_server()
        .ok_or_else(|| "invalid kubeconfig: first cluster has no server URL".to_owned())?
        .to_owned();

    Ok(KubeconfigSummary {
        api_server,
        cluster_name: config.current_cluster_name().map(str::to_owned),
    })
}

/// `true` if `url` is an `http://` or `https://` URL with something after the scheme.
#[must_use]
pub fn is_http_url(url: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| url.strip_prefix(scheme).is_some_and(|rest| !rest.is_empty()))
}

/// Build a single-cluster kubeconfig binding `token` as a bearer credential.
///
/// # Errors
///
/// Returns the YAML error if serialization fails.
pub fn token_kubeconfig(
    token: &str,
    api_server: &str,
    tls: TlsPolicy,
) -> Result<String, serde_yaml::Error> {
    let skip_verify =
        (tls == TlsPolicy::InsecureSkipVerify && api_server.starts_with("https://")).then_some(true);

    let config = Kubeconfig {
        api_version: Some("v1".to_owned()),
        kind: Some("Config".to_owned()),
        clusters: Some(vec![NamedCluster {
            name: TOKEN_CLUSTER.to_owned(),
            cluster: Some(ClusterEntry {
                server: Some(api_server.to_owned()),
                insecure_skip_tls_verify: skip_verify,
            }),
        }]),
        users: Some(vec![NamedUser {
            name: TOKEN_USER.to_owned(),
            user: Some(UserEntry {
                token: Some(token.to_owned()),
            }),
        }]),
        contexts: Some(vec![NamedContext {
            name: TOKEN_CONTEXT.to_owned(),
            context: Some(ContextEntry {
                cluster: Some(TOKEN_CLUSTER.to_owned()),
                user: Some(TOKEN_USER.to_owned()),
                namespace: Some("default".to_owned()),
            }),
        }]),
        current_context: Some(TOKEN_CONTEXT.to_owned()),
    };
    serde_yaml::to_string(&config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
apiVersion: v1
kind: Config
clusters:
- name: prod
  cluster:
    server: https://10.0.0.1:6443
    certificate-authority-data: LS0tLS1CRUdJTg==
- name: staging
  cluster:
    server: https://10.0.0.2:6443
contexts:
- name: prod-admin
  context:
    cluster: prod
    user: admin
users:
- name: admin
  user:
    client-certificate-data: LS0t
current-context: prod-admin
";

    #[test]
    fn inspect_extracts_first_server_and_context_cluster() {
        let summary = inspect_kubeconfig(SAMPLE).unwrap();
        assert_eq!(summary.api_server, "https://10.0.0.1:6443");
        assert_eq!(summary.cluster_name.as_deref(), Some("prod"));
    }

    #[test]
    fn inspect_rejects_missing_clusters() {
        let err = inspect_kubeconfig("apiVersion: v1\nkind: Config\n").unwrap_err();
        assert!(err.contains("no clusters"));
    }

    #[test]
    fn inspect_rejects_missing_api_version() {
        let err = inspect_kubeconfig("clusters:\n- name: a\n  cluster:\n    server: https://x\n")
            .unwrap_err();
        assert!(err.contains("apiVersion"));
    }

    #[test]
    fn inspect_rejects_cluster_without_server() {
        let err = inspect_kubeconfig("apiVersion: v1\nclusters:\n- name: a\n  cluster: {}\n")
            .unwrap_err();
        assert!(err.contains("server"));
    }

    #[test]
    fn inspect_rejects_non_yaml() {
        assert!(inspect_kubeconfig("clusters: [unclosed").is_err());
    }

    #[test]
    fn http_url_check() {
        assert!(is_http_url("https://10.0.0.5:6443"));
        assert!(is_http_url("http://localhost:8080"));
        assert!(!is_http_url("https://"));
        assert!(!is_http_url("ftp://host"));
        assert!(!is_http_url("10.0.0.5:6443"));
    }

    #[test]
    fn token_kubeconfig_verifies_tls_by_default() {
        let yaml = token_kubeconfig("abcdefghij", "https://10.0.0.5:6443", TlsPolicy::Verify)
            .unwrap();
        let config = Kubeconfig::parse(&yaml).unwrap();
        assert_eq!(config.first_server(), Some("https://10.0.0.5:6443"));
        assert_eq!(config.current_cluster_name(), Some(TOKEN_CLUSTER));
        assert!(!yaml.contains("insecure-skip-tls-verify"));

        let users = config.users.unwrap();
        assert_eq!(users[0].user.as_ref().unwrap().token.as_deref(), Some("abcdefghij"));
    }

    #[test]
    fn token_kubeconfig_skip_verify_only_for_https() {
        let https = token_kubeconfig("t0k3n-value", "https://h:6443", TlsPolicy::InsecureSkipVerify)
            .unwrap();
        assert!(https.contains("insecure-skip-tls-verify: true"));

        let http = token_kubeconfig("t0k3n-value", "http://h:8080", TlsPolicy::InsecureSkipVerify)
            .unwrap();
        assert!(!http.contains("insecure-skip-tls-verify"));
    }

    #[test]
    fn user_entry_debug_redacts_token() {
        let entry = UserEntry {
            token: Some("super-secret-token".to_owned()),
        };
        assert!(!format!("{entry:?}").contains("super-secret-token"));
    }
}
