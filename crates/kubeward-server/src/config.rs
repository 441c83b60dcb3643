//! Server configuration for Kubeward.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `KUBEWARD_*` environment variables.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use kubeward_core::keyring::KeyProviderConfig;
use kubeward_core::kube::{DEFAULT_QUERY_TIMEOUT, TlsPolicy};

const DEFAULT_PORT: u16 = 8300;
const DEFAULT_SECRET_FILE: &str = "/run/secrets/encryption_key";
const DEFAULT_KEY_PATHS: &str = "./encryption.key:./data/encryption.key";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Where the master key is looked up, in priority order.
    pub key_provider: KeyProviderConfig,
    /// `kubectl` binary used for node queries.
    pub kubectl: PathBuf,
    /// Upper bound for one node query.
    pub query_timeout: Duration,
    /// TLS verification policy for token-authenticated clusters.
    pub tls_policy: TlsPolicy,
    /// When set, `POST /v1/sys/key/rotate` requires a matching `X-Admin-Token`.
    pub admin_token: Option<String>,
    /// Whether to skip `mlock` (for development without root/`CAP_IPC_LOCK`).
    pub disable_mlock: bool,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("storage_backend", &self.storage_backend)
            .field("log_level", &self.log_level)
            .field("key_provider", &self.key_provider)
            .field("kubectl", &self.kubectl)
            .field("query_timeout", &self.query_timeout)
            .field("tls_policy", &self.tls_policy)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("disable_mlock", &self.disable_mlock)
            .finish()
    }
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// Redb persistent storage.
    Redb { path: PathBuf },
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT`: port to bind on, binds to `0.0.0.0`
    /// - `KUBEWARD_BIND_ADDR`: full bind address (overrides `PORT`, default `127.0.0.1:8300`)
    /// - `KUBEWARD_STORAGE`: `memory` or `redb` (default `memory`)
    /// - `KUBEWARD_STORAGE_PATH`: redb file (default `./data/kubeward.redb`)
    /// - `KUBEWARD_LOG_LEVEL`: log filter (default `info`)
    /// - `KUBEWARD_ENCRYPTION_KEY`, then `ENCRYPTION_KEY`: the master key itself
    /// - `KUBEWARD_KEY_SECRET_FILE`: mounted secret (default `/run/secrets/encryption_key`)
    /// - `KUBEWARD_KEY_PATHS`: colon-separated key files, also where a generated key is written
    /// - `KUBEWARD_KUBECTL`: kubectl binary (default `kubectl`)
    /// - `KUBEWARD_QUERY_TIMEOUT_SECS`: node query timeout (default `30`)
    /// - `KUBEWARD_INSECURE_SKIP_TLS_VERIFY`: skip TLS checks for token clusters (default `false`)
    /// - `KUBEWARD_ADMIN_TOKEN`: guards key rotation (optional)
    /// - `KUBEWARD_DISABLE_MLOCK`: skip `mlockall` for dev environments (default `false`)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    #[must_use]
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        // Priority: KUBEWARD_BIND_ADDR > PORT > default 127.0.0.1:8300
        let bind_addr = if let Some(addr) = var("KUBEWARD_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
        } else if let Some(port_str) = var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(DEFAULT_PORT);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
        };

        let storage_path = var("KUBEWARD_STORAGE_PATH")
            .map_or_else(|| PathBuf::from("./data/kubeward.redb"), PathBuf::from);

        let storage_backend = match var("KUBEWARD_STORAGE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "redb" => StorageBackendType::Redb { path: storage_path },
            _ => StorageBackendType::Memory,
        };

        let log_level = var("KUBEWARD_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());

        let explicit = ["KUBEWARD_ENCRYPTION_KEY", "ENCRYPTION_KEY"]
            .into_iter()
            .find_map(|name| {
                var(name)
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (name.to_owned(), v))
            });
        let secret_file = PathBuf::from(
            var("KUBEWARD_KEY_SECRET_FILE").unwrap_or_else(|| DEFAULT_SECRET_FILE.to_owned()),
        );
        let local_paths = var("KUBEWARD_KEY_PATHS")
            .unwrap_or_else(|| DEFAULT_KEY_PATHS.to_owned())
            .split(':')
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .collect();
        let key_provider = KeyProviderConfig {
            explicit,
            secret_file: Some(secret_file),
            local_paths,
            allow_generate: true,
        };

        let kubectl = var("KUBEWARD_KUBECTL").map_or_else(|| PathBuf::from("kubectl"), PathBuf::from);

        let query_timeout = var("KUBEWARD_QUERY_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_QUERY_TIMEOUT, Duration::from_secs);

        let tls_policy = if flag(var("KUBEWARD_INSECURE_SKIP_TLS_VERIFY")) {
            TlsPolicy::InsecureSkipVerify
        } else {
            TlsPolicy::Verify
        };

        let admin_token = var("KUBEWARD_ADMIN_TOKEN").filter(|t| !t.is_empty());
        let disable_mlock = flag(var("KUBEWARD_DISABLE_MLOCK"));

        Self {
            bind_addr,
            storage_backend,
            log_level,
            key_provider,
            kubectl,
            query_timeout,
            tls_policy,
            admin_token,
            disable_mlock,
        }
    }
}

fn flag(value: Option<String>) -> bool {
    value.is_some_and(|v| v == "true" || v == "1")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ServerConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]);
        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 8300)));
        assert_eq!(config.storage_backend, StorageBackendType::Memory);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.query_timeout, DEFAULT_QUERY_TIMEOUT);
        assert_eq!(config.tls_policy, TlsPolicy::Verify);
        assert_eq!(config.kubectl, PathBuf::from("kubectl"));
        assert!(config.admin_token.is_none());
        assert!(!config.disable_mlock);
        assert!(config.key_provider.explicit.is_none());
        assert_eq!(
            config.key_provider.local_paths,
            vec![
                PathBuf::from("./encryption.key"),
                PathBuf::from("./data/encryption.key")
            ]
        );
        assert!(config.key_provider.allow_generate);
    }

    #[test]
    fn bind_addr_beats_port() {
        let config = load(&[("KUBEWARD_BIND_ADDR", "10.1.2.3:9000"), ("PORT", "7000")]);
        assert_eq!(config.bind_addr, SocketAddr::from(([10, 1, 2, 3], 9000)));

        let config = load(&[("PORT", "7000")]);
        assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 7000)));
    }

    #[test]
    fn prefixed_key_variable_wins_and_blank_is_skipped() {
        let config = load(&[
            ("KUBEWARD_ENCRYPTION_KEY", "   "),
            ("ENCRYPTION_KEY", "fallback-value"),
        ]);
        let (name, value) = config.key_provider.explicit.unwrap_or_default();
        assert_eq!(name, "ENCRYPTION_KEY");
        assert_eq!(value, "fallback-value");

        let config = load(&[
            ("KUBEWARD_ENCRYPTION_KEY", "primary"),
            ("ENCRYPTION_KEY", "fallback-value"),
        ]);
        let (name, _) = config.key_provider.explicit.unwrap_or_default();
        assert_eq!(name, "KUBEWARD_ENCRYPTION_KEY");
    }

    #[test]
    fn redb_storage_and_query_settings() {
        let config = load(&[
            ("KUBEWARD_STORAGE", "REDB"),
            ("KUBEWARD_STORAGE_PATH", "/var/lib/kubeward/db.redb"),
            ("KUBEWARD_QUERY_TIMEOUT_SECS", "5"),
            ("KUBEWARD_INSECURE_SKIP_TLS_VERIFY", "1"),
            ("KUBEWARD_KEY_PATHS", "/etc/kubeward/key::/tmp/key"),
        ]);
        assert_eq!(
            config.storage_backend,
            StorageBackendType::Redb {
                path: PathBuf::from("/var/lib/kubeward/db.redb")
            }
        );
        assert_eq!(config.query_timeout, Duration::from_secs(5));
        assert_eq!(config.tls_policy, TlsPolicy::InsecureSkipVerify);
        assert_eq!(config.key_provider.local_paths.len(), 2);
    }

    #[test]
    fn debug_redacts_admin_token() {
        let config = load(&[("KUBEWARD_ADMIN_TOKEN", "s3cret-admin-token")]);
        assert_eq!(config.admin_token.as_deref(), Some("s3cret-admin-token"));

        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cret-admin-token"), "{debug}");
        assert!(debug.contains("<redacted>"), "{debug}");
    }

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let config = load(&[("KUBEWARD_QUERY_TIMEOUT_SECS", "0")]);
        assert_eq!(config.query_timeout, DEFAULT_QUERY_TIMEOUT);
    }
}
