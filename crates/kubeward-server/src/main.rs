//! Kubeward server entry point.
//!
//! Resolves the master key, opens storage, builds the registry, and serves
//! the API until SIGINT or SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use kubeward_core::keyring::KeyOrigin;
use kubeward_core::kube::ClusterQueryEngine;
use kubeward_core::{ClusterRegistry, EncryptionCodec, SecretStore};
use kubeward_storage::{MemoryBackend, StorageBackend};

use kubeward_server::build_router;
use kubeward_server::config::{ServerConfig, StorageBackendType};
use kubeward_server::hardening;
use kubeward_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    // Runs before logging is initialized, so warnings go to stderr.
    apply_hardening(&config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, "Kubeward starting");

    let state = build_app_state(&config)?;
    let app = build_router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "Kubeward server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Kubeward server stopped");
    Ok(())
}

fn build_app_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let resolved = config
        .key_provider
        .resolve()
        .context("failed to resolve the master encryption key")?;
    if let KeyOrigin::Generated { persisted_to } = &resolved.origin {
        if persisted_to.is_empty() {
            warn!("generated master key was not persisted; credentials will not survive a restart");
        }
    }
    info!(
        origin = %resolved.origin,
        fingerprint = %resolved.key.fingerprint(),
        "master key loaded"
    );
    let codec = Arc::new(EncryptionCodec::new(resolved.key));

    let storage: Arc<dyn StorageBackend> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "redb-backend")]
        StorageBackendType::Redb { path } => {
            info!(path = %path.display(), "using redb storage");
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            Arc::new(
                kubeward_storage::RedbBackend::open(path)
                    .context("failed to open redb storage")?,
            )
        }
        #[cfg(not(feature = "redb-backend"))]
        StorageBackendType::Redb { .. } => {
            anyhow::bail!("redb backend requested but feature 'redb-backend' is not enabled");
        }
    };

    let engine = ClusterQueryEngine::kubectl(&config.kubectl, config.query_timeout, config.tls_policy);
    info!(
        kubectl = %config.kubectl.display(),
        timeout_secs = config.query_timeout.as_secs(),
        tls = ?config.tls_policy,
        "cluster query engine ready"
    );

    let secrets = Arc::new(SecretStore::new(Arc::clone(&storage), Arc::clone(&codec)));
    let registry = Arc::new(ClusterRegistry::new(storage, codec, engine));
    if config.admin_token.is_none() {
        info!("KUBEWARD_ADMIN_TOKEN not set; key rotation over the API is disabled");
    }
    Ok(Arc::new(AppState::new(
        registry,
        secrets,
        config.admin_token.as_deref(),
    )))
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}

/// Uses `eprintln` because structured logging is not yet available.
#[allow(clippy::print_stderr)]
fn apply_hardening(config: &ServerConfig) {
    if let Err(e) = hardening::disable_core_dumps() {
        eprintln!("WARNING: failed to disable core dumps: {e}");
    }

    if config.disable_mlock {
        eprintln!("WARNING: mlock disabled via KUBEWARD_DISABLE_MLOCK; keys may be swapped to disk");
    } else if let Err(e) = hardening::lock_memory() {
        eprintln!("WARNING: failed to lock memory: {e} (set KUBEWARD_DISABLE_MLOCK=true for dev)");
    }
}
