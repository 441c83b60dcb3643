//! System routes: `/v1/sys/*`
//!
//! Liveness plus master-key inspection and rotation. Rotation is disabled
//! unless an admin token is configured.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use tower::limit::ConcurrencyLimitLayer;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use kubeward_core::registry::MigrationReport;

use crate::error::AppError;
use crate::middleware::UserContext;
use crate::state::{self, AppState};

/// Header carrying the admin token for key rotation.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Unauthenticated `/v1/sys` routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

/// `/v1/sys/key` routes; mounted behind the identity middleware.
///
/// Rotations run one at a time: each snapshots the outgoing key and sweeps
/// the whole store.
pub fn key_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(key_status))
        .route("/rotate", post(rotate).layer(ConcurrencyLimitLayer::new(1)))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct KeyStatusResponse {
    pub fingerprint: String,
}

/// Request body for `POST /v1/sys/key/rotate`.
#[derive(Deserialize)]
pub struct RotateRequest {
    /// The new key, 44-character base64-url.
    pub key: String,
    /// Re-encrypt clusters, SSH keys and credentials from the outgoing key.
    #[serde(default)]
    pub reencrypt: bool,
}

impl std::fmt::Debug for RotateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotateRequest")
            .field("reencrypt", &self.reencrypt)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
pub struct RotateResponse {
    pub rotated: bool,
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration: Option<RotationMigration>,
}

/// Re-encryption results per store.
#[derive(Debug, Serialize)]
pub struct RotationMigration {
    pub clusters: MigrationReport,
    pub secrets: MigrationReport,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn key_status(State(state): State<Arc<AppState>>) -> Json<KeyStatusResponse> {
    Json(KeyStatusResponse {
        fingerprint: state.codec.fingerprint(),
    })
}

/// Swap the active key. A rejected key leaves the old one active and
/// answers `rotated: false`.
async fn rotate(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    headers: HeaderMap,
    Json(body): Json<RotateRequest>,
) -> Result<Json<RotateResponse>, AppError> {
    let Some(expected) = state.admin_token_digest else {
        return Err(AppError::Forbidden(
            "key rotation is disabled; set KUBEWARD_ADMIN_TOKEN to enable it".to_owned(),
        ));
    };
    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(state::digest);
    if presented != Some(expected) {
        warn!(user_id = %user.user_id, "key rotation refused: bad admin token");
        return Err(AppError::Forbidden("invalid admin token".to_owned()));
    }

    let previous = state.codec.snapshot();
    if !state.codec.rotate_encoded(&body.key) {
        return Ok(Json(RotateResponse {
            rotated: false,
            fingerprint: state.codec.fingerprint(),
            migration: None,
        }));
    }
    info!(
        user_id = %user.user_id,
        from = %previous.fingerprint(),
        to = %state.codec.fingerprint(),
        "master key rotated over the API; persist the new key before restarting"
    );

    let migration = if body.reencrypt {
        Some(RotationMigration {
            clusters: state.registry.reencrypt_all(&previous).await?,
            secrets: state.secrets.reencrypt_all(&previous).await?,
        })
    } else {
        None
    };

    Ok(Json(RotateResponse {
        rotated: true,
        fingerprint: state.codec.fingerprint(),
        migration,
    }))
}
