//! Secret routes: `/v1/ssh-keys/*` and `/v1/credentials/*`
//!
//! Listings and create responses carry summaries only. The decrypted
//! private key, passphrase, username or password is returned by the
//! per-record `GET`, and only to the owner.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use kubeward_core::secrets::{
    CredentialKind, CredentialMaterial, CredentialSummary, NewCredential, NewSshKey, SshKeyMaterial,
    SshKeySummary,
};

use crate::error::AppError;
use crate::middleware::UserContext;
use crate::state::AppState;

/// Build the `/v1/ssh-keys` router.
pub fn ssh_key_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_ssh_keys).post(create_ssh_key))
        .route("/{id}", get(read_ssh_key).delete(remove_ssh_key))
}

/// Build the `/v1/credentials` router.
pub fn credential_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_credentials).post(create_credential))
        .route("/{id}", get(read_credential).delete(remove_credential))
}

// ── Response types ───────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SshKeyResponse {
    pub id: Uuid,
    pub name: String,
    pub public_key: String,
    pub private_key: String,
    pub passphrase: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<SshKeyMaterial> for SshKeyResponse {
    fn from(material: SshKeyMaterial) -> Self {
        Self {
            id: material.summary.id,
            name: material.summary.name,
            public_key: material.summary.public_key,
            private_key: material.private_key.as_str().to_owned(),
            passphrase: material.passphrase.map(|p| p.as_str().to_owned()),
            created_at: material.summary.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct CredentialResponse {
    pub id: Uuid,
    pub name: String,
    pub credential_type: CredentialKind,
    pub username: Option<String>,
    pub password: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CredentialMaterial> for CredentialResponse {
    fn from(material: CredentialMaterial) -> Self {
        Self {
            id: material.summary.id,
            name: material.summary.name,
            credential_type: material.summary.credential_type,
            username: material.username.map(|u| u.as_str().to_owned()),
            password: material.password.map(|p| p.as_str().to_owned()),
            created_at: material.summary.created_at,
        }
    }
}

// ── SSH key handlers ─────────────────────────────────────────────────

async fn list_ssh_keys(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
) -> Result<Json<Vec<SshKeySummary>>, AppError> {
    Ok(Json(state.secrets.list_ssh_keys(user.user_id).await?))
}

async fn create_ssh_key(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Json(body): Json<NewSshKey>,
) -> Result<(StatusCode, Json<SshKeySummary>), AppError> {
    let summary = state.secrets.create_ssh_key(user.user_id, body).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn read_ssh_key(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<SshKeyResponse>, AppError> {
    Ok(Json(state.secrets.ssh_key(user.user_id, id).await?.into()))
}

async fn remove_ssh_key(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.secrets.delete_ssh_key(user.user_id, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("ssh key not found: {id}")))
    }
}

// ── Credential handlers ──────────────────────────────────────────────

async fn list_credentials(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
) -> Result<Json<Vec<CredentialSummary>>, AppError> {
    Ok(Json(state.secrets.list_credentials(user.user_id).await?))
}

async fn create_credential(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Json(body): Json<NewCredential>,
) -> Result<(StatusCode, Json<CredentialSummary>), AppError> {
    let summary = state.secrets.create_credential(user.user_id, body).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn read_credential(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<CredentialResponse>, AppError> {
    Ok(Json(state.secrets.credential(user.user_id, id).await?.into()))
}

async fn remove_credential(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.secrets.delete_credential(user.user_id, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("credential not found: {id}")))
    }
}
