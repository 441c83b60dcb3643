//! Cluster routes: `/v1/clusters/*`
//!
//! All handlers run behind the identity middleware and only see the
//! caller's own clusters. Responses carry [`ClusterView`], never the
//! encrypted credential.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kubeward_core::kube::NodeInfo;
use kubeward_core::registry::{
    self, ClusterDiagnostics, ClusterHealthReport, ClusterUpdate, CredentialValidation, NodeReport,
    RegisterRequest,
};
use kubeward_core::{AuthType, ClusterRecord, ClusterStatus};

use crate::error::AppError;
use crate::middleware::UserContext;
use crate::state::AppState;

/// Build the `/v1/clusters` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list).post(register))
        .route("/validate", post(validate))
        .route("/{id}", get(read).patch(update).delete(remove))
        .route("/{id}/nodes", get(nodes))
        .route("/{id}/refresh", post(refresh))
        .route("/{id}/health", get(health))
        .route("/{id}/kubeconfig", get(kubeconfig))
        .route("/{id}/diagnostics", get(diagnostics))
        .route("/{id}/api-server", put(set_api_server))
        .route("/{id}/credentials", post(migrate_credentials))
}

// ── Request / Response types ─────────────────────────────────────────

/// A stored cluster as clients see it.
#[derive(Debug, Serialize)]
pub struct ClusterView {
    pub id: Uuid,
    pub name: String,
    pub auth_type: AuthType,
    pub api_server: Option<String>,
    pub master_count: u32,
    pub worker_count: u32,
    pub status: ClusterStatus,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ClusterRecord> for ClusterView {
    fn from(record: ClusterRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            auth_type: record.auth_type,
            api_server: record.api_server,
            master_count: record.master_count,
            worker_count: record.worker_count,
            status: record.status,
            description: record.description,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Request body for `POST /v1/clusters/validate`.
#[derive(Deserialize)]
pub struct ValidateRequest {
    pub auth_data: String,
    pub auth_type: AuthType,
}

/// Request body for `PUT /v1/clusters/{id}/api-server`.
#[derive(Debug, Deserialize)]
pub struct ApiServerRequest {
    pub api_server: String,
}

/// Request body for `POST /v1/clusters/{id}/credentials`.
#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub auth_data: String,
}

#[derive(Debug, Serialize)]
pub struct QueryFailure {
    pub code: &'static str,
    pub message: String,
}

/// Node state for one cluster. `live: false` means the query failed and
/// the counts are the last stored ones.
#[derive(Debug, Serialize)]
pub struct NodesResponse {
    pub cluster_id: Uuid,
    pub live: bool,
    pub total_nodes: u32,
    pub master_nodes: u32,
    pub worker_nodes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_nodes: Option<u32>,
    pub nodes: Vec<NodeInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryFailure>,
}

impl NodesResponse {
    fn from_report(cluster_id: Uuid, report: NodeReport) -> Result<Self, AppError> {
        match report {
            NodeReport::Live(snapshot) => Ok(Self {
                cluster_id,
                live: true,
                total_nodes: snapshot.summary.total,
                master_nodes: snapshot.summary.masters,
                worker_nodes: snapshot.summary.workers,
                ready_nodes: Some(snapshot.summary.ready),
                nodes: snapshot.nodes,
                error: None,
            }),
            NodeReport::Stale {
                masters,
                workers,
                error,
            } => Ok(Self {
                cluster_id,
                live: false,
                total_nodes: masters.saturating_add(workers),
                master_nodes: masters,
                worker_nodes: workers,
                ready_nodes: None,
                nodes: Vec::new(),
                error: Some(QueryFailure {
                    code: error.code(),
                    message: error.public_message().to_owned(),
                }),
            }),
            NodeReport::CredentialsUnavailable => Err(credentials_unavailable(cluster_id)),
        }
    }
}

fn credentials_unavailable(id: Uuid) -> AppError {
    AppError::CredentialsUnavailable(format!(
        "credentials for cluster {id} cannot be decrypted with the active key; \
         re-register the cluster or submit new credentials"
    ))
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn list(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
) -> Result<Json<Vec<ClusterView>>, AppError> {
    let records = state.registry.list(user.user_id).await?;
    Ok(Json(records.into_iter().map(ClusterView::from).collect()))
}

/// Register a cluster. Node counts come from one best-effort query and may
/// still be zero in the response.
async fn register(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ClusterView>), AppError> {
    let record = state.registry.register(user.user_id, body).await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// Pre-flight credential check. Nothing is stored.
async fn validate(Json(body): Json<ValidateRequest>) -> Json<CredentialValidation> {
    Json(registry::validate_credentials(&body.auth_data, body.auth_type))
}

async fn read(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClusterView>, AppError> {
    Ok(Json(state.registry.get(user.user_id, id).await?.into()))
}

async fn update(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<ClusterUpdate>,
) -> Result<Json<ClusterView>, AppError> {
    Ok(Json(state.registry.update(user.user_id, id, body).await?.into()))
}

async fn remove(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.registry.delete(user.user_id, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("cluster not found: {id}")))
    }
}

/// Live node list, degrading to stored counts when the query fails.
async fn nodes(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<NodesResponse>, AppError> {
    let report = state.registry.node_summary(user.user_id, id).await?;
    NodesResponse::from_report(id, report).map(Json)
}

/// Explicit refresh. Unlike `nodes`, a failed query is an error (502).
async fn refresh(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<NodesResponse>, AppError> {
    match state.registry.refresh(user.user_id, id).await? {
        NodeReport::Stale { error, .. } => Err(error.into()),
        report => NodesResponse::from_report(id, report).map(Json),
    }
}

async fn health(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClusterHealthReport>, AppError> {
    Ok(Json(state.registry.health(user.user_id, id).await?))
}

/// The credential as a kubeconfig document, served as YAML.
async fn kubeconfig(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let document = state.registry.kubeconfig(user.user_id, id).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/yaml")],
        document.as_str().to_owned(),
    ))
}

async fn diagnostics(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClusterDiagnostics>, AppError> {
    Ok(Json(state.registry.diagnostics(user.user_id, id).await?))
}

async fn set_api_server(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<ApiServerRequest>,
) -> Result<Json<ClusterView>, AppError> {
    let record = state
        .registry
        .set_api_server(user.user_id, id, &body.api_server)
        .await?;
    Ok(Json(record.into()))
}

/// Replace the stored credential, sealing it under the active key.
async fn migrate_credentials(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<CredentialsRequest>,
) -> Result<Json<ClusterView>, AppError> {
    let record = state
        .registry
        .migrate_credentials(user.user_id, id, &body.auth_data)
        .await?;
    Ok(Json(record.into()))
}
