//! HTTP error types for the Kubeward server.
//!
//! Maps domain errors from `kubeward-core` into HTTP responses. Every
//! variant produces a JSON body with a machine-readable `error` field and a
//! human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{debug, error};

use kubeward_core::{QueryError, RegistryError, SecretError};

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Missing or malformed caller identity.
    Unauthorized(String),
    /// Caller identity is fine but the operation is not allowed.
    Forbidden(String),
    /// Requested resource not found.
    NotFound(String),
    /// Client sent invalid input.
    BadRequest(String),
    /// Name already taken.
    Conflict(String),
    /// A stored credential or secret cannot be decrypted with the active
    /// key.
    CredentialsUnavailable(String),
    /// The cluster's API server could not be queried. Only the failure
    /// class reaches the client.
    Upstream(QueryError),
    /// Internal server error. The detail is logged, not returned.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::CredentialsUnavailable(msg) => {
                (StatusCode::CONFLICT, "credentials_unavailable", msg)
            }
            Self::Upstream(err) => {
                debug!(code = err.code(), error = %err, "upstream query failed");
                (
                    StatusCode::BAD_GATEWAY,
                    err.code(),
                    err.public_message().to_owned(),
                )
            }
            Self::Internal(detail) => {
                error!(error = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_owned(),
                )
            }
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Validation { .. } => Self::BadRequest(err.to_string()),
            RegistryError::Conflict { .. } => Self::Conflict(err.to_string()),
            RegistryError::NotFound { .. } => Self::NotFound(err.to_string()),
            RegistryError::CredentialsUnavailable { .. } => {
                Self::CredentialsUnavailable(err.to_string())
            }
            RegistryError::Crypto(_) | RegistryError::Corrupt { .. } | RegistryError::Storage(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<SecretError> for AppError {
    fn from(err: SecretError) -> Self {
        match err {
            SecretError::Validation { .. } => Self::BadRequest(err.to_string()),
            SecretError::Conflict { .. } => Self::Conflict(err.to_string()),
            SecretError::NotFound { .. } => Self::NotFound(err.to_string()),
            SecretError::Unreadable { .. } => Self::CredentialsUnavailable(err.to_string()),
            SecretError::Crypto(_) | SecretError::Corrupt { .. } | SecretError::Storage(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        Self::Upstream(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_errors_map_to_status_codes() {
        let cases = [
            (
                RegistryError::Validation {
                    reason: "x".to_owned(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                RegistryError::Conflict {
                    name: "prod".to_owned(),
                },
                StatusCode::CONFLICT,
            ),
            (
                RegistryError::NotFound { id: "1".to_owned() },
                StatusCode::NOT_FOUND,
            ),
            (
                RegistryError::CredentialsUnavailable { id: "1".to_owned() },
                StatusCode::CONFLICT,
            ),
            (
                RegistryError::Corrupt {
                    key: "clusters/a/b".to_owned(),
                    reason: "eof".to_owned(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn secret_errors_map_to_status_codes() {
        let cases = [
            (
                SecretError::Conflict {
                    kind: "ssh key",
                    name: "deploy".to_owned(),
                },
                StatusCode::CONFLICT,
            ),
            (
                SecretError::NotFound {
                    kind: "credential",
                    id: "1".to_owned(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                SecretError::Unreadable {
                    kind: "credential",
                    id: "1".to_owned(),
                },
                StatusCode::CONFLICT,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn query_errors_are_bad_gateway_without_raw_diagnostics() {
        let response = AppError::from(QueryError::Auth {
            reason: "token sa-deploy-7f3c rejected by 10.0.0.5".to_owned(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        let body = String::from_utf8_lossy(&bytes);
        assert!(body.contains("auth_error"), "{body}");
        assert!(body.contains("rejected the cluster credentials"), "{body}");
        assert!(!body.contains("sa-deploy-7f3c"), "{body}");
        assert!(!body.contains("10.0.0.5"), "{body}");
    }
}
