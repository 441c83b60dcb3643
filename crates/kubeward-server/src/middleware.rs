//! Caller identity middleware.
//!
//! Authentication happens at the gateway in front of this server, which
//! forwards the caller's user id in `X-User-Id`. This layer parses it and
//! injects a [`UserContext`] for handlers. Every cluster operation is scoped
//! to that user.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::error::AppError;

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity injected into request extensions.
#[derive(Debug, Clone, Copy)]
pub struct UserContext {
    pub user_id: Uuid,
}

/// Reject requests without a valid `X-User-Id`.
pub async fn identity_middleware(mut req: Request, next: Next) -> Response {
    let header = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    let Some(raw) = header else {
        return AppError::Unauthorized("missing X-User-Id header".to_owned()).into_response();
    };
    let Ok(user_id) = Uuid::parse_str(raw) else {
        return AppError::Unauthorized("X-User-Id is not a valid UUID".to_owned()).into_response();
    };

    req.extensions_mut().insert(UserContext { user_id });
    next.run(req).await
}
