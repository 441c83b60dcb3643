//! Kubeward HTTP server.
//!
//! Wires the core registry, storage backend, and routes into an Axum app.
//! [`build_router`] is public so integration tests can drive the full stack
//! without binding a socket.

pub mod config;
pub mod error;
pub mod hardening;
pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::middleware as axum_mw;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::{USER_ID_HEADER, identity_middleware};
use crate::routes::sys::ADMIN_TOKEN_HEADER;
use crate::state::AppState;

/// Assemble the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Everything user-scoped goes through the identity layer.
    let identified_routes = Router::new()
        .nest("/v1/clusters", routes::clusters::router())
        .nest("/v1/ssh-keys", routes::secrets::ssh_key_router())
        .nest("/v1/credentials", routes::secrets::credential_router())
        .nest("/v1/sys/key", routes::sys::key_router())
        .route_layer(axum_mw::from_fn(identity_middleware));

    let sys_routes = Router::new().nest("/v1/sys", routes::sys::router());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(USER_ID_HEADER),
            HeaderName::from_static(ADMIN_TOKEN_HEADER),
        ]);

    Router::new()
        .merge(sys_routes)
        .merge(identified_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}
