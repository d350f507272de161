//! HTTP router: wires the direct invocation endpoint, the invocation history
//! read surface, the gateway dispatcher, and the owner-scoped stats
//! aggregate into one axum app.

mod handlers;

use std::sync::Arc;

use axum::routing::{any, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{require_bearer, JwksCache};
use crate::config::Configuration;
use crate::database::Database;
use crate::gateway::RouteCache;
use crate::invoke::InvocationEngine;

/// State shared across every handler. Built once in `cmd::root::run` and
/// wrapped in an `Arc` so cloning it per-request is cheap.
pub struct AppState {
    pub db: Arc<Database>,
    pub engine: Arc<InvocationEngine>,
    pub route_cache: RouteCache,
    pub config: Arc<Configuration>,
    pub jwks: JwksCache,
}

/// Builds the HTTP app: direct invocation, invocation history, gateway
/// dispatch, a health check carried alongside them, and the bearer-gated
/// aggregation endpoint.
pub fn build_router(state: Arc<AppState>) -> Router {
    let stats_routes = Router::new()
        .route("/stats", get(handlers::stats::handle))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_bearer,
        ));

    // The gateway's body size cap (spec.md §9 open question, decided in favor
    // of capping) is enforced here via `RequestBodyLimitLayer` rather than by
    // hand-checking `body.len()` in the handler, so oversized bodies are
    // rejected with 413 before the extractor even buffers them. Scoped to
    // just the gateway routes: direct invocation carries no such cap.
    let gateway_routes = Router::new()
        .route("/gateway/:slug", any(crate::gateway::dispatch::handle))
        .route("/gateway/:slug/*rest", any(crate::gateway::dispatch::handle))
        .layer(RequestBodyLimitLayer::new(
            state.config.gateway.max_body_size_bytes,
        ));

    Router::new()
        .route("/healthz", get(handlers::system::healthz))
        .route("/invoke/:function_id", post(handlers::invoke::handle))
        .route("/invocations", get(handlers::invocations::list))
        .nest("/api", stats_routes)
        .merge(gateway_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
