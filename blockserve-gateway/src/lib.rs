//! blockserve gateway library
//!
//! The HTTP data plane: streams whole files, byte ranges, raw blocks and
//! pre-built archives to clients, one streaming session per connection at
//! a time.

pub mod access;
pub mod archive;
pub mod composer;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod metrics;
pub mod session;
pub mod state;
pub mod usage;

#[cfg(test)]
mod testing;

pub use archive::{ArchiveProvider, ArchiveRegistry};
pub use config::GatewayConfig;
pub use connection::ClientConnection;
pub use error::AccessError;
pub use state::AppState;
pub use usage::{MemoryUsageSink, TracingUsageSink, UsageEvent, UsageKind, UsageSink};

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

async fn health() -> &'static str {
    "OK"
}

async fn version() -> &'static str {
    concat!("blockserve-gateway/", env!("CARGO_PKG_VERSION"))
}

/// Health and version endpoints
pub fn ops_routes<S: Clone + Send + Sync + 'static>() -> Router<S> {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
}

/// Build the gateway router.
///
/// Delivery routes set their own CORS headers, so the CORS layer only
/// covers the operational endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(access::routes())
        .merge(ops_routes())
        .layer(middleware::from_fn(connection::pause_while_streaming))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
