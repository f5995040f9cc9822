//! HTTP routing.
//!
//! Every registered route is answered by one fallback handler that looks
//! the request path up in the registry, so arbitrary prefixes never have to
//! be expressed in the router's path syntax.

mod serve;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the router serving all registered sources.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .fallback(serve::serve_source)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
