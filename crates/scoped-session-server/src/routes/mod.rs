//! API route modules.

pub mod health;
pub mod notes;

use axum::{middleware, routing::get, Router};
use scoped_session::web::app_context_middleware;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/health", get(health::health_check));

    let api_routes = Router::new().merge(notes::router());

    // Every request runs in its own application context
    Router::new()
        .merge(public_routes)
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.app),
            app_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
