//! Health check endpoint.

use axum::{extract::State, Json};
use scoped_session::{current_session, AppContext, SqliteSession};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub scope_strategy: String,
    pub components: HealthComponents,
    pub metrics: HealthMetrics,
}

#[derive(Serialize)]
pub struct HealthComponents {
    pub database: bool,
}

#[derive(Serialize)]
pub struct HealthMetrics {
    /// Scopes holding a session, this request included
    pub active_scopes: usize,
}

/// Health check endpoint
pub async fn health_check(
    State(state): State<Arc<AppState>>,
    ctx: AppContext,
) -> Json<HealthStatus> {
    // Check database through this request's own session
    let db_healthy = current_session::<SqliteSession>(Some(&ctx))
        .and_then(|session| session.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))
        .map(|value| value == Some(1))
        .unwrap_or(false);

    let status = if db_healthy { "healthy" } else { "degraded" };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        scope_strategy: state.config.scope_strategy.to_string(),
        components: HealthComponents {
            database: db_healthy,
        },
        metrics: HealthMetrics {
            active_scopes: state.sessions.active_scopes(),
        },
    })
}
