//! axum integration.
//!
//! `app_context_middleware` gives every request its own application context
//! and tears it down when the response is ready. Handlers pick up the
//! request's session with the [`CurrentSession`] extractor.
//!
//! ```rust,no_run
//! use axum::{middleware, routing::get, Router};
//! use scoped_session::web::app_context_middleware;
//! use scoped_session::{App, CurrentSession, ScopedSession, SqliteSession, SqliteSessionFactory};
//!
//! async fn handler(session: CurrentSession<SqliteSession>) -> String {
//!     session.id().to_string()
//! }
//!
//! let app = App::new("example");
//! ScopedSession::with_app(SqliteSessionFactory::new("example.db"), &app);
//!
//! let router: Router = Router::new()
//!     .route("/", get(handler))
//!     .layer(middleware::from_fn_with_state(app, app_context_middleware));
//! ```

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::error::Error as StdError;
use std::sync::Arc;
use tracing::error;

use crate::app::{App, AppContext};
use crate::current::CurrentSession;
use crate::error::Error;
use crate::scope::ScopeStrategy;
use crate::session::Session;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self {
            Error::Factory(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if self.is_integration_error() {
            error!("scoped session misconfigured: {}", self);
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });

        (status, body).into_response()
    }
}

/// Request middleware binding one application context to each request.
///
/// A 5xx response is reported to teardown hooks as a failure. If teardown
/// itself fails on an otherwise successful response, the failure replaces
/// the response.
///
/// Apps using the `thread` strategy are refused: the runtime interleaves many
/// requests on one worker thread, so they would all resolve the same key.
pub async fn app_context_middleware(
    State(app): State<Arc<App>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if app.strategy() == ScopeStrategy::Thread {
        return Error::ScopeUnavailable {
            strategy: ScopeStrategy::Thread,
        }
        .into_response();
    }

    let ctx = match app.app_context() {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };

    request.extensions_mut().insert(ctx.clone());
    let response = next.run(request).await;

    let status = response.status();
    let failure = status
        .is_server_error()
        .then(|| Error::Other(format!("request failed with status {}", status)));

    match ctx.pop(failure.as_ref().map(|e| e as &(dyn StdError + 'static))) {
        Ok(()) => response,
        Err(e) if failure.is_some() => {
            error!(context_id = %ctx.id(), "teardown failed after failed request: {}", e);
            response
        }
        Err(e) => {
            error!(context_id = %ctx.id(), "teardown failed: {}", e);
            e.into_response()
        }
    }
}

impl<St> FromRequestParts<St> for AppContext
where
    St: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AppContext>()
            .cloned()
            .ok_or(Error::NoActiveContext)
    }
}

impl<S, St> FromRequestParts<St> for CurrentSession<S>
where
    S: Session,
    St: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        CurrentSession::resolve(parts.extensions.get::<AppContext>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ScopedSession;
    use crate::session::testing::{Counters, CountingFactory, CountingSession};
    use axum::{middleware, routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn serial(a: CurrentSession<CountingSession>, b: CurrentSession<CountingSession>) -> String {
        assert!(a.is(&b));
        a.serial.to_string()
    }

    async fn fails(session: CurrentSession<CountingSession>) -> (StatusCode, String) {
        (StatusCode::INTERNAL_SERVER_ERROR, session.serial.to_string())
    }

    async fn context_id(ctx: AppContext) -> String {
        ctx.id().to_string()
    }

    async fn slow_serial(session: CurrentSession<CountingSession>) -> String {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        session.serial.to_string()
    }

    fn router(app: &Arc<App>) -> Router {
        Router::new()
            .route("/serial", get(serial))
            .route("/fails", get(fails))
            .route("/context", get(context_id))
            .route("/slow", get(slow_serial))
            .layer(middleware::from_fn_with_state(
                Arc::clone(app),
                app_context_middleware,
            ))
    }

    fn installed() -> (Arc<App>, Arc<Counters>) {
        let app = App::new("web-test");
        let (factory, counters) = CountingFactory::new();
        ScopedSession::with_app(factory, &app);
        (app, counters)
    }

    async fn get_body(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_each_request_gets_one_session() {
        let (app, counters) = installed();

        let (status, first) = get_body(router(&app), "/serial").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(counters.closed(), 1);

        let (_, second) = get_body(router(&app), "/serial").await;
        assert_ne!(first, second);
        assert_eq!(counters.created(), 2);
        assert_eq!(counters.closed(), 2);
    }

    #[tokio::test]
    async fn test_failed_request_still_disposes() {
        let (app, counters) = installed();

        let (status, _) = get_body(router(&app), "/fails").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(counters.created(), 1);
        assert_eq!(counters.closed(), 1);
    }

    #[tokio::test]
    async fn test_request_without_session_creates_none() {
        let (app, counters) = installed();

        let (status, _) = get_body(router(&app), "/context").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(counters.created(), 0);
    }

    #[tokio::test]
    async fn test_missing_middleware_is_no_active_context() {
        let router = Router::new().route("/serial", get(serial));

        let (status, body) = get_body(router, "/serial").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["code"], "NO_ACTIVE_CONTEXT");
    }

    #[tokio::test]
    async fn test_uninstalled_registry_is_not_initialized() {
        let app = App::new("bare");

        let (status, body) = get_body(router(&app), "/serial").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["code"], "NOT_INITIALIZED");
        assert!(json["error"].as_str().unwrap().contains("bare"));
    }

    #[tokio::test]
    async fn test_concurrent_requests_get_distinct_sessions() {
        let (app, counters) = installed();

        let ((_, a), (_, b)) = tokio::join!(
            get_body(router(&app), "/slow"),
            get_body(router(&app), "/slow")
        );

        assert_ne!(a, b);
        assert_eq!(counters.created(), 2);
        assert_eq!(counters.closed(), 2);
    }

    #[tokio::test]
    async fn test_thread_strategy_refused() {
        let app = App::with_strategy("web-test", ScopeStrategy::Thread);
        let (factory, counters) = CountingFactory::new();
        ScopedSession::with_app(factory, &app);

        let ((status_a, body_a), (status_b, _)) = tokio::join!(
            get_body(router(&app), "/slow"),
            get_body(router(&app), "/slow")
        );

        assert_eq!(status_a, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_b, StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_str(&body_a).unwrap();
        assert_eq!(json["code"], "SCOPE_UNAVAILABLE");
        assert_eq!(counters.created(), 0);
        assert_eq!(app.active_contexts(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_requests_in_one_task_do_not_share() {
        let app = App::with_strategy("web-test", ScopeStrategy::Task);
        let (factory, counters) = CountingFactory::new();
        ScopedSession::with_app(factory, &app);

        // Both requests are polled by this test's task, so they resolve one key
        let ((status_a, _), (status_b, _)) = tokio::join!(
            get_body(router(&app), "/slow"),
            get_body(router(&app), "/slow")
        );

        let served = [status_a, status_b]
            .iter()
            .filter(|status| **status == StatusCode::OK)
            .count();
        assert_eq!(served, 1);
        assert_eq!(counters.created(), 1);
        assert_eq!(counters.closed(), 1);
    }

    #[tokio::test]
    async fn test_disposal_failure_replaces_response() {
        let app = App::new("web-test");
        let (factory, counters) = CountingFactory::failing_close();
        ScopedSession::with_app(factory, &app);

        let (status, _) = get_body(router(&app), "/serial").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(counters.closed(), 1);
    }

    #[tokio::test]
    async fn test_factory_failure_is_service_unavailable() {
        let app = App::new("web-test");
        let (factory, _) = CountingFactory::new();
        factory
            .fail_create
            .store(true, std::sync::atomic::Ordering::SeqCst);
        ScopedSession::with_app(factory, &app);

        let (status, body) = get_body(router(&app), "/serial").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("SESSION_FACTORY_FAILED"));
    }
}
