//! Application state.

use scoped_session::{App, ScopedSession, SqliteSession, SqliteSessionFactory};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::db;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Host application the session registry is installed into
    pub app: Arc<App>,
    /// Request-scoped SQLite sessions
    pub sessions: Arc<ScopedSession<SqliteSession>>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Create new application state, migrating the database first
    pub fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let factory = SqliteSessionFactory::new(&config.database_path)
            .busy_timeout(config.busy_timeout());
        db::migrate(&factory)?;

        let app = App::with_strategy(env!("CARGO_PKG_NAME"), config.scope_strategy);
        let sessions = ScopedSession::with_app(factory, &app);

        Ok(Arc::new(Self {
            config: Arc::new(config),
            app,
            sessions,
            start_time: Instant::now(),
        }))
    }
}
