//! scoped-session - Request-scoped database sessions
//!
//! Binds a session's lifetime to an application context (usually one web
//! request): each context gets exactly one session, created lazily on first
//! access and closed exactly once when the context ends.
//!
//! - **scope**: Scope keys and the explicit strategies that derive them
//! - **registry**: Scope key → session map with lazy creation and removal
//! - **app**: Host application, typed extensions, contexts and teardown hooks
//! - **installer**: Attaching a registry to an application
//! - **current**: Resolving the session of the active context
//! - **sqlite**: rusqlite-backed unit-of-work sessions (feature `sqlite`)
//! - **web**: axum middleware and extractors (feature `axum`)
//!
//! # Example
//!
//! ```rust,no_run
//! use scoped_session::{App, ScopedSession, SqliteSession, SqliteSessionFactory, current_session};
//!
//! fn example() -> scoped_session::Result<()> {
//!     let app = App::new("notes");
//!     ScopedSession::with_app(SqliteSessionFactory::new("notes.db"), &app);
//!
//!     app.run(|ctx| {
//!         let session = current_session::<SqliteSession>(Some(ctx))?;
//!         session.execute("INSERT INTO note (body) VALUES (?1)", ["hello"])?;
//!         session.commit()
//!     })
//! }
//! ```

pub mod app;
pub mod current;
pub mod error;
pub mod registry;
pub mod scope;
pub mod session;

mod installer;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "axum")]
pub mod web;

// Re-export commonly used types
pub use app::{App, AppContext, Teardown};
pub use current::{current_session, CurrentSession};
pub use error::{Error, Result};
pub use registry::ScopedSession;
pub use scope::{ScopeKey, ScopeStrategy};
pub use session::{Session, SessionFactory};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteSession, SqliteSessionFactory};
