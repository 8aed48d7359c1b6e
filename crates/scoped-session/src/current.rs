//! Access to the session of the active context.
//!
//! The context is always passed in explicitly. Handlers that hold an
//! [`AppContext`] resolve the session with [`current_session`] (or the axum
//! extractor) and then use it as if it were the session itself:
//!
//! ```rust
//! use scoped_session::{App, CurrentSession, ScopedSession, Session, Result};
//!
//! struct Unit;
//!
//! impl Session for Unit {
//!     fn close(&self) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! let app = App::new("example");
//! ScopedSession::<Unit>::with_app(|| Ok(Unit), &app);
//!
//! let ctx = app.app_context()?;
//! let a = CurrentSession::<Unit>::resolve(Some(&ctx))?;
//! let b = CurrentSession::<Unit>::resolve(Some(&ctx))?;
//! assert!(a.is(&b));
//! ctx.pop(None)?;
//! # Ok::<(), scoped_session::Error>(())
//! ```

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::app::AppContext;
use crate::error::{Error, Result};
use crate::registry::ScopedSession;
use crate::session::Session;

/// The session of one active context, dereferencing to the session itself.
///
/// Within a scope the registry always yields the same instance, so a resolved
/// handle forwards to exactly what a fresh lookup would.
pub struct CurrentSession<S: Session> {
    session: Arc<S>,
    registry: Arc<ScopedSession<S>>,
}

impl<S: Session> CurrentSession<S> {
    /// Resolve the session for `ctx`.
    ///
    /// - no context, or one already popped: [`Error::NoActiveContext`]
    /// - no registry installed on the context's app: [`Error::NotInitialized`]
    /// - factory failure: propagated
    ///
    /// A context popped concurrently waits for the lookup, so the session is
    /// always closed by that context's teardown.
    pub fn resolve(ctx: Option<&AppContext>) -> Result<Self> {
        let ctx = ctx.ok_or(Error::NoActiveContext)?;

        ctx.with_active(|| {
            let registry = ctx
                .app()
                .extension::<ScopedSession<S>>()
                .ok_or_else(|| Error::not_initialized(ctx.app().to_string()))?;

            let session = registry.get(ctx.scope_key())?;
            Ok(Self { session, registry })
        })
    }

    /// Shared handle to the underlying session
    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    /// Registry the session was resolved from
    pub fn registry(&self) -> &Arc<ScopedSession<S>> {
        &self.registry
    }

    /// Whether two handles point at the same session instance
    pub fn is(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.session, &other.session)
    }

    pub fn into_inner(self) -> Arc<S> {
        self.session
    }
}

impl<S: Session> Deref for CurrentSession<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: Session> Clone for CurrentSession<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S: Session + fmt::Debug> fmt::Debug for CurrentSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CurrentSession").field(&self.session).finish()
    }
}

/// Resolve the current session for `ctx`
pub fn current_session<S: Session>(ctx: Option<&AppContext>) -> Result<CurrentSession<S>> {
    CurrentSession::resolve(ctx)
}
