//! Installing a registry into a host application.

use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

use crate::app::{App, Teardown};
use crate::registry::ScopedSession;
use crate::session::{Session, SessionFactory};

/// Marks that the teardown hook for `ScopedSession<S>` is already registered.
struct TeardownInstalled<S>(PhantomData<fn() -> S>);

impl<S: Session> ScopedSession<S> {
    /// Create a registry and install it into `app` straight away
    pub fn with_app(factory: impl SessionFactory<S> + 'static, app: &App) -> Arc<Self> {
        let registry = Self::new(factory);
        registry.init_app(app);
        registry
    }

    /// Attach this registry to `app` and remove each context's session when
    /// the context ends.
    ///
    /// Installing again replaces the previous registry. The teardown hook is
    /// registered once per session type and always resolves the registry
    /// installed at teardown time.
    pub fn init_app(self: &Arc<Self>, app: &App) {
        let replaced = app.insert_extension(Arc::clone(self)).is_some();
        debug!(app = %app.name(), replaced, "installed scoped session registry");

        if app.has_extension::<TeardownInstalled<S>>() {
            return;
        }
        app.insert_extension(Arc::new(TeardownInstalled::<S>(PhantomData)));
        app.teardown_appcontext(remove_scoped_session::<S>);
    }
}

fn remove_scoped_session<S: Session>(teardown: &Teardown<'_>) -> crate::Result<()> {
    match teardown.app.extension::<ScopedSession<S>>() {
        Some(registry) => registry.remove(teardown.scope_key),
        None => Ok(()),
    }
}
