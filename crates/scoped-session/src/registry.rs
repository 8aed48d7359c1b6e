//! Context-scoped session registry.
//!
//! Maps scope keys to sessions. A session is created by the factory the first
//! time its key is looked up and closed when the key is removed.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, warn};

use crate::app::AppContext;
use crate::error::Result;
use crate::scope::ScopeKey;
use crate::session::{Session, SessionFactory};

/// Registry of sessions, at most one per scope key.
pub struct ScopedSession<S: Session> {
    factory: RwLock<Arc<dyn SessionFactory<S>>>,
    sessions: Mutex<HashMap<ScopeKey, Arc<S>>>,
}

impl<S: Session> ScopedSession<S> {
    /// Create a registry backed by `factory`
    pub fn new(factory: impl SessionFactory<S> + 'static) -> Arc<Self> {
        Arc::new(Self {
            factory: RwLock::new(Arc::new(factory)),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    // Every operation leaves the map consistent, so a poisoned guard is usable
    fn sessions(&self) -> MutexGuard<'_, HashMap<ScopeKey, Arc<S>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn factory(&self) -> Arc<dyn SessionFactory<S>> {
        let factory = self.factory.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&factory)
    }

    /// Get the session for `key`, creating it on first access.
    ///
    /// Factory errors propagate unchanged and nothing is cached.
    pub fn get(&self, key: &ScopeKey) -> Result<Arc<S>> {
        if let Some(session) = self.sessions().get(key) {
            return Ok(Arc::clone(session));
        }

        // Build outside the lock; opening a connection can be slow
        let session = Arc::new(self.factory().create()?);

        let (session, extra) = {
            let mut sessions = self.sessions();
            match sessions.entry(key.clone()) {
                Entry::Occupied(entry) => (Arc::clone(entry.get()), Some(session)),
                Entry::Vacant(entry) => {
                    entry.insert(Arc::clone(&session));
                    (session, None)
                }
            }
        };

        match extra {
            // Lost a race for the same key: keep the registered one, close ours
            Some(extra) => {
                if let Err(e) = extra.close() {
                    warn!(scope = %key, "failed to close duplicate session: {}", e);
                }
            }
            None => debug!(scope = %key, "created scoped session"),
        }

        Ok(session)
    }

    /// Close and evict the session for `key`.
    ///
    /// A key without a session is a no-op. Close failures are returned after
    /// the entry has been evicted.
    pub fn remove(&self, key: &ScopeKey) -> Result<()> {
        let session = self.sessions().remove(key);
        if let Some(session) = session {
            debug!(scope = %key, "closing scoped session");
            session.close()?;
        }
        Ok(())
    }

    /// Check whether a session exists for `key`
    pub fn has(&self, key: &ScopeKey) -> bool {
        self.sessions().contains_key(key)
    }

    /// Number of scopes currently holding a session
    pub fn active_scopes(&self) -> usize {
        self.sessions().len()
    }

    /// Replace the session factory.
    ///
    /// Only sessions created afterwards use the new factory.
    pub fn configure(&self, factory: impl SessionFactory<S> + 'static) -> Result<()> {
        let active = self.active_scopes();
        if active > 0 {
            warn!(
                active,
                "scoped sessions already present; configure() does not affect them"
            );
        }
        let mut current = self.factory.write().unwrap_or_else(|e| e.into_inner());
        *current = Arc::new(factory);
        Ok(())
    }

    /// Session for an active application context
    pub fn current(&self, ctx: &AppContext) -> Result<Arc<S>> {
        ctx.with_active(|| self.get(ctx.scope_key()))
    }
}

impl<S: Session> fmt::Debug for ScopedSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedSession")
            .field("active_scopes", &self.active_scopes())
            .finish_non_exhaustive()
    }
}
