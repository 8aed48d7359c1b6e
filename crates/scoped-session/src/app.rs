//! Host application and application contexts.
//!
//! An [`App`] is the object a session registry is installed into. It carries
//! typed extensions (attribute attachment) and a list of teardown hooks.
//!
//! ## Context lifecycle
//!
//! ```text
//! app.app_context()
//!   │
//!   ├─► resolve ScopeKey with the app's ScopeStrategy
//!   │     (rejected while another active context holds the same key)
//!   │
//!   ├─► AppContext handle (cloneable, passed explicitly)
//!   │
//!   └─► ctx.pop(error)  or  last handle dropped
//!         │
//!         └─► teardown hooks, newest first, exactly once
//! ```

use chrono::{DateTime, Utc};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::scope::{ScopeKey, ScopeStrategy};

type Extension = Arc<dyn Any + Send + Sync>;
type TeardownFn = Arc<dyn Fn(&Teardown<'_>) -> Result<()> + Send + Sync>;

/// What a teardown hook is told about the context that just ended.
#[derive(Debug, Clone, Copy)]
pub struct Teardown<'a> {
    /// Application owning the context
    pub app: &'a App,
    /// Id of the context being torn down
    pub context_id: Uuid,
    /// Scope key the context resolved to
    pub scope_key: &'a ScopeKey,
    /// Failure that ended the context, if any
    pub error: Option<&'a (dyn StdError + 'static)>,
}

impl Teardown<'_> {
    /// Whether the context ended with a failure
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Host application object.
pub struct App {
    name: String,
    strategy: ScopeStrategy,
    extensions: RwLock<HashMap<TypeId, Extension>>,
    teardown: RwLock<Vec<TeardownFn>>,
    active_keys: Mutex<HashSet<ScopeKey>>,
}

impl App {
    /// Create an application using per-context scope keys
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_strategy(name, ScopeStrategy::default())
    }

    /// Create an application with an explicit scope strategy
    pub fn with_strategy(name: impl Into<String>, strategy: ScopeStrategy) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            strategy,
            extensions: RwLock::new(HashMap::new()),
            teardown: RwLock::new(Vec::new()),
            active_keys: Mutex::new(HashSet::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> ScopeStrategy {
        self.strategy
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Extensions
    // ─────────────────────────────────────────────────────────────────────────

    /// Attach a value to the application, replacing any value of the same type.
    ///
    /// Returns the previous value if there was one.
    pub fn insert_extension<T>(&self, value: Arc<T>) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let mut extensions = self.extensions.write().unwrap_or_else(|e| e.into_inner());
        extensions
            .insert(TypeId::of::<T>(), value)
            .and_then(|prev| prev.downcast::<T>().ok())
    }

    /// Get an attached value by type
    pub fn extension<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let extensions = self.extensions.read().unwrap_or_else(|e| e.into_inner());
        extensions
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Check whether a value of type `T` is attached
    pub fn has_extension<T>(&self) -> bool
    where
        T: Any + Send + Sync,
    {
        let extensions = self.extensions.read().unwrap_or_else(|e| e.into_inner());
        extensions.contains_key(&TypeId::of::<T>())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a hook that runs once whenever an application context ends,
    /// whether it succeeded or failed.
    pub fn teardown_appcontext<F>(&self, hook: F)
    where
        F: Fn(&Teardown<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let mut hooks = self.teardown.write().unwrap_or_else(|e| e.into_inner());
        hooks.push(Arc::new(hook));
    }

    /// Number of registered teardown hooks
    pub fn teardown_hook_count(&self) -> usize {
        self.teardown.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Run every teardown hook, newest first.
    ///
    /// All hooks run even if one fails; the first failure is returned and the
    /// rest are logged.
    fn do_teardown_appcontext(&self, teardown: &Teardown<'_>) -> Result<()> {
        // Snapshot so hooks may touch the app without holding the lock
        let hooks: Vec<TeardownFn> = self
            .teardown
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut first_error = None;
        for hook in hooks.iter().rev() {
            if let Err(e) = hook(teardown) {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    error!(
                        app = %self.name,
                        context_id = %teardown.context_id,
                        "additional teardown hook failed: {}",
                        e
                    );
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Contexts
    // ─────────────────────────────────────────────────────────────────────────

    /// Number of contexts pushed and not yet torn down
    pub fn active_contexts(&self) -> usize {
        self.active_keys.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Push a new application context.
    ///
    /// Fails with [`Error::ScopeUnavailable`] when the app's scope strategy
    /// cannot resolve a key here (the `task` strategy outside a tokio task),
    /// or when another active context already holds the resolved key.
    /// Two live contexts never share a session.
    pub fn app_context(self: &Arc<Self>) -> Result<AppContext> {
        let scope_key = self.strategy.resolve()?;
        {
            let mut active = self.active_keys.lock().unwrap_or_else(|e| e.into_inner());
            if !active.insert(scope_key.clone()) {
                warn!(
                    app = %self.name,
                    scope = %scope_key,
                    "scope key already held by an active context"
                );
                return Err(Error::ScopeUnavailable {
                    strategy: self.strategy,
                });
            }
        }

        let ctx = AppContext {
            inner: Arc::new(ContextInner {
                id: Uuid::new_v4(),
                app: Arc::clone(self),
                scope_key,
                started_at: Utc::now(),
                active: AtomicBool::new(true),
                lifecycle: RwLock::new(()),
            }),
        };
        debug!(
            app = %self.name,
            context_id = %ctx.id(),
            scope = %ctx.scope_key(),
            "pushed application context"
        );
        Ok(ctx)
    }

    /// Run `f` inside a fresh application context and tear it down afterwards.
    ///
    /// The error returned by `f` is handed to the teardown hooks. If `f`
    /// succeeded, a teardown failure is returned; otherwise it is logged and
    /// `f`'s error wins.
    pub fn run<T, E, F>(self: &Arc<Self>, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&AppContext) -> std::result::Result<T, E>,
        E: StdError + From<Error> + 'static,
    {
        let ctx = self.app_context()?;
        let result = f(&ctx);
        ctx.finish(result)
    }

    /// Async variant of [`App::run`]
    pub async fn run_async<T, E, F, Fut>(self: &Arc<Self>, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(AppContext) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: StdError + From<Error> + 'static,
    {
        let ctx = self.app_context()?;
        let result = f(ctx.clone()).await;
        ctx.finish(result)
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("teardown_hooks", &self.teardown_hook_count())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<App '{}'>", self.name)
    }
}

struct ContextInner {
    id: Uuid,
    app: Arc<App>,
    scope_key: ScopeKey,
    started_at: DateTime<Utc>,
    active: AtomicBool,
    // Readers are in-flight session lookups; teardown takes the write side
    lifecycle: RwLock<()>,
}

impl ContextInner {
    fn teardown(&self, error: Option<&(dyn StdError + 'static)>) -> Result<()> {
        {
            let _lifecycle = self.lifecycle.write().unwrap_or_else(|e| e.into_inner());
            if !self.active.swap(false, Ordering::SeqCst) {
                return Ok(());
            }
        }

        debug!(
            app = %self.app.name,
            context_id = %self.id,
            scope = %self.scope_key,
            failed = error.is_some(),
            "tearing down application context"
        );

        let result = self.app.do_teardown_appcontext(&Teardown {
            app: &self.app,
            context_id: self.id,
            scope_key: &self.scope_key,
            error,
        });

        // Release the key only once its session is gone
        self.app
            .active_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.scope_key);

        result
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let abandoned = Error::Other("application context dropped without being popped".into());
        if let Err(e) = self.teardown(Some(&abandoned)) {
            error!(
                app = %self.app.name,
                context_id = %self.id,
                "teardown of abandoned context failed: {}",
                e
            );
        }
    }
}

/// Handle to one active application context.
///
/// Cheap to clone. All clones refer to the same context; once it is popped
/// every clone reports `is_active() == false`.
#[derive(Clone)]
pub struct AppContext {
    inner: Arc<ContextInner>,
}

impl AppContext {
    /// Unique id of this context
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Application owning this context
    pub fn app(&self) -> &Arc<App> {
        &self.inner.app
    }

    /// Scope key sessions are registered under
    pub fn scope_key(&self) -> &ScopeKey {
        &self.inner.scope_key
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Whether the context has not been torn down yet
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Run `f` while the context is guaranteed to stay active.
    ///
    /// Teardown waits for `f` to return, so anything `f` registers under the
    /// context's scope key is seen by the teardown hooks. Fails with
    /// [`Error::NoActiveContext`] if the context has already ended.
    pub fn with_active<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _lifecycle = self.lifecycle_guard();
        if !self.is_active() {
            return Err(Error::NoActiveContext);
        }
        f()
    }

    fn lifecycle_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.inner
            .lifecycle
            .read()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// End the context and run teardown hooks.
    ///
    /// Only the first call does anything; later calls return `Ok(())`.
    pub fn pop(&self, error: Option<&(dyn StdError + 'static)>) -> Result<()> {
        self.inner.teardown(error)
    }

    fn finish<T, E>(self, result: std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: StdError + From<Error> + 'static,
    {
        match result {
            Ok(value) => {
                self.pop(None)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(teardown_err) = self.pop(Some(&e)) {
                    error!(
                        context_id = %self.id(),
                        "teardown failed after context error: {}",
                        teardown_err
                    );
                }
                Err(e)
            }
        }
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("id", &self.inner.id)
            .field("app", &self.inner.app.name)
            .field("scope_key", &self.inner.scope_key)
            .field("active", &self.is_active())
            .finish()
    }
}
