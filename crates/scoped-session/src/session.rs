//! Session and session factory traits.
//!
//! The registry treats sessions as opaque: it only needs to create them and,
//! at the end of a scope, close them.

use crate::error::Result;

/// A unit-of-work handle owned by one scope.
pub trait Session: Send + Sync + 'static {
    /// Release the session's resources.
    ///
    /// Called exactly once by the registry when the owning scope ends.
    /// Uncommitted work should be discarded.
    fn close(&self) -> Result<()>;
}

/// Creates new sessions on demand.
pub trait SessionFactory<S>: Send + Sync {
    /// Build a fresh session
    fn create(&self) -> Result<S>;
}

impl<S, F> SessionFactory<S> for F
where
    F: Fn() -> Result<S> + Send + Sync,
{
    fn create(&self) -> Result<S> {
        self()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Counting session used by the registry, installer and accessor tests.

    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Shared counters for sessions built by a [`CountingFactory`]
    #[derive(Debug, Default)]
    pub struct Counters {
        pub created: AtomicUsize,
        pub closed: AtomicUsize,
    }

    impl Counters {
        pub fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        pub fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[derive(Debug)]
    pub struct CountingSession {
        pub serial: usize,
        counters: Arc<Counters>,
        fail_close: bool,
    }

    impl Session for CountingSession {
        fn close(&self) -> Result<()> {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(Error::Other(format!("close failed for #{}", self.serial)));
            }
            Ok(())
        }
    }

    pub struct CountingFactory {
        pub counters: Arc<Counters>,
        pub fail_create: AtomicBool,
        pub fail_close: bool,
    }

    impl CountingFactory {
        pub fn new() -> (Self, Arc<Counters>) {
            let counters = Arc::new(Counters::default());
            (
                Self {
                    counters: Arc::clone(&counters),
                    fail_create: AtomicBool::new(false),
                    fail_close: false,
                },
                counters,
            )
        }

        pub fn failing_close() -> (Self, Arc<Counters>) {
            let (mut factory, counters) = Self::new();
            factory.fail_close = true;
            (factory, counters)
        }
    }

    impl SessionFactory<CountingSession> for CountingFactory {
        fn create(&self) -> Result<CountingSession> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(Error::factory("connection refused"));
            }
            let serial = self.counters.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(CountingSession {
                serial,
                counters: Arc::clone(&self.counters),
                fail_close: self.fail_close,
            })
        }
    }
}
