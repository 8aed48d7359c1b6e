//! Scope keys and the strategies that produce them.
//!
//! A scope key identifies one logical unit of work (usually one request).
//! How the key is derived is chosen explicitly per application:
//!
//! - `context`: a fresh id for every application context (default)
//! - `thread`: the identity of the current OS thread
//! - `task`: the id of the current tokio task
//!
//! Nothing here reads hidden global state on behalf of the registry; the key
//! is resolved once when a context is pushed and then carried by the
//! `AppContext` handle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::thread::ThreadId;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Identifier of the logical unit of work a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    /// One application context
    Context(Uuid),
    /// An OS thread
    Thread(ThreadId),
    /// A tokio task
    Task(tokio::task::Id),
    /// A key supplied directly by the caller
    Named(String),
}

impl ScopeKey {
    /// Create a key from an explicit name
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Create a fresh context key
    pub fn context() -> Self {
        Self::Context(Uuid::new_v4())
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Context(id) => write!(f, "context:{}", id),
            ScopeKey::Thread(id) => write!(f, "thread:{:?}", id),
            ScopeKey::Task(id) => write!(f, "task:{}", id),
            ScopeKey::Named(name) => write!(f, "named:{}", name),
        }
    }
}

/// How an application derives the scope key of a new context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeStrategy {
    /// Every context gets its own key
    #[default]
    Context,
    /// Contexts on the same OS thread share a key
    Thread,
    /// Contexts in the same tokio task share a key
    Task,
}

impl ScopeStrategy {
    /// Resolve the key for the current execution context.
    ///
    /// `Task` fails with [`Error::ScopeUnavailable`] when called outside a
    /// tokio task; it never falls back to thread identity.
    pub fn resolve(&self) -> Result<ScopeKey> {
        match self {
            ScopeStrategy::Context => Ok(ScopeKey::context()),
            ScopeStrategy::Thread => Ok(ScopeKey::Thread(std::thread::current().id())),
            ScopeStrategy::Task => tokio::task::try_id()
                .map(ScopeKey::Task)
                .ok_or(Error::ScopeUnavailable { strategy: *self }),
        }
    }

    /// Strategy name as used in configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeStrategy::Context => "context",
            ScopeStrategy::Thread => "thread",
            ScopeStrategy::Task => "task",
        }
    }
}

impl fmt::Display for ScopeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "context" => Ok(ScopeStrategy::Context),
            "thread" => Ok(ScopeStrategy::Thread),
            "task" => Ok(ScopeStrategy::Task),
            other => Err(Error::Other(format!("unknown scope strategy: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keys_are_unique() {
        let a = ScopeStrategy::Context.resolve().unwrap();
        let b = ScopeStrategy::Context.resolve().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_thread_key_stable_on_same_thread() {
        let a = ScopeStrategy::Thread.resolve().unwrap();
        let b = ScopeStrategy::Thread.resolve().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_thread_keys_differ_across_threads() {
        let here = ScopeStrategy::Thread.resolve().unwrap();
        let there = std::thread::spawn(|| ScopeStrategy::Thread.resolve().unwrap())
            .join()
            .unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_task_strategy_outside_task() {
        let err = ScopeStrategy::Task.resolve().unwrap_err();
        assert!(matches!(
            err,
            Error::ScopeUnavailable {
                strategy: ScopeStrategy::Task
            }
        ));
    }

    #[tokio::test]
    async fn test_task_keys_differ_across_tasks() {
        // Both tasks stay alive until each has resolved its key
        let barrier = std::sync::Arc::new(tokio::sync::Barrier::new(2));
        let spawn = |barrier: std::sync::Arc<tokio::sync::Barrier>| {
            tokio::spawn(async move {
                let key = ScopeStrategy::Task.resolve().unwrap();
                barrier.wait().await;
                key
            })
        };
        let a = spawn(barrier.clone());
        let b = spawn(barrier);
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(matches!(a, ScopeKey::Task(_)));
        assert_ne!(a, b);
    }

    #[test]
    fn test_strategy_parse_and_display() {
        assert_eq!("Thread".parse::<ScopeStrategy>().unwrap(), ScopeStrategy::Thread);
        assert_eq!(" task ".parse::<ScopeStrategy>().unwrap(), ScopeStrategy::Task);
        assert!("greenlet".parse::<ScopeStrategy>().is_err());
        assert_eq!(ScopeStrategy::default().to_string(), "context");
    }

    #[test]
    fn test_named_key_display() {
        assert_eq!(ScopeKey::named("req-1").to_string(), "named:req-1");
    }
}
