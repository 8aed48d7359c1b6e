//! Error types for scoped-session.

use thiserror::Error;

use crate::scope::ScopeStrategy;

/// Result type alias using scoped-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while resolving, creating or disposing scoped sessions
#[derive(Error, Debug)]
pub enum Error {
    // Integrator errors
    #[error("Cannot access the current session outside of an application context")]
    NoActiveContext,

    #[error("{app} has no scoped session registry. Install one with ScopedSession::init_app.")]
    NotInitialized { app: String },

    #[error("Cannot resolve a {strategy} scope key from the current execution context")]
    ScopeUnavailable { strategy: ScopeStrategy },

    // Session errors
    #[error("Session factory failed: {0}")]
    Factory(String),

    #[error("Session is closed")]
    SessionClosed,

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Registry lock poisoned")]
    LockPoisoned,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a not-initialized error for the named application
    pub fn not_initialized(app: impl Into<String>) -> Self {
        Self::NotInitialized { app: app.into() }
    }

    /// Create a factory error from any displayable cause
    pub fn factory(cause: impl std::fmt::Display) -> Self {
        Self::Factory(cause.to_string())
    }

    /// Machine-readable code, used in HTTP error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Error::NoActiveContext => "NO_ACTIVE_CONTEXT",
            Error::NotInitialized { .. } => "NOT_INITIALIZED",
            Error::ScopeUnavailable { .. } => "SCOPE_UNAVAILABLE",
            Error::Factory(_) => "SESSION_FACTORY_FAILED",
            Error::SessionClosed => "SESSION_CLOSED",
            #[cfg(feature = "sqlite")]
            Error::Database(_) => "DATABASE_ERROR",
            Error::LockPoisoned => "LOCK_POISONED",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error signals a wiring mistake rather than a runtime failure
    pub fn is_integration_error(&self) -> bool {
        matches!(
            self,
            Error::NoActiveContext | Error::NotInitialized { .. } | Error::ScopeUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_initialized_names_app() {
        let err = Error::not_initialized("notes-api");
        assert!(err.to_string().contains("notes-api"));
        assert!(err.to_string().contains("init_app"));
        assert_eq!(err.code(), "NOT_INITIALIZED");
    }

    #[test]
    fn test_integration_errors() {
        assert!(Error::NoActiveContext.is_integration_error());
        assert!(Error::not_initialized("app").is_integration_error());
        assert!(!Error::SessionClosed.is_integration_error());
        assert!(!Error::factory("boom").is_integration_error());
    }

    #[test]
    fn test_scope_unavailable_mentions_strategy() {
        let err = Error::ScopeUnavailable {
            strategy: ScopeStrategy::Task,
        };
        assert!(err.to_string().contains("task"));
    }
}
