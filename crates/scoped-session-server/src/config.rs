//! Server configuration.

use scoped_session::ScopeStrategy;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to configuration file
    pub config_path: PathBuf,
    /// Address the HTTP API listens on
    pub bind: SocketAddr,
    /// SQLite database path
    pub database_path: PathBuf,
    /// How request contexts derive their scope key
    pub scope_strategy: ScopeStrategy,
    /// How long a session waits on a locked database
    pub busy_timeout_ms: u64,
}

/// Optional overrides read from `config.toml`
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bind: Option<SocketAddr>,
    database_path: Option<PathBuf>,
    scope_strategy: Option<ScopeStrategy>,
    busy_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::defaults_in(&home.join(".scoped-session"))
    }
}

impl Config {
    fn defaults_in(dir: &Path) -> Self {
        Self {
            config_path: dir.join("config.toml"),
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            database_path: dir.join("notes.db"),
            scope_strategy: ScopeStrategy::default(),
            busy_timeout_ms: 5000,
        }
    }

    /// Load configuration from file, environment and defaults
    ///
    /// Directory layout:
    /// ```text
    /// ~/.scoped-session/        (or $SCOPED_SESSION_DIR)
    /// ├── config.toml           # Optional overrides
    /// └── notes.db              # Database
    /// ```
    ///
    /// Environment variables win over the file:
    /// `SCOPED_SESSION_BIND`, `SCOPED_SESSION_DATABASE`, `SCOPED_SESSION_SCOPE`.
    pub fn load() -> anyhow::Result<Self> {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));

        let dir = std::env::var("SCOPED_SESSION_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".scoped-session"));

        Self::load_from(&dir, |key| std::env::var(key).ok())
    }

    /// Load configuration rooted at `dir`, reading overrides through `env`
    pub fn load_from(dir: &Path, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mut config = Self::defaults_in(dir);

        if config.config_path.exists() {
            let raw = std::fs::read_to_string(&config.config_path)?;
            let file: FileConfig = toml::from_str(&raw)?;
            config.apply_file(file);
        }

        if let Some(bind) = env("SCOPED_SESSION_BIND") {
            config.bind = bind.parse()?;
        }
        if let Some(path) = env("SCOPED_SESSION_DATABASE") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(strategy) = env("SCOPED_SESSION_SCOPE") {
            config.scope_strategy = strategy.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(bind) = file.bind {
            self.bind = bind;
        }
        if let Some(path) = file.database_path {
            self.database_path = path;
        }
        if let Some(strategy) = file.scope_strategy {
            self.scope_strategy = strategy;
        }
        if let Some(timeout) = file.busy_timeout_ms {
            self.busy_timeout_ms = timeout;
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingDatabasePath);
        }

        // Requests interleave on runtime worker threads
        if self.scope_strategy == ScopeStrategy::Thread {
            return Err(ConfigValidationError::UnsupportedScopeStrategy(
                self.scope_strategy,
            ));
        }

        if self.busy_timeout_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "busy_timeout_ms".into(),
                message: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("database_path is required")]
    MissingDatabasePath,

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("scope_strategy \"{0}\" cannot isolate concurrent requests; use \"context\" or \"task\"")]
    UnsupportedScopeStrategy(ScopeStrategy),
}
