//! SQLite-backed sessions.
//!
//! A [`SqliteSession`] owns one connection for the lifetime of a scope. The
//! first statement opens a transaction; nothing is persisted until
//! [`SqliteSession::commit`]. Closing the session rolls back whatever was
//! left uncommitted and releases the connection.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Params, Row};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::session::{Session, SessionFactory};

/// Opens [`SqliteSession`]s against one database file.
#[derive(Debug, Clone)]
pub struct SqliteSessionFactory {
    path: PathBuf,
    busy_timeout: Duration,
    foreign_keys: bool,
}

impl SqliteSessionFactory {
    /// Factory for the database at `path` (created on first open)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(5),
            foreign_keys: true,
        }
    }

    /// How long a session waits on a locked database
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Enforce foreign key constraints (default: on)
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new session
    pub fn open(&self) -> Result<SqliteSession> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", self.foreign_keys)?;
        Ok(SqliteSession::new(conn))
    }
}

impl SessionFactory<SqliteSession> for SqliteSessionFactory {
    fn create(&self) -> Result<SqliteSession> {
        self.open()
    }
}

/// One unit of work on a SQLite connection.
pub struct SqliteSession {
    id: Uuid,
    created_at: DateTime<Utc>,
    conn: Mutex<Option<Connection>>,
}

impl SqliteSession {
    /// Wrap an open connection
    pub fn new(conn: Connection) -> Self {
        let id = Uuid::new_v4();
        debug!(session_id = %id, "opened sqlite session");
        Self {
            id,
            created_at: Utc::now(),
            conn: Mutex::new(Some(conn)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }

    /// Run `f` on the connection inside the session's transaction
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(Error::SessionClosed)?;
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        f(conn)
    }

    /// Execute one statement, returning the number of changed rows
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        self.with_connection(|conn| Ok(conn.execute(sql, params)?))
    }

    /// Execute several semicolon-separated statements
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.with_connection(|conn| Ok(conn.execute_batch(sql)?))
    }

    /// Query at most one row
    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_connection(|conn| Ok(conn.query_row(sql, params, f).optional()?))
    }

    /// Query all matching rows
    pub fn query_all<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(params, f)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Whether uncommitted work is pending
    pub fn in_transaction(&self) -> bool {
        match self.conn.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|conn| !conn.is_autocommit()),
            Err(_) => false,
        }
    }

    /// Persist the pending work
    pub fn commit(&self) -> Result<()> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(Error::SessionClosed)?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    /// Discard the pending work
    pub fn rollback(&self) -> Result<()> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(Error::SessionClosed)?;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }
}

impl Session for SqliteSession {
    fn close(&self) -> Result<()> {
        let conn = self.lock()?.take();
        let Some(conn) = conn else {
            return Ok(());
        };

        if !conn.is_autocommit() {
            debug!(session_id = %self.id, "rolling back uncommitted work");
            conn.execute_batch("ROLLBACK")?;
        }
        conn.close().map_err(|(_, e)| Error::Database(e))?;
        debug!(session_id = %self.id, "closed sqlite session");
        Ok(())
    }
}

impl fmt::Debug for SqliteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteSession")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("closed", &self.is_closed())
            .finish()
    }
}
