//! Notes storage on top of the request's SQLite session.

use rusqlite::params;
use scoped_session::{Result, Session, SqliteSession, SqliteSessionFactory};
use serde::Serialize;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS note (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    body        TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS note_created_at ON note (created_at);
";

/// Create the schema if it does not exist yet
pub fn migrate(factory: &SqliteSessionFactory) -> Result<()> {
    let session = factory.open()?;
    session.execute_batch(SCHEMA)?;
    session.commit()?;
    session.close()
}

#[derive(Debug, Clone, Serialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub body: String,
    pub created_at: i64,
    pub updated_at: i64,
}

fn map_note(row: &rusqlite::Row) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

/// List notes, oldest first
pub fn list_notes(session: &SqliteSession) -> Result<Vec<Note>> {
    session.query_all(
        "SELECT id, title, body, created_at, updated_at FROM note ORDER BY created_at, id",
        [],
        map_note,
    )
}

/// Get note by ID
pub fn get_note(session: &SqliteSession, id: &str) -> Result<Option<Note>> {
    session.query_row(
        "SELECT id, title, body, created_at, updated_at FROM note WHERE id = ?1",
        params![id],
        map_note,
    )
}

/// Insert a note. Not visible to other sessions until the session commits.
pub fn create_note(session: &SqliteSession, title: &str, body: &str) -> Result<Note> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp_millis();

    session.execute(
        "INSERT INTO note (id, title, body, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![id, title, body, now],
    )?;

    Ok(Note {
        id,
        title: title.to_string(),
        body: body.to_string(),
        created_at: now,
        updated_at: now,
    })
}

/// Delete a note, returning whether it existed
pub fn delete_note(session: &SqliteSession, id: &str) -> Result<bool> {
    let changed = session.execute("DELETE FROM note WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}
