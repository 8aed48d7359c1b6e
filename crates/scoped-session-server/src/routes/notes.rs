//! Note routes.
//!
//! Handlers use the request's session and commit explicitly. Anything left
//! uncommitted when the request ends is rolled back by teardown.

use axum::{
    extract::Path,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use scoped_session::{CurrentSession, SqliteSession};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::{self, Note};
use crate::state::AppState;

/// Create notes router
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/notes", get(list_notes).post(create_note))
        .route("/notes/{id}", get(get_note).delete(delete_note))
}

fn internal(e: scoped_session::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// List notes
pub async fn list_notes(
    session: CurrentSession<SqliteSession>,
) -> Result<Json<Vec<Note>>, (StatusCode, String)> {
    let notes = db::list_notes(&session).map_err(internal)?;
    Ok(Json(notes))
}

#[derive(Debug, Deserialize)]
pub struct CreateNoteRequest {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

/// Create a new note
pub async fn create_note(
    session: CurrentSession<SqliteSession>,
    Json(req): Json<CreateNoteRequest>,
) -> Result<(StatusCode, Json<Note>), (StatusCode, String)> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Title is required".to_string()));
    }

    let note = db::create_note(&session, title, &req.body).map_err(internal)?;
    session.commit().map_err(internal)?;

    Ok((StatusCode::CREATED, Json(note)))
}

/// Get a note by ID
pub async fn get_note(
    session: CurrentSession<SqliteSession>,
    Path(id): Path<String>,
) -> Result<Json<Note>, (StatusCode, String)> {
    let note = db::get_note(&session, &id)
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Note not found".to_string()))?;

    Ok(Json(note))
}

/// Delete a note
pub async fn delete_note(
    session: CurrentSession<SqliteSession>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if !db::delete_note(&session, &id).map_err(internal)? {
        return Err((StatusCode::NOT_FOUND, "Note not found".to_string()));
    }
    session.commit().map_err(internal)?;

    Ok(StatusCode::NO_CONTENT)
}
