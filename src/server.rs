//! HTTP API server using Axum.
//!
//! Exposes the persistence boundary over HTTP:
//! - `/notes` - list and create notes
//! - `/notes/:id` - fetch and delete a single note
//! - `/notes/:id/rename` - change a note's title
//! - `/notes/:id/content` - fetch stored content / apply a patch set
//! - `/notes/:id/tags/:tag_id` - attach and detach tags
//! - `/tags` - tag CRUD
//! - `/status` - health check
//!
//! Authentication is out of scope here: the fronting session layer
//! authenticates the user and injects their id as a request header
//! (see [`USER_HEADER`]). A request without it is rejected.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::client::USER_HEADER;
use crate::database::Database;
use crate::error::{NoteError, NoteResult};
use crate::models::TagColor;
use crate::patch::PatchSet;

/// Server shutdown handle
static SHUTDOWN_TX: OnceLock<Mutex<Option<oneshot::Sender<()>>>> = OnceLock::new();

/// Shared server state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Database>>,
}

// Request/Response types

#[derive(Debug, Deserialize)]
struct CreateNoteRequest {
    title: String,
    #[serde(default)]
    tag_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
struct RenameNoteRequest {
    new_title: String,
}

#[derive(Debug, Deserialize)]
struct UpdateContentRequest {
    patches: PatchSet,
}

#[derive(Debug, Serialize)]
struct ContentResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct CreateTagRequest {
    label: String,
    color: TagColor,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total: Option<usize>,
}

/// Map a library error onto an HTTP response
fn error_response(err: NoteError) -> Response {
    let (status, failed, total) = match &err {
        NoteError::Validation { .. } => (StatusCode::BAD_REQUEST, None, None),
        NoteError::NotFound(_) => (StatusCode::NOT_FOUND, None, None),
        NoteError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, None, None),
        NoteError::PatchApply { failed, total } => {
            (StatusCode::CONFLICT, Some(*failed), Some(*total))
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, None, None),
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            failed,
            total,
        }),
    )
        .into_response()
}

/// Extract the caller's user id from the auth header
fn caller(headers: &HeaderMap) -> NoteResult<String> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| NoteError::Unauthorized(format!("missing {USER_HEADER} header")))
}

// Route handlers

async fn status() -> impl IntoResponse {
    Json(StatusResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn list_notes(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let result = caller(&headers).and_then(|user| {
        let db = state.db.lock().unwrap();
        db.get_all_notes(&user)
    });
    match result {
        Ok(notes) => Json(notes).into_response(),
        Err(e) => error_response(e),
    }
}

async fn create_note(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateNoteRequest>,
) -> Response {
    let result = caller(&headers).and_then(|user| {
        let mut db = state.db.lock().unwrap();
        db.create_note(&request.title, &user, &request.tag_ids)
    });
    match result {
        Ok(note) => (StatusCode::CREATED, Json(note)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_note(
    State(state): State<AppState>,
    Path(note_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    let result = caller(&headers).and_then(|user| {
        let db = state.db.lock().unwrap();
        db.get_note(note_id, &user)?
            .ok_or_else(|| NoteError::not_found(format!("note {note_id}")))
    });
    match result {
        Ok(note) => Json(note).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_note(
    State(state): State<AppState>,
    Path(note_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    let result = caller(&headers).and_then(|user| {
        let mut db = state.db.lock().unwrap();
        if db.delete_note(note_id, &user)? {
            Ok(())
        } else {
            Err(NoteError::not_found(format!("note {note_id}")))
        }
    });
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn rename_note(
    State(state): State<AppState>,
    Path(note_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<RenameNoteRequest>,
) -> Response {
    let result = caller(&headers).and_then(|user| {
        let mut db = state.db.lock().unwrap();
        db.rename_note(note_id, &user, &request.new_title)
    });
    match result {
        Ok(note) => Json(note).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_content(
    State(state): State<AppState>,
    Path(note_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    let result = caller(&headers).and_then(|user| {
        let db = state.db.lock().unwrap();
        db.get_note_content(note_id, &user)?
            .ok_or_else(|| NoteError::not_found(format!("note {note_id}")))
    });
    match result {
        Ok(content) => Json(ContentResponse { content }).into_response(),
        Err(e) => error_response(e),
    }
}

/// The sync boundary call: load stored content, apply the patch set,
/// persist atomically. Any hunk failure rejects the whole request with
/// 409; stored content is never partially updated.
async fn update_content(
    State(state): State<AppState>,
    Path(note_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<UpdateContentRequest>,
) -> Response {
    let result = caller(&headers).and_then(|user| {
        let mut db = state.db.lock().unwrap();
        db.update_content(note_id, &user, &request.patches)
    });
    match result {
        Ok(note) => {
            tracing::debug!(note_id = %note.id, "content updated");
            Json(note).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn list_tags(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let result = caller(&headers).and_then(|user| {
        let db = state.db.lock().unwrap();
        db.get_all_tags(&user)
    });
    match result {
        Ok(tags) => Json(tags).into_response(),
        Err(e) => error_response(e),
    }
}

async fn create_tag(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateTagRequest>,
) -> Response {
    let result = caller(&headers).and_then(|user| {
        let mut db = state.db.lock().unwrap();
        db.create_tag(&request.label, request.color, &user)
    });
    match result {
        Ok(tag) => (StatusCode::CREATED, Json(tag)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_tag(
    State(state): State<AppState>,
    Path(tag_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    let result = caller(&headers).and_then(|user| {
        let mut db = state.db.lock().unwrap();
        if db.delete_tag(tag_id, &user)? {
            Ok(())
        } else {
            Err(NoteError::not_found(format!("tag {tag_id}")))
        }
    });
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn add_tag(
    State(state): State<AppState>,
    Path((note_id, tag_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Response {
    let result = caller(&headers).and_then(|user| {
        let mut db = state.db.lock().unwrap();
        db.add_tag(note_id, tag_id, &user)
    });
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn remove_tag(
    State(state): State<AppState>,
    Path((note_id, tag_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Response {
    let result = caller(&headers).and_then(|user| {
        let mut db = state.db.lock().unwrap();
        db.remove_tag(note_id, tag_id, &user)
    });
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// Build the API router
pub fn create_router(db: Arc<Mutex<Database>>) -> Router {
    let state = AppState { db };

    Router::new()
        .route("/notes", get(list_notes).post(create_note))
        .route("/notes/:id", get(get_note).delete(delete_note))
        .route("/notes/:id/rename", post(rename_note))
        .route("/notes/:id/content", get(get_content).post(update_content))
        .route("/notes/:id/tags/:tag_id", post(add_tag).delete(remove_tag))
        .route("/tags", get(list_tags).post(create_tag))
        .route("/tags/:id", delete(delete_tag))
        .route("/status", get(status))
        .with_state(state)
}

/// Start the API server
pub async fn start_server(db: Arc<Mutex<Database>>, port: u16) -> NoteResult<()> {
    let router = create_router(db);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let (tx, rx) = oneshot::channel::<()>();
    SHUTDOWN_TX.get_or_init(|| Mutex::new(Some(tx)));

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| NoteError::Network(e.to_string()))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            rx.await.ok();
        })
        .await
        .map_err(|e| NoteError::Network(e.to_string()))?;

    Ok(())
}

/// Stop the API server
pub fn stop_server() {
    if let Some(mutex) = SHUTDOWN_TX.get() {
        if let Ok(mut guard) = mutex.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RemoteNotes;
    use crate::patch::compute_diff;
    use crate::session::NoteStore;
    use std::time::Duration;

    const USER: &str = "user-1";

    /// Bind the router to an ephemeral port and return its base URL
    async fn spawn_server(db: Arc<Mutex<Database>>) -> String {
        let router = create_router(db);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn seeded_db(content: &str) -> (Arc<Mutex<Database>>, Uuid) {
        let mut db = Database::new_in_memory().unwrap();
        let note = db.create_note("Test note", USER, &[]).unwrap();
        let note_id = note.note.id;
        if !content.is_empty() {
            let patches = compute_diff("", content);
            db.update_content(note_id, USER, &patches).unwrap();
        }
        (Arc::new(Mutex::new(db)), note_id)
    }

    #[tokio::test]
    async fn test_update_content_over_http() {
        let (db, note_id) = seeded_db("Hello world");
        let base_url = spawn_server(Arc::clone(&db)).await;
        let store = RemoteNotes::new(&base_url, USER, Duration::from_secs(5)).unwrap();

        assert_eq!(store.get_content(note_id).await.unwrap(), "Hello world");

        let patches = compute_diff("Hello world", "Hello brave world");
        let updated = store.update_content(note_id, &patches).await.unwrap();
        assert_eq!(updated.content, "Hello brave world");

        let db = db.lock().unwrap();
        assert_eq!(
            db.get_note_content(note_id, USER).unwrap().unwrap(),
            "Hello brave world"
        );
    }

    #[tokio::test]
    async fn test_unknown_note_is_404() {
        let (db, _) = seeded_db("");
        let base_url = spawn_server(db).await;
        let store = RemoteNotes::new(&base_url, USER, Duration::from_secs(5)).unwrap();

        let err = store.get_content(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, NoteError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_foreign_user_is_404() {
        let (db, note_id) = seeded_db("secret");
        let base_url = spawn_server(db).await;
        let store = RemoteNotes::new(&base_url, "someone-else", Duration::from_secs(5)).unwrap();

        let err = store.get_content(note_id).await.unwrap_err();
        assert!(matches!(err, NoteError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_auth_header_is_401() {
        let (db, note_id) = seeded_db("");
        let base_url = spawn_server(db).await;

        let response = reqwest::get(format!("{base_url}/notes/{note_id}/content"))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unlocatable_patch_is_409_and_leaves_content() {
        let (db, note_id) = seeded_db("Hello world");
        let base_url = spawn_server(Arc::clone(&db)).await;
        let store = RemoteNotes::new(&base_url, USER, Duration::from_secs(5)).unwrap();

        let stale = compute_diff(
            "a wildly different document that was never on the server",
            "a wildly different document that was never on the server!",
        );
        let err = store.update_content(note_id, &stale).await.unwrap_err();
        assert!(matches!(err, NoteError::PatchApply { .. }));

        let db = db.lock().unwrap();
        assert_eq!(
            db.get_note_content(note_id, USER).unwrap().unwrap(),
            "Hello world"
        );
    }

    #[tokio::test]
    async fn test_note_and_tag_crud_over_http() {
        let (db, _) = seeded_db("");
        let base_url = spawn_server(db).await;
        let client = reqwest::Client::new();

        // Create a tag, then a note carrying it.
        let tag: crate::models::Tag = client
            .post(format!("{base_url}/tags"))
            .header(USER_HEADER, USER)
            .json(&serde_json::json!({"label": "Work", "color": "sky"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let note: crate::models::NoteWithTags = client
            .post(format!("{base_url}/notes"))
            .header(USER_HEADER, USER)
            .json(&serde_json::json!({"title": "Tagged note", "tag_ids": [tag.id]}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(note.tags.len(), 1);

        // Rename, then delete.
        let renamed: crate::models::NoteWithTags = client
            .post(format!("{base_url}/notes/{}/rename", note.note.id))
            .header(USER_HEADER, USER)
            .json(&serde_json::json!({"new_title": "Renamed"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(renamed.note.title, "Renamed");

        let status = client
            .delete(format!("{base_url}/notes/{}", note.note.id))
            .header(USER_HEADER, USER)
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_editor_session_against_live_server() {
        use crate::session::{EditorSession, SessionEvent};
        use tokio::sync::mpsc;

        let (db, note_id) = seeded_db("Hello world");
        let base_url = spawn_server(Arc::clone(&db)).await;
        let store = Arc::new(RemoteNotes::new(&base_url, USER, Duration::from_secs(5)).unwrap());

        let session = EditorSession::open(store, note_id).await.unwrap();
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(session.run(rx));

        tx.send(SessionEvent::Edit("Hello brave world".into()))
            .await
            .unwrap();
        tx.send(SessionEvent::SaveNow).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(SessionEvent::Close).await.unwrap();
        let sync = handle.await.unwrap();

        assert_eq!(sync.baseline(), "Hello brave world");
        let db = db.lock().unwrap();
        assert_eq!(
            db.get_note_content(note_id, USER).unwrap().unwrap(),
            "Hello brave world"
        );
    }
}
