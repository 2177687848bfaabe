//! HTTP client for the notes API.
//!
//! [`RemoteNotes`] is the network-backed implementation of the
//! [`NoteStore`](crate::session::NoteStore) boundary the editor session
//! talks to. HTTP statuses map back onto the error taxonomy so the
//! controller can tell a retryable transport failure from a permanent
//! rejection.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{NoteError, NoteResult};
use crate::models::{Note, NoteWithTags};
use crate::patch::PatchSet;
use crate::session::NoteStore;

/// Header carrying the caller's identity. Session auth terminates at
/// the fronting layer, which injects this header.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Serialize)]
struct UpdateContentRequest<'a> {
    patches: &'a PatchSet,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    failed: Option<usize>,
    #[serde(default)]
    total: Option<usize>,
}

/// Remote persistence boundary over HTTP
pub struct RemoteNotes {
    client: Client,
    base_url: String,
    user_id: String,
}

impl RemoteNotes {
    /// Create a client for the given API base URL
    pub fn new(
        base_url: impl Into<String>,
        user_id: impl Into<String>,
        timeout: Duration,
    ) -> NoteResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NoteError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
        })
    }

    async fn check(&self, response: Response) -> NoteResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: ErrorBody = response.json().await.unwrap_or(ErrorBody {
            error: format!("HTTP {status}"),
            failed: None,
            total: None,
        });
        Err(match status {
            StatusCode::NOT_FOUND => NoteError::NotFound(body.error),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => NoteError::Unauthorized(body.error),
            StatusCode::CONFLICT => NoteError::PatchApply {
                failed: body.failed.unwrap_or(0),
                total: body.total.unwrap_or(0),
            },
            StatusCode::BAD_REQUEST => NoteError::validation("request", body.error),
            _ => NoteError::Network(format!("HTTP {status}: {}", body.error)),
        })
    }
}

#[async_trait]
impl NoteStore for RemoteNotes {
    async fn get_note(&self, id: Uuid) -> NoteResult<Note> {
        let response = self
            .client
            .get(format!("{}/notes/{}", self.base_url, id))
            .header(USER_HEADER, &self.user_id)
            .send()
            .await
            .map_err(|e| NoteError::Network(e.to_string()))?;
        let note: NoteWithTags = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| NoteError::Network(e.to_string()))?;
        Ok(note.note)
    }

    async fn get_content(&self, id: Uuid) -> NoteResult<String> {
        let response = self
            .client
            .get(format!("{}/notes/{}/content", self.base_url, id))
            .header(USER_HEADER, &self.user_id)
            .send()
            .await
            .map_err(|e| NoteError::Network(e.to_string()))?;
        let body: ContentResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| NoteError::Network(e.to_string()))?;
        Ok(body.content)
    }

    async fn update_content(&self, id: Uuid, patches: &PatchSet) -> NoteResult<Note> {
        tracing::debug!(note_id = %id, hunks = patches.len(), "sending patch set");
        let response = self
            .client
            .post(format!("{}/notes/{}/content", self.base_url, id))
            .header(USER_HEADER, &self.user_id)
            .json(&UpdateContentRequest { patches })
            .send()
            .await
            .map_err(|e| NoteError::Network(e.to_string()))?;
        self.check(response)
            .await?
            .json()
            .await
            .map_err(|e| NoteError::Network(e.to_string()))
    }
}
