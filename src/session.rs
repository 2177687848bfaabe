//! Async driver for an editing session.
//!
//! Wires the [`EditSync`](crate::editor::EditSync) state machine to a
//! persistence boundary and a real timer. The driver processes events
//! from the UI (keystrokes, manual save, close) over a channel, sleeps
//! on the armed debounce deadline, and runs the save request as a
//! spawned task so keystrokes stay responsive while a save is in
//! flight. Save failures are absorbed into the state machine; nothing
//! here panics or tears down the session.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::editor::{EditSync, SaveRequest};
use crate::error::{NoteError, NoteResult};
use crate::models::Note;
use crate::patch::PatchSet;

/// Persistence boundary for note content, as seen by the editor.
///
/// `update_content` is the single writer of stored note content: it
/// loads the current copy, applies the patch set, and either persists
/// the result atomically or rejects the whole operation. Implemented by
/// the embedded store ([`crate::database::LocalNotes`]) and the HTTP
/// client ([`crate::client::RemoteNotes`]).
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Fetch a note's metadata and content
    async fn get_note(&self, id: Uuid) -> NoteResult<Note>;

    /// Fetch exactly the stored content, no normalization
    async fn get_content(&self, id: Uuid) -> NoteResult<String>;

    /// Apply a patch set to the stored content
    async fn update_content(&self, id: Uuid, patches: &PatchSet) -> NoteResult<Note>;
}

/// Events fed to [`EditorSession::run`] by the UI layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The editor buffer changed (full new value)
    Edit(String),
    /// Manual save trigger (keyboard shortcut)
    SaveNow,
    /// Re-fetch server content and re-baseline (failure recovery)
    Rebaseline,
    /// Navigation away; flush pending changes and stop
    Close,
}

/// One editing session for one note.
pub struct EditorSession<S: NoteStore + 'static> {
    note_id: Uuid,
    store: Arc<S>,
    sync: EditSync,
}

impl<S: NoteStore + 'static> EditorSession<S> {
    /// Open a session, seeding buffer and baseline from stored content.
    pub async fn open(store: Arc<S>, note_id: Uuid) -> NoteResult<Self> {
        let content = store.get_content(note_id).await?;
        Ok(Self {
            note_id,
            store,
            sync: EditSync::new(content),
        })
    }

    /// The underlying state machine, for status display
    pub fn sync(&self) -> &EditSync {
        &self.sync
    }

    fn spawn_save(&self, request: SaveRequest) -> JoinHandle<NoteResult<Note>> {
        let store = Arc::clone(&self.store);
        let note_id = self.note_id;
        tokio::spawn(async move {
            store.update_content(note_id, &request.patches).await
        })
    }

    /// Drive the session until the event channel closes.
    ///
    /// Returns the final state machine so callers can inspect buffer
    /// and baseline (tests, status reporting).
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) -> EditSync {
        let mut pending: Option<JoinHandle<NoteResult<Note>>> = None;

        loop {
            let deadline = self.sync.timer_deadline();
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(SessionEvent::Edit(text)) => {
                            self.sync.edit(text, Instant::now());
                        }
                        Some(SessionEvent::SaveNow) => {
                            if let Some(req) = self.sync.save_now() {
                                pending = Some(self.spawn_save(req));
                            }
                        }
                        Some(SessionEvent::Rebaseline) => {
                            match self.store.get_content(self.note_id).await {
                                Ok(content) => self.sync.rebaseline(content, Instant::now()),
                                Err(e) => {
                                    tracing::warn!(error = %e, "re-baseline fetch failed");
                                }
                            }
                        }
                        Some(SessionEvent::Close) | None => break,
                    }
                }
                _ = async {
                    let d = deadline.expect("guarded");
                    tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await
                }, if deadline.is_some() => {
                    if let Some(req) = self.sync.poll_timer(Instant::now()) {
                        pending = Some(self.spawn_save(req));
                    }
                }
                result = async { pending.as_mut().expect("guarded").await }, if pending.is_some() => {
                    pending = None;
                    self.settle(result);
                }
            }
        }

        // Final flush: wait out an in-flight save, then push any
        // remaining unsaved changes once.
        if let Some(handle) = pending.take() {
            let result = handle.await;
            self.settle(result);
        }
        if let Some(req) = self.sync.save_now() {
            let result = self.store.update_content(self.note_id, &req.patches).await;
            match result {
                Ok(note) => {
                    tracing::debug!(note_id = %note.id, "final flush saved");
                    self.sync.save_succeeded(Instant::now());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "final flush failed");
                    self.sync.save_failed(e.is_permanent(), Instant::now());
                }
            }
        }

        self.sync
    }

    fn settle(&mut self, result: Result<NoteResult<Note>, tokio::task::JoinError>) {
        match result {
            Ok(Ok(note)) => {
                tracing::debug!(note_id = %note.id, "save acknowledged");
                self.sync.save_succeeded(Instant::now());
            }
            Ok(Err(e)) => {
                if let NoteError::PatchApply { failed, total } = &e {
                    tracing::warn!(failed, total, "server rejected patch set");
                } else {
                    tracing::warn!(error = %e, "save failed");
                }
                // Permanent rejections (deleted note, revoked access)
                // stop the automatic retry; the UI surfaces SaveFailed
                // and a manual trigger or re-baseline starts over.
                self.sync.save_failed(e.is_permanent(), Instant::now());
            }
            Err(join_err) => {
                tracing::error!(error = %join_err, "save task aborted");
                self.sync.save_failed(false, Instant::now());
            }
        }
    }
}
