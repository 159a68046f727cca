//! Session Note Manager
//!
//! Keeps at most one "current" note per consultation. The manager holds the
//! note identity once the backend has assigned one; every later save is an
//! update against it.
//!
//! Backend calls are split into a prepare step (local validation, returns an
//! owned request), the gateway call, and an apply step that checks the
//! response still belongs to the consultation in view.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::activity_log;
use crate::gateway::{SyncError, SyncGateway};
use crate::models::SessionNote;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NoteError {
    #[error("Note content is empty")]
    EmptyContent,
    #[error("No consultation or patient is loaded")]
    MissingContext,
    #[error("A save is already in progress")]
    SaveInProgress,
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl NoteError {
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::EmptyContent | Self::MissingContext | Self::SaveInProgress)
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyContent => "Write something before saving the note.".to_string(),
            Self::MissingContext => {
                "Open a consultation with a patient before saving a note.".to_string()
            }
            Self::SaveInProgress => "The note is still being saved.".to_string(),
            Self::Sync(e) => e.user_message(),
        }
    }
}

/// Render mode of the current note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteMode {
    Edit,
    Display,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveAction {
    Create,
    Update { note_id: String },
}

impl SaveAction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update { .. } => "update",
        }
    }
}

/// A validated save, ready to be sent through the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub consultation_id: String,
    pub patient_id: String,
    pub content: String,
    pub action: SaveAction,
}

/// Result of applying a backend response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The response was adopted; carries the current note identity, if any
    Current(Option<String>),
    /// The view moved to another consultation; response ignored
    Discarded,
}

/// Render projection of the note area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteView {
    pub mode: NoteMode,
    /// Draft text in Edit mode, saved content in Display mode
    pub text: String,
    pub current_note_id: Option<String>,
    pub save_enabled: bool,
    pub edit_enabled: bool,
    pub saving: bool,
}

/// Note state of one consultation.
///
/// A manager is bound to its consultation for its whole lifetime. Navigating
/// elsewhere drops the owning view, which abandons any in-flight response
/// along with it; `apply_*` still refuses a response issued for another
/// consultation.
#[derive(Debug, Clone)]
pub struct NoteManager {
    consultation_id: Option<String>,
    patient_id: Option<String>,
    current_note_id: Option<String>,
    mode: NoteMode,
    draft: String,
    saved_content: String,
    saving: bool,
}

impl NoteManager {
    pub fn new(consultation_id: Option<&str>, patient_id: Option<&str>) -> Self {
        Self {
            consultation_id: consultation_id.map(str::to_string),
            patient_id: patient_id.map(str::to_string),
            current_note_id: None,
            mode: NoteMode::Edit,
            draft: String::new(),
            saved_content: String::new(),
            saving: false,
        }
    }

    pub fn consultation_id(&self) -> Option<&str> {
        self.consultation_id.as_deref()
    }

    pub fn current_note_id(&self) -> Option<&str> {
        self.current_note_id.as_deref()
    }

    pub fn mode(&self) -> NoteMode {
        self.mode
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Consultation whose current note should be fetched
    pub fn begin_load(&self) -> Result<String, NoteError> {
        self.consultation_id.clone().ok_or(NoteError::MissingContext)
    }

    pub fn apply_loaded(
        &mut self,
        consultation_id: &str,
        result: Result<Option<SessionNote>, SyncError>,
    ) -> Result<Applied, NoteError> {
        if !self.is_current(consultation_id, "load_current_note") {
            return Ok(Applied::Discarded);
        }

        match result {
            Ok(Some(note)) if note.has_content() => {
                activity_log::log_note_sync(
                    consultation_id,
                    note.id.as_deref(),
                    "load",
                    note.content.chars().count(),
                    true,
                    None,
                );
                self.current_note_id = note.id;
                self.saved_content = note.content;
                self.draft.clear();
                self.mode = NoteMode::Display;
                Ok(Applied::Current(self.current_note_id.clone()))
            }
            Ok(_) => {
                debug!(consultation_id = %consultation_id, "No current note, entering edit mode");
                self.current_note_id = None;
                self.saved_content.clear();
                self.draft.clear();
                self.mode = NoteMode::Edit;
                Ok(Applied::Current(None))
            }
            Err(e) => {
                activity_log::log_note_sync(consultation_id, None, "load", 0, false, Some(&e.to_string()));
                self.mode = NoteMode::Edit;
                Err(e.into())
            }
        }
    }

    pub async fn load_current_note(&mut self, gateway: &dyn SyncGateway) -> Result<Applied, NoteError> {
        let consultation_id = self.begin_load()?;
        let result = gateway.get_current_note(&consultation_id).await;
        self.apply_loaded(&consultation_id, result)
    }

    // ------------------------------------------------------------------
    // Editing
    // ------------------------------------------------------------------

    /// Switch from Display to Edit, pre-filled with the saved content
    pub fn edit(&mut self) {
        if self.mode == NoteMode::Display {
            self.draft = self.saved_content.clone();
            self.mode = NoteMode::Edit;
        }
    }

    pub fn set_draft(&mut self, text: &str) {
        if self.mode == NoteMode::Edit {
            self.draft = text.to_string();
        }
    }

    // ------------------------------------------------------------------
    // Saving
    // ------------------------------------------------------------------

    /// Validate locally and mark a save as in flight
    pub fn prepare_save(&mut self, content: &str) -> Result<SaveRequest, NoteError> {
        if self.saving {
            return Err(NoteError::SaveInProgress);
        }
        if content.trim().is_empty() {
            return Err(NoteError::EmptyContent);
        }
        let (Some(consultation_id), Some(patient_id)) =
            (self.consultation_id.clone(), self.patient_id.clone())
        else {
            return Err(NoteError::MissingContext);
        };

        self.draft = content.to_string();
        self.mode = NoteMode::Edit;
        self.saving = true;

        let action = match &self.current_note_id {
            Some(note_id) => SaveAction::Update {
                note_id: note_id.clone(),
            },
            None => SaveAction::Create,
        };
        Ok(SaveRequest {
            consultation_id,
            patient_id,
            content: content.to_string(),
            action,
        })
    }

    pub fn apply_save(
        &mut self,
        request: &SaveRequest,
        result: Result<SessionNote, SyncError>,
    ) -> Result<Applied, NoteError> {
        // Only one save is ever in flight, so this response ends it either way
        self.saving = false;
        if !self.is_current(&request.consultation_id, "save_note") {
            return Ok(Applied::Discarded);
        }
        let char_count = request.content.chars().count();

        let note = match result {
            Ok(note) => note,
            Err(e) => {
                activity_log::log_note_sync(
                    &request.consultation_id,
                    self.current_note_id.as_deref(),
                    request.action.as_str(),
                    char_count,
                    false,
                    Some(&e.to_string()),
                );
                // Draft and identity stay exactly as before the attempt
                return Err(e.into());
            }
        };

        // Updates stay bound to the identity they were issued against
        let note_id = match (&request.action, note.id) {
            (SaveAction::Update { note_id }, _) => note_id.clone(),
            (SaveAction::Create, Some(id)) => id,
            (SaveAction::Create, None) => {
                let e = SyncError::InvalidResponse("created note has no identifier".to_string());
                activity_log::log_note_sync(
                    &request.consultation_id,
                    None,
                    "create",
                    char_count,
                    false,
                    Some(&e.to_string()),
                );
                return Err(e.into());
            }
        };

        activity_log::log_note_sync(
            &request.consultation_id,
            Some(&note_id),
            request.action.as_str(),
            char_count,
            true,
            None,
        );
        self.current_note_id = Some(note_id);
        self.saved_content = request.content.clone();
        self.draft.clear();
        self.mode = NoteMode::Display;
        Ok(Applied::Current(self.current_note_id.clone()))
    }

    pub async fn save(&mut self, gateway: &dyn SyncGateway, content: &str) -> Result<Applied, NoteError> {
        let request = self.prepare_save(content)?;
        let result = match request.action {
            SaveAction::Create => {
                gateway
                    .create_note(&request.consultation_id, &request.patient_id, &request.content)
                    .await
            }
            SaveAction::Update { .. } => {
                gateway
                    .update_note(&request.consultation_id, &request.patient_id, &request.content)
                    .await
            }
        };
        self.apply_save(&request, result)
    }

    pub fn view(&self) -> NoteView {
        let text = match self.mode {
            NoteMode::Edit => self.draft.clone(),
            NoteMode::Display => self.saved_content.clone(),
        };
        NoteView {
            mode: self.mode,
            save_enabled: self.mode == NoteMode::Edit
                && !self.saving
                && !self.draft.trim().is_empty()
                && self.consultation_id.is_some()
                && self.patient_id.is_some(),
            edit_enabled: self.mode == NoteMode::Display,
            saving: self.saving,
            current_note_id: self.current_note_id.clone(),
            text,
        }
    }

    /// Whether a response for `consultation_id` belongs to this manager
    fn is_current(&self, consultation_id: &str, operation: &str) -> bool {
        match self.consultation_id.as_deref() {
            Some(current) if current == consultation_id => true,
            current => {
                activity_log::log_stale_response(operation, consultation_id, current.unwrap_or("none"));
                false
            }
        }
    }
}
