//! Sync Gateway
//!
//! The interface through which the timer and note manager reach the
//! consultation backend. Implementations hold no domain state of their own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ConsultationSession, HistoricalNote, SessionNote};

/// Backend call failures
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SyncError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Session expired")]
    SessionExpired,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Server rejected request ({}): {}", .status, .message.as_deref().unwrap_or("no details"))]
    Rejected { status: u16, message: Option<String> },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Coarse failure class, decides how the issuing component recovers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Authentication,
    Network,
    NotFound,
    Rejected,
}

impl SyncError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotAuthenticated | Self::SessionExpired => FailureKind::Authentication,
            Self::Network(_) => FailureKind::Network,
            Self::NotFound(_) => FailureKind::NotFound,
            Self::Rejected { .. } | Self::InvalidResponse(_) => FailureKind::Rejected,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        self.kind() == FailureKind::Authentication
    }

    /// Text shown to the user; server messages pass through verbatim
    pub fn user_message(&self) -> String {
        match self {
            Self::NotAuthenticated | Self::SessionExpired => {
                "Your session has expired. Please log in again.".to_string()
            }
            Self::Network(_) => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            Self::NotFound(_) => "The requested record was not found.".to_string(),
            Self::Rejected {
                message: Some(message),
                ..
            } if !message.trim().is_empty() => message.clone(),
            Self::Rejected { status, .. } => {
                format!("The server rejected the request (status {}).", status)
            }
            Self::InvalidResponse(_) => "The server sent an unexpected response.".to_string(),
        }
    }
}

/// Backend operations used by the tracker
#[async_trait]
pub trait SyncGateway: Send + Sync {
    /// `PUT /consultas/{id}/duracao`
    async fn finalize_duration(
        &self,
        consultation_id: &str,
        duration_ms: u64,
    ) -> Result<ConsultationSession, SyncError>;

    /// `GET /consultas/{id}`
    async fn get_consultation(&self, consultation_id: &str) -> Result<ConsultationSession, SyncError>;

    /// `GET /consultas/{id}/session-note`; a 404 is `Ok(None)`
    async fn get_current_note(&self, consultation_id: &str) -> Result<Option<SessionNote>, SyncError>;

    /// `POST /consultas/{id}/session-note`
    async fn create_note(
        &self,
        consultation_id: &str,
        patient_id: &str,
        content: &str,
    ) -> Result<SessionNote, SyncError>;

    /// `PUT /consultas/{id}/session-note`
    async fn update_note(
        &self,
        consultation_id: &str,
        patient_id: &str,
        content: &str,
    ) -> Result<SessionNote, SyncError>;

    /// `GET /anotacoes/paciente/{id}`
    async fn list_history(&self, patient_id: &str) -> Result<Vec<HistoricalNote>, SyncError>;
}

#[cfg(test)]
pub mod fake {
    //! Recording in-memory gateway for headless tests.

    use super::*;
    use crate::models::ConsultationStatus;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        FinalizeDuration(String, u64),
        GetConsultation(String),
        GetCurrentNote(String),
        CreateNote(String, String),
        UpdateNote(String, String),
        ListHistory(String),
    }

    #[derive(Debug, Default)]
    struct FakeState {
        calls: Vec<Call>,
        consultations: HashMap<String, ConsultationSession>,
        current_notes: HashMap<String, SessionNote>,
        history: HashMap<String, Vec<HistoricalNote>>,
        failures: Vec<(&'static str, SyncError)>,
        next_id: u32,
    }

    #[derive(Debug, Default)]
    pub struct FakeGateway {
        state: Mutex<FakeState>,
    }

    impl FakeGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_consultation(self, id: &str, status: ConsultationStatus) -> Self {
            self.state.lock().unwrap().consultations.insert(
                id.to_string(),
                ConsultationSession {
                    id: id.to_string(),
                    status,
                    duration_ms: None,
                },
            );
            self
        }

        pub fn with_current_note(self, consultation_id: &str, note_id: &str, content: &str) -> Self {
            self.state.lock().unwrap().current_notes.insert(
                consultation_id.to_string(),
                SessionNote {
                    id: Some(note_id.to_string()),
                    consultation_id: consultation_id.to_string(),
                    patient_id: None,
                    content: content.to_string(),
                    last_edited_at: Some(Utc::now()),
                },
            );
            self
        }

        pub fn with_history(self, patient_id: &str, notes: Vec<HistoricalNote>) -> Self {
            self.state
                .lock()
                .unwrap()
                .history
                .insert(patient_id.to_string(), notes);
            self
        }

        /// Make the next call of `operation` fail with `error`
        pub fn fail_next(&self, operation: &'static str, error: SyncError) {
            self.state.lock().unwrap().failures.push((operation, error));
        }

        pub fn calls(&self) -> Vec<Call> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls().iter().filter(|c| pred(c)).count()
        }

        fn record(&self, call: Call, operation: &'static str) -> Result<(), SyncError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call);
            if let Some(pos) = state.failures.iter().position(|(op, _)| *op == operation) {
                let (_, error) = state.failures.remove(pos);
                return Err(error);
            }
            Ok(())
        }

        fn store_note(&self, consultation_id: &str, patient_id: &str, content: &str, id: String) -> SessionNote {
            let mut state = self.state.lock().unwrap();
            let note = SessionNote {
                id: Some(id.clone()),
                consultation_id: consultation_id.to_string(),
                patient_id: Some(patient_id.to_string()),
                content: content.to_string(),
                last_edited_at: Some(Utc::now()),
            };
            state
                .current_notes
                .insert(consultation_id.to_string(), note.clone());

            // The backend lists every note of the patient, the current one included
            let history = state.history.entry(patient_id.to_string()).or_default();
            history.retain(|h| h.id != id);
            history.push(HistoricalNote {
                id,
                created_at: Some(Utc::now()),
                content: content.to_string(),
                linked_consultation_id: Some(consultation_id.to_string()),
            });
            note
        }
    }

    #[async_trait]
    impl SyncGateway for FakeGateway {
        async fn finalize_duration(
            &self,
            consultation_id: &str,
            duration_ms: u64,
        ) -> Result<ConsultationSession, SyncError> {
            self.record(
                Call::FinalizeDuration(consultation_id.to_string(), duration_ms),
                "finalize_duration",
            )?;
            let mut state = self.state.lock().unwrap();
            let consultation = state
                .consultations
                .entry(consultation_id.to_string())
                .or_insert_with(|| ConsultationSession {
                    id: consultation_id.to_string(),
                    status: ConsultationStatus::Aceita,
                    duration_ms: None,
                });
            consultation.status = ConsultationStatus::Confirmada;
            consultation.duration_ms = Some(duration_ms);
            Ok(consultation.clone())
        }

        async fn get_consultation(&self, consultation_id: &str) -> Result<ConsultationSession, SyncError> {
            self.record(Call::GetConsultation(consultation_id.to_string()), "get_consultation")?;
            self.state
                .lock()
                .unwrap()
                .consultations
                .get(consultation_id)
                .cloned()
                .ok_or_else(|| SyncError::NotFound(format!("consultas/{}", consultation_id)))
        }

        async fn get_current_note(&self, consultation_id: &str) -> Result<Option<SessionNote>, SyncError> {
            self.record(Call::GetCurrentNote(consultation_id.to_string()), "get_current_note")?;
            Ok(self
                .state
                .lock()
                .unwrap()
                .current_notes
                .get(consultation_id)
                .cloned())
        }

        async fn create_note(
            &self,
            consultation_id: &str,
            patient_id: &str,
            content: &str,
        ) -> Result<SessionNote, SyncError> {
            self.record(
                Call::CreateNote(consultation_id.to_string(), content.to_string()),
                "create_note",
            )?;
            let id = {
                let mut state = self.state.lock().unwrap();
                state.next_id += 1;
                format!("n-{}", state.next_id)
            };
            Ok(self.store_note(consultation_id, patient_id, content, id))
        }

        async fn update_note(
            &self,
            consultation_id: &str,
            patient_id: &str,
            content: &str,
        ) -> Result<SessionNote, SyncError> {
            self.record(
                Call::UpdateNote(consultation_id.to_string(), content.to_string()),
                "update_note",
            )?;
            let existing = self
                .state
                .lock()
                .unwrap()
                .current_notes
                .get(consultation_id)
                .and_then(|n| n.id.clone())
                .ok_or_else(|| SyncError::NotFound("session-note".to_string()))?;
            Ok(self.store_note(consultation_id, patient_id, content, existing))
        }

        async fn list_history(&self, patient_id: &str) -> Result<Vec<HistoricalNote>, SyncError> {
            self.record(Call::ListHistory(patient_id.to_string()), "list_history")?;
            Ok(self
                .state
                .lock()
                .unwrap()
                .history
                .get(patient_id)
                .cloned()
                .unwrap_or_default())
        }
    }
}
