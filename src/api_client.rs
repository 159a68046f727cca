//! Consultation backend HTTP client
//!
//! reqwest implementation of the [`SyncGateway`] against the consultation
//! REST API. Every request carries the bearer credential; a missing or
//! expired credential fails before any network traffic.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::activity_log;
use crate::auth::{AuthState, Credential};
use crate::gateway::{SyncError, SyncGateway};
use crate::models::{
    ConsultationSession, ErrorBody, FinalizeDurationRequest, HistoricalNote, NoteRecord,
    NoteWriteRequest, SessionNote,
};

/// Default backend URL (local development)
pub const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Connect timeout for backend requests
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest raw (non-JSON) error body shown to the user
const MAX_RAW_ERROR_CHARS: usize = 300;

#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error("Invalid URL: {0}")]
    UrlError(String),

    #[error("Failed to create HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// HTTP gateway to the consultation backend
#[derive(Debug, Clone)]
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
    auth_state: Arc<RwLock<AuthState>>,
}

impl ApiClient {
    pub fn new(base_url: &str, request_timeout: Duration, auth_state: AuthState) -> Result<Self, ApiClientError> {
        let cleaned_url = base_url.trim_end_matches('/');
        info!("Creating ApiClient with base_url: {}", cleaned_url);

        let parsed = url::Url::parse(cleaned_url)
            .map_err(|e| ApiClientError::UrlError(format!("Invalid URL '{}': {}", cleaned_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiClientError::UrlError(format!(
                "URL must use http or https scheme, got: {}",
                parsed.scheme()
            )));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: cleaned_url.to_string(),
            auth_state: Arc::new(RwLock::new(auth_state)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the held credential (after a fresh login)
    pub async fn set_auth_state(&self, state: AuthState) {
        *self.auth_state.write().await = state;
    }

    pub async fn get_auth_state(&self) -> AuthState {
        self.auth_state.read().await.clone()
    }

    async fn bearer_token(&self, operation: &str) -> Result<String, SyncError> {
        match self.auth_state.read().await.credential() {
            Credential::Valid(token) => Ok(token),
            Credential::Missing => {
                activity_log::log_auth_failure(operation, "missing_credential");
                Err(SyncError::NotAuthenticated)
            }
            Credential::Expired => {
                activity_log::log_auth_failure(operation, "expired_credential");
                Err(SyncError::SessionExpired)
            }
        }
    }

    fn consulta_url(&self, consultation_id: &str, suffix: &str) -> String {
        format!(
            "{}/consultas/{}{}",
            self.base_url,
            urlencoding::encode(consultation_id),
            suffix
        )
    }

    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, SyncError> {
        let token = self.bearer_token(operation).await?;
        request
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)
    }

    /// Handle HTTP response and convert to the gateway error taxonomy
    async fn handle_response<T: DeserializeOwned>(
        &self,
        operation: &str,
        response: reqwest::Response,
    ) -> Result<T, SyncError> {
        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(transport_error);
        }

        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                activity_log::log_auth_failure(operation, "rejected_by_server");
                Err(SyncError::SessionExpired)
            }
            reqwest::StatusCode::NOT_FOUND => Err(SyncError::NotFound(response.url().path().to_string())),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(SyncError::Rejected {
                    status: status.as_u16(),
                    message: server_message(&body),
                })
            }
        }
    }
}

#[async_trait]
impl SyncGateway for ApiClient {
    async fn finalize_duration(
        &self,
        consultation_id: &str,
        duration_ms: u64,
    ) -> Result<ConsultationSession, SyncError> {
        let request = self
            .http_client
            .put(self.consulta_url(consultation_id, "/duracao"))
            .json(&FinalizeDurationRequest {
                duracao_ms: duration_ms,
            });
        let response = self.send("finalize_duration", request).await?;
        self.handle_response("finalize_duration", response).await
    }

    async fn get_consultation(&self, consultation_id: &str) -> Result<ConsultationSession, SyncError> {
        let request = self.http_client.get(self.consulta_url(consultation_id, ""));
        let response = self.send("get_consultation", request).await?;
        self.handle_response("get_consultation", response).await
    }

    async fn get_current_note(&self, consultation_id: &str) -> Result<Option<SessionNote>, SyncError> {
        let request = self
            .http_client
            .get(self.consulta_url(consultation_id, "/session-note"));
        let response = self.send("get_current_note", request).await?;
        match self
            .handle_response::<NoteRecord>("get_current_note", response)
            .await
        {
            Ok(record) => Ok(Some(record.into_session_note(consultation_id, None))),
            Err(SyncError::NotFound(_)) => {
                debug!(consultation_id = %consultation_id, "No session note yet");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn create_note(
        &self,
        consultation_id: &str,
        patient_id: &str,
        content: &str,
    ) -> Result<SessionNote, SyncError> {
        let request = self
            .http_client
            .post(self.consulta_url(consultation_id, "/session-note"))
            .json(&NoteWriteRequest {
                id_paciente: patient_id.to_string(),
                conteudo: content.to_string(),
            });
        let response = self.send("create_note", request).await?;
        let record: NoteRecord = self.handle_response("create_note", response).await?;
        Ok(with_sent_content(
            record.into_session_note(consultation_id, Some(patient_id)),
            content,
        ))
    }

    async fn update_note(
        &self,
        consultation_id: &str,
        patient_id: &str,
        content: &str,
    ) -> Result<SessionNote, SyncError> {
        let request = self
            .http_client
            .put(self.consulta_url(consultation_id, "/session-note"))
            .json(&NoteWriteRequest {
                id_paciente: patient_id.to_string(),
                conteudo: content.to_string(),
            });
        let response = self.send("update_note", request).await?;
        let record: NoteRecord = self.handle_response("update_note", response).await?;
        Ok(with_sent_content(
            record.into_session_note(consultation_id, Some(patient_id)),
            content,
        ))
    }

    async fn list_history(&self, patient_id: &str) -> Result<Vec<HistoricalNote>, SyncError> {
        let url = format!(
            "{}/anotacoes/paciente/{}",
            self.base_url,
            urlencoding::encode(patient_id)
        );
        let request = self.http_client.get(url);
        let response = self.send("list_history", request).await?;
        let records: Vec<NoteRecord> = self.handle_response("list_history", response).await?;
        Ok(records
            .into_iter()
            .filter_map(NoteRecord::into_historical)
            .collect())
    }
}

/// Write responses may echo only the identity; keep the content we sent
fn with_sent_content(mut note: SessionNote, content: &str) -> SessionNote {
    if note.content.is_empty() {
        note.content = content.to_string();
    }
    note
}

fn transport_error(e: reqwest::Error) -> SyncError {
    if e.is_decode() {
        SyncError::InvalidResponse(e.to_string())
    } else {
        SyncError::Network(e.to_string())
    }
}

/// Extract the server's message from a structured error body, falling back to
/// a short plain-text body.
fn server_message(body: &str) -> Option<String> {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.error.filter(|m| !m.trim().is_empty()) {
            return Some(message);
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.starts_with('{') || trimmed.starts_with('<') {
        return None;
    }
    Some(trimmed.chars().take(MAX_RAW_ERROR_CHARS).collect())
}
