//! Domain records shared by the timer, note manager and history aggregator,
//! plus the wire shapes the consultation backend speaks.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Lifecycle status of a consultation, as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsultationStatus {
    Pendente,
    Aceita,
    Recusada,
    Confirmada,
    #[serde(other)]
    Unknown,
}

/// Consultation record, identity owned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultationSession {
    #[serde(rename = "id_consulta", alias = "id", deserialize_with = "deserialize_id")]
    pub id: String,
    pub status: ConsultationStatus,
    #[serde(rename = "duracao_ms", default)]
    pub duration_ms: Option<u64>,
}

/// The single "current" note of a consultation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNote {
    pub id: Option<String>,
    pub consultation_id: String,
    pub patient_id: Option<String>,
    pub content: String,
    pub last_edited_at: Option<DateTime<Utc>>,
}

impl SessionNote {
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

/// Read-only projection of a past note for a patient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalNote {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub content: String,
    pub linked_consultation_id: Option<String>,
}

// ============================================================================
// Wire shapes
// ============================================================================

/// Body of `PUT /consultas/{id}/duracao`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeDurationRequest {
    pub duracao_ms: u64,
}

/// Body of `POST`/`PUT /consultas/{id}/session-note`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteWriteRequest {
    pub id_paciente: String,
    pub conteudo: String,
}

/// Note record as returned by the session-note and history endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRecord {
    #[serde(alias = "id", default, deserialize_with = "deserialize_opt_id")]
    pub id_anotacao: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub id_consulta: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub id_paciente: Option<String>,
    #[serde(default)]
    pub conteudo: String,
    #[serde(default, alias = "created_at")]
    pub data_criacao: Option<String>,
    #[serde(default, alias = "updated_at")]
    pub data_edicao: Option<String>,
}

impl NoteRecord {
    /// Convert into the current-note shape, filling ids the response omitted
    pub fn into_session_note(self, consultation_id: &str, patient_id: Option<&str>) -> SessionNote {
        let last_edited_at = self
            .data_edicao
            .as_deref()
            .or(self.data_criacao.as_deref())
            .and_then(parse_timestamp);
        SessionNote {
            id: self.id_anotacao,
            consultation_id: self.id_consulta.unwrap_or_else(|| consultation_id.to_string()),
            patient_id: self.id_paciente.or_else(|| patient_id.map(str::to_string)),
            content: self.conteudo,
            last_edited_at,
        }
    }

    /// Convert into a history entry; records without an identity are dropped
    pub fn into_historical(self) -> Option<HistoricalNote> {
        let id = self.id_anotacao?;
        Some(HistoricalNote {
            id,
            created_at: self.data_criacao.as_deref().and_then(parse_timestamp),
            content: self.conteudo,
            linked_consultation_id: self.id_consulta,
        })
    }
}

/// Structured error body returned with non-2xx responses
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default, alias = "mensagem", alias = "message")]
    pub error: Option<String>,
}

/// Parse a backend timestamp: RFC 3339, or a naive timestamp taken as UTC
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// The backend is inconsistent about numeric vs string ids; normalize to String.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_opt_id(deserializer)?
        .ok_or_else(|| serde::de::Error::custom("missing identifier"))
}

fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) if s.is_empty() => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "unexpected identifier: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consultation_numeric_id_and_status() {
        let json = r#"{"id_consulta": 42, "status": "confirmada", "duracao_ms": 7000}"#;
        let consultation: ConsultationSession = serde_json::from_str(json).unwrap();
        assert_eq!(consultation.id, "42");
        assert_eq!(consultation.status, ConsultationStatus::Confirmada);
        assert_eq!(consultation.duration_ms, Some(7000));
    }

    #[test]
    fn test_unknown_status_tolerated() {
        let json = r#"{"id": "c-1", "status": "remarcada"}"#;
        let consultation: ConsultationSession = serde_json::from_str(json).unwrap();
        assert_eq!(consultation.status, ConsultationStatus::Unknown);
        assert!(consultation.duration_ms.is_none());
    }

    #[test]
    fn test_note_record_fills_missing_context() {
        let json = r#"{"id_anotacao": 9, "conteudo": "Paciente relatou melhora"}"#;
        let record: NoteRecord = serde_json::from_str(json).unwrap();
        let note = record.into_session_note("c-1", Some("p-1"));
        assert_eq!(note.id.as_deref(), Some("9"));
        assert_eq!(note.consultation_id, "c-1");
        assert_eq!(note.patient_id.as_deref(), Some("p-1"));
        assert!(note.has_content());
    }

    #[test]
    fn test_historical_requires_identity() {
        let record = NoteRecord {
            id_anotacao: None,
            id_consulta: None,
            id_paciente: None,
            conteudo: "orphan".to_string(),
            data_criacao: None,
            data_edicao: None,
        };
        assert!(record.into_historical().is_none());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2024-03-01T10:00:00Z").is_some());
        assert!(parse_timestamp("2024-03-01T10:00:00.123").is_some());
        assert!(parse_timestamp("2024-03-01 10:00:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_error_body_aliases() {
        let body: ErrorBody = serde_json::from_str(r#"{"mensagem": "Consulta já finalizada"}"#).unwrap();
        assert_eq!(body.error.as_deref(), Some("Consulta já finalizada"));
        let body: ErrorBody = serde_json::from_str(r#"{"detail": "x"}"#).unwrap();
        assert!(body.error.is_none());
    }
}
