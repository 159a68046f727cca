//! History Aggregator
//!
//! Read-only list of a patient's past notes, minus the note currently shown
//! as the consultation's current note.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity_log;
use crate::gateway::{SyncError, SyncGateway};
use crate::models::HistoricalNote;

/// Default length of the collapsed preview of standalone entries
pub const DEFAULT_PREVIEW_CHARS: usize = 160;

/// Action offered on a history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryAction {
    /// Navigate to the consultation the note was written in
    OpenConsultation { consultation_id: String },
    /// Reveal the full text inline
    RevealFullText,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub note_id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub preview: String,
    pub full_text: String,
    pub revealed: bool,
    pub action: HistoryAction,
}

impl HistoryEntry {
    /// Text to render given the reveal state
    pub fn visible_text(&self) -> &str {
        if self.revealed {
            &self.full_text
        } else {
            &self.preview
        }
    }
}

/// Render projection of the history panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "entries", rename_all = "snake_case")]
pub enum HistoryView {
    /// Explicit "no history" affordance
    Empty,
    Entries(Vec<HistoryEntry>),
}

impl HistoryView {
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Entries(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, note_id: &str) -> bool {
        match self {
            Self::Empty => false,
            Self::Entries(entries) => entries.iter().any(|e| e.note_id == note_id),
        }
    }

    /// Toggle the full-text reveal of a standalone entry; returns whether
    /// an entry changed.
    pub fn reveal(&mut self, note_id: &str) -> bool {
        let Self::Entries(entries) = self else {
            return false;
        };
        match entries.iter_mut().find(|e| e.note_id == note_id) {
            Some(entry) if entry.action == HistoryAction::RevealFullText => {
                entry.revealed = !entry.revealed;
                true
            }
            _ => false,
        }
    }
}

/// Build the history projection from the raw list.
///
/// Entries are ordered newest first; undated entries sort last.
pub fn build_history(
    notes: Vec<HistoricalNote>,
    current_note_id: Option<&str>,
    preview_chars: usize,
) -> HistoryView {
    let mut kept: Vec<HistoricalNote> = notes
        .into_iter()
        .filter(|note| Some(note.id.as_str()) != current_note_id)
        .collect();

    if kept.is_empty() {
        return HistoryView::Empty;
    }

    kept.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let entries = kept
        .into_iter()
        .map(|note| {
            let action = match note.linked_consultation_id {
                Some(consultation_id) => HistoryAction::OpenConsultation { consultation_id },
                None => HistoryAction::RevealFullText,
            };
            HistoryEntry {
                note_id: note.id,
                created_at: note.created_at,
                preview: preview(&note.content, preview_chars),
                full_text: note.content,
                revealed: false,
                action,
            }
        })
        .collect();

    HistoryView::Entries(entries)
}

/// Fetch and project the patient's history, excluding the current note
pub async fn load_history(
    gateway: &dyn SyncGateway,
    patient_id: &str,
    current_note_id: Option<&str>,
    preview_chars: usize,
) -> Result<HistoryView, SyncError> {
    let notes = gateway.list_history(patient_id).await?;
    let view = build_history(notes, current_note_id, preview_chars);
    activity_log::log_history_load(view.len(), current_note_id.is_some());
    Ok(view)
}

fn preview(content: &str, max_chars: usize) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::FakeGateway;
    use chrono::TimeZone;

    fn note(id: &str, day: u32, linked: Option<&str>) -> HistoricalNote {
        HistoricalNote {
            id: id.to_string(),
            created_at: Some(Utc.with_ymd_and_hms(2024, 3, day, 10, 0, 0).unwrap()),
            content: format!("Anotação {}", id),
            linked_consultation_id: linked.map(str::to_string),
        }
    }

    #[test]
    fn test_excludes_current_note() {
        let notes = vec![note("n-1", 1, Some("c-1")), note("n-2", 2, None)];
        let view = build_history(notes, Some("n-2"), DEFAULT_PREVIEW_CHARS);
        assert!(!view.contains("n-2"));
        assert!(view.contains("n-1"));
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_empty_renders_explicit_state() {
        assert_eq!(build_history(Vec::new(), None, 10), HistoryView::Empty);

        // Only the current note: nothing left to show
        let view = build_history(vec![note("n-1", 1, None)], Some("n-1"), 10);
        assert_eq!(view, HistoryView::Empty);
        assert!(view.is_empty());
    }

    #[test]
    fn test_newest_first() {
        let notes = vec![note("old", 1, None), note("new", 20, None), note("mid", 10, None)];
        let HistoryView::Entries(entries) = build_history(notes, None, 10) else {
            panic!("expected entries");
        };
        let ids: Vec<_> = entries.iter().map(|e| e.note_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_linked_vs_standalone_actions() {
        let notes = vec![note("n-1", 1, Some("c-7")), note("n-2", 2, None)];
        let HistoryView::Entries(entries) = build_history(notes, None, 10) else {
            panic!("expected entries");
        };
        assert_eq!(entries[0].action, HistoryAction::RevealFullText);
        assert_eq!(
            entries[1].action,
            HistoryAction::OpenConsultation {
                consultation_id: "c-7".to_string()
            }
        );
    }

    #[test]
    fn test_reveal_toggles_standalone_only() {
        let mut standalone = note("n-2", 2, None);
        standalone.content = "x".repeat(50);
        let notes = vec![note("n-1", 1, Some("c-7")), standalone];
        let mut view = build_history(notes, None, 10);

        assert!(!view.reveal("n-1"));
        assert!(view.reveal("n-2"));
        let HistoryView::Entries(entries) = &view else {
            panic!("expected entries");
        };
        let entry = entries.iter().find(|e| e.note_id == "n-2").unwrap();
        assert_eq!(entry.visible_text().len(), 50);
        assert!(!view.reveal("missing"));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("ação", 10), "ação");
        assert_eq!(preview("ação terapêutica", 4), "ação…");
    }

    #[tokio::test]
    async fn test_load_history_via_gateway() {
        let gateway = FakeGateway::new().with_history(
            "p-1",
            vec![note("n-1", 1, Some("c-1")), note("n-2", 2, None)],
        );
        let view = load_history(&gateway, "p-1", Some("n-1"), DEFAULT_PREVIEW_CHARS)
            .await
            .unwrap();
        assert_eq!(view.len(), 1);
        assert!(!view.contains("n-1"));

        let view = load_history(&gateway, "p-unknown", None, DEFAULT_PREVIEW_CHARS)
            .await
            .unwrap();
        assert_eq!(view, HistoryView::Empty);
    }
}
