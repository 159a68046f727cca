//! Keyed Persistent Store
//!
//! Client-local durable storage for per-consultation timer state. Each
//! consultation owns exactly one slot, addressed by a string key derived from
//! the consultation id, holding the serialized `{elapsedMs, isRunning,
//! resumeAnchor}` record.
//!
//! Storage location (file backend): ~/.consultation-tracker/store/<key>.json

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::timer::TimerState;

/// Prefix of every timer slot key
const TIMER_KEY_PREFIX: &str = "consulta_timer_";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize stored value: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Storage lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// String key-value slots that survive process restarts
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    fn remove(&self, key: &str) -> StoreResult<()>;
}

/// Deterministic slot key for a consultation's timer
pub fn timer_key(consultation_id: &str) -> String {
    format!("{}{}", TIMER_KEY_PREFIX, consultation_id)
}

/// Read the persisted timer for a consultation.
///
/// A slot that cannot be parsed is treated as absent so that a corrupted
/// entry never blocks the view from loading.
pub fn load_timer_state(
    store: &dyn KeyValueStore,
    consultation_id: &str,
) -> StoreResult<Option<TimerState>> {
    let key = timer_key(consultation_id);
    let Some(raw) = store.get(&key)? else {
        return Ok(None);
    };
    match serde_json::from_str::<TimerState>(&raw) {
        Ok(state) => Ok(Some(state.normalized())),
        Err(e) => {
            warn!(key = %key, "Discarding unreadable timer state: {}", e);
            Ok(None)
        }
    }
}

pub fn save_timer_state(
    store: &dyn KeyValueStore,
    consultation_id: &str,
    state: &TimerState,
) -> StoreResult<()> {
    let json = serde_json::to_string(state)?;
    store.set(&timer_key(consultation_id), &json)
}

pub fn clear_timer_state(store: &dyn KeyValueStore, consultation_id: &str) -> StoreResult<()> {
    store.remove(&timer_key(consultation_id))
}

/// One JSON file per key inside a base directory
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Consultation ids are opaque; keep them filesystem-safe
        self.base_dir
            .join(format!("{}.json", urlencoding::encode(key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(contents))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        {
            let file = fs::File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(value.as_bytes())?;
            writer.flush()?;
        }
        fs::rename(&tmp_path, &path)?;
        debug!(key = %key, "Stored slot");
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(key = %key, "Removed slot");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store, used by tests and by views that opt out of persistence
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots
            .lock()
            .map(|slots| slots.contains_key(key))
            .unwrap_or(false)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let slots = self.slots.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(slots.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut slots = self.slots.lock().map_err(|_| StoreError::Poisoned)?;
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut slots = self.slots.lock().map_err(|_| StoreError::Poisoned)?;
        slots.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn running_state() -> TimerState {
        TimerState {
            elapsed_ms: 5000,
            is_running: true,
            resume_anchor: Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()),
        }
    }

    #[test]
    fn test_timer_key_is_deterministic() {
        assert_eq!(timer_key("123"), "consulta_timer_123");
        assert_eq!(timer_key("123"), timer_key("123"));
        assert_ne!(timer_key("123"), timer_key("124"));
    }

    #[test]
    fn test_file_store_crud() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        assert!(store.get("a").unwrap().is_none());
        store.set("a", "{\"x\":1}").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("{\"x\":1}"));
        store.remove("a").unwrap();
        assert!(store.get("a").unwrap().is_none());

        // Removing a missing key is not an error
        store.remove("a").unwrap();
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::new(dir.path()).unwrap();
            save_timer_state(&store, "c-1", &running_state()).unwrap();
        }
        let reopened = FileStore::new(dir.path()).unwrap();
        let loaded = load_timer_state(&reopened, "c-1").unwrap().unwrap();
        assert_eq!(loaded, running_state());
    }

    #[test]
    fn test_file_store_escapes_unsafe_ids() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        save_timer_state(&store, "../escape", &running_state()).unwrap();
        assert!(load_timer_state(&store, "../escape").unwrap().is_some());
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_consultations_do_not_collide() {
        let store = MemoryStore::new();
        save_timer_state(&store, "c-1", &running_state()).unwrap();
        assert!(load_timer_state(&store, "c-2").unwrap().is_none());
        clear_timer_state(&store, "c-2").unwrap();
        assert!(load_timer_state(&store, "c-1").unwrap().is_some());
    }

    #[test]
    fn test_corrupt_slot_treated_as_absent() {
        let store = MemoryStore::new();
        store.set(&timer_key("c-1"), "not json").unwrap();
        assert!(load_timer_state(&store, "c-1").unwrap().is_none());
    }

    #[test]
    fn test_stored_record_shape() {
        let store = MemoryStore::new();
        save_timer_state(&store, "c-1", &running_state()).unwrap();
        let raw = store.get(&timer_key("c-1")).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["elapsedMs"], 5000);
        assert_eq!(value["isRunning"], true);
        assert_eq!(value["resumeAnchor"], 1_700_000_000_000i64);
    }
}
