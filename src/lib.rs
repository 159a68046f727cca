//! Consultation session tracker: a drift-corrected, reload-safe consultation
//! timer and a per-consultation session note with patient history, synced
//! to the consultation backend.

pub mod activity_log;
pub mod api_client;
pub mod auth;
pub mod config;
pub mod gateway;
pub mod history;
pub mod models;
pub mod notes;
pub mod store;
pub mod timer;
pub mod view;

pub use api_client::ApiClient;
pub use config::Config;
pub use gateway::{FailureKind, SyncError, SyncGateway};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use timer::{TimerMachine, TimerState};
pub use view::{ConsultationView, Feedback, SessionContext, ViewEvent, ViewSnapshot};
