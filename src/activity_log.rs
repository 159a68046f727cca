//! Activity Logging Module
//!
//! Structured activity logging for auditing and debugging.
//! IMPORTANT: This module must NEVER log clinical free text.
//!
//! What IS logged:
//! - Consultation IDs, note IDs, view IDs
//! - Timestamps and durations
//! - Event types and outcomes (success/failure)
//! - Counts and character lengths
//!
//! What is NOT logged:
//! - Session note content
//! - Historical note content
//! - Patient names
//! - Bearer credentials

use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Guard that must be held for the duration of the process
/// to ensure logs are flushed before exit
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the activity logging system
///
/// Sets up dual logging:
/// - Console output (human-readable, filtered by RUST_LOG or `default_level`)
/// - File output (JSON, daily rotation, under `log_dir`)
pub fn init_logging(log_dir: &Path, default_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "activity.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    LOG_GUARD.set(guard).ok();

    let file_layer = fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(non_blocking)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        );

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    info!(
        event = "logging_initialized",
        log_dir = %log_dir.display(),
        "Activity logging system initialized"
    );

    Ok(())
}

// ============================================================================
// View Lifecycle Events
// ============================================================================

/// Log a consultation view being opened
pub fn log_view_opened(view_id: &str, consultation_id: &str, has_patient: bool) {
    info!(
        event = "view_opened",
        view_id = %view_id,
        consultation_id = %consultation_id,
        has_patient = has_patient,
        "Consultation view opened"
    );
}

/// Log a consultation view being torn down
pub fn log_view_closed(view_id: &str, consultation_id: &str, reason: &str) {
    info!(
        event = "view_closed",
        view_id = %view_id,
        consultation_id = %consultation_id,
        reason = %reason,
        "Consultation view closed"
    );
}

// ============================================================================
// Timer Events
// ============================================================================

/// Log timer state transition
pub fn log_timer_transition(consultation_id: &str, from_state: &str, to_state: &str, elapsed_ms: u64) {
    info!(
        event = "timer_transition",
        consultation_id = %consultation_id,
        from_state = %from_state,
        to_state = %to_state,
        elapsed_ms = elapsed_ms,
        "Timer state changed"
    );
}

/// Log timer rehydration from the persistent store
pub fn log_timer_rehydrated(consultation_id: &str, elapsed_ms: u64, resumed: bool) {
    info!(
        event = "timer_rehydrated",
        consultation_id = %consultation_id,
        elapsed_ms = elapsed_ms,
        resumed = resumed,
        "Timer rehydrated"
    );
}

/// Log timer reset
pub fn log_timer_reset(consultation_id: &str) {
    info!(
        event = "timer_reset",
        consultation_id = %consultation_id,
        "Timer reset"
    );
}

/// Log a failure to persist timer state
pub fn log_persist_failure(consultation_id: &str, error: &str) {
    warn!(
        event = "timer_persist_failed",
        consultation_id = %consultation_id,
        error = %error,
        "Failed to persist timer state"
    );
}

// ============================================================================
// Backend Sync Events
// ============================================================================

/// Log duration finalization
pub fn log_duration_finalize(
    consultation_id: &str,
    duration_ms: u64,
    success: bool,
    error: Option<&str>,
) {
    if success {
        info!(
            event = "duration_finalize",
            consultation_id = %consultation_id,
            duration_ms = duration_ms,
            success = true,
            "Consultation duration finalized"
        );
    } else {
        warn!(
            event = "duration_finalize",
            consultation_id = %consultation_id,
            duration_ms = duration_ms,
            success = false,
            error = error,
            "Consultation duration finalize failed"
        );
    }
}

/// Log session note sync (without content)
pub fn log_note_sync(
    consultation_id: &str,
    note_id: Option<&str>,
    action: &str, // "create", "update", "load"
    char_count: usize,
    success: bool,
    error: Option<&str>,
) {
    if success {
        info!(
            event = "note_sync",
            consultation_id = %consultation_id,
            note_id = note_id,
            action = %action,
            char_count = char_count,
            success = true,
            "Session note synced"
        );
    } else {
        warn!(
            event = "note_sync",
            consultation_id = %consultation_id,
            note_id = note_id,
            action = %action,
            char_count = char_count,
            success = false,
            error = error,
            "Session note sync failed"
        );
    }
}

/// Log patient history load
pub fn log_history_load(result_count: usize, excluded_current: bool) {
    info!(
        event = "history_load",
        result_count = result_count,
        excluded_current = excluded_current,
        "Patient history loaded"
    );
}

/// Log an authentication failure against the backend
pub fn log_auth_failure(operation: &str, reason: &str) {
    warn!(
        event = "auth_failure",
        operation = %operation,
        reason = %reason,
        "Backend rejected credentials"
    );
}

/// Log a response discarded because the view moved on
pub fn log_stale_response(operation: &str, expected_consultation: &str, current_consultation: &str) {
    warn!(
        event = "stale_response",
        operation = %operation,
        expected_consultation = %expected_consultation,
        current_consultation = %current_consultation,
        "Discarded response for a consultation no longer in view"
    );
}
