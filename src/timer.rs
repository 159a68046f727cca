use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::activity_log;

/// Default tick period of the running timer
pub const DEFAULT_TICK_MS: u64 = 1000;

/// Persisted timer record, mirrored into the keyed store
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub elapsed_ms: u64,
    pub is_running: bool,
    /// Wall-clock instant from which the next delta accumulates
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub resume_anchor: Option<DateTime<Utc>>,
}

impl TimerState {
    pub fn fresh() -> Self {
        Self::default()
    }

    /// Restore `resume_anchor.is_some() == is_running` on records written by
    /// older clients or edited by hand.
    pub fn normalized(mut self) -> Self {
        if !self.is_running {
            self.resume_anchor = None;
        } else if self.resume_anchor.is_none() {
            self.is_running = false;
        }
        self
    }
}

/// Timer state machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerPhase {
    Idle,
    Running,
    Finalizing,
}

impl TimerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Finalizing => "finalizing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TimerError {
    #[error("Timer already running")]
    AlreadyRunning,
    #[error("Timer not running")]
    NotRunning,
    #[error("Duration is being saved")]
    Finalizing,
    #[error("Timer is not saving a duration")]
    NotFinalizing,
    #[error("Cannot reset while the timer is running")]
    ResetWhileRunning,
}

/// What a stop-and-save request resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    /// Nothing accumulated; no backend call is made
    NothingToSave,
    /// Submit this duration to the backend
    Submit { elapsed_ms: u64 },
}

/// Label of the start control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartLabel {
    Start,
    Resume,
    Running,
    Saving,
}

/// Render projection of the timer, recomputed from state on demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerView {
    pub phase: TimerPhase,
    pub elapsed_ms: u64,
    pub display: String,
    pub start_label: StartLabel,
    pub start_enabled: bool,
    pub pause_enabled: bool,
    pub stop_enabled: bool,
    pub reset_enabled: bool,
}

/// Elapsed-time state machine for one consultation.
///
/// All transitions take the current wall-clock instant explicitly; the
/// machine never reads the clock itself.
#[derive(Debug, Clone)]
pub struct TimerMachine {
    consultation_id: String,
    state: TimerState,
    phase: TimerPhase,
}

impl TimerMachine {
    pub fn new(consultation_id: &str) -> Self {
        Self {
            consultation_id: consultation_id.to_string(),
            state: TimerState::fresh(),
            phase: TimerPhase::Idle,
        }
    }

    /// Rebuild the machine from a persisted record.
    ///
    /// A record captured while running is advanced by the wall-clock time
    /// elapsed since its anchor and resumes immediately.
    pub fn rehydrate(consultation_id: &str, persisted: Option<TimerState>, now: DateTime<Utc>) -> Self {
        let mut machine = Self::new(consultation_id);
        let Some(state) = persisted.map(TimerState::normalized) else {
            activity_log::log_timer_rehydrated(consultation_id, 0, false);
            return machine;
        };

        machine.state = state;
        if machine.state.is_running {
            machine.phase = TimerPhase::Running;
            machine.fold(now);
        }
        activity_log::log_timer_rehydrated(
            consultation_id,
            machine.state.elapsed_ms,
            machine.state.is_running,
        );
        machine
    }

    pub fn consultation_id(&self) -> &str {
        &self.consultation_id
    }

    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == TimerPhase::Running
    }

    /// Accumulated duration as of the last fold
    pub fn elapsed_ms(&self) -> u64 {
        self.state.elapsed_ms
    }

    /// Accumulated duration including the not-yet-folded delta
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> u64 {
        match self.state.resume_anchor {
            Some(anchor) if self.state.is_running => {
                self.state.elapsed_ms.saturating_add(delta_ms(anchor, now))
            }
            _ => self.state.elapsed_ms,
        }
    }

    /// Record to persist for this consultation
    pub fn snapshot(&self) -> TimerState {
        self.state.clone()
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TimerError> {
        match self.phase {
            TimerPhase::Running => return Err(TimerError::AlreadyRunning),
            TimerPhase::Finalizing => return Err(TimerError::Finalizing),
            TimerPhase::Idle => {}
        }
        self.state.is_running = true;
        self.state.resume_anchor = Some(now);
        self.transition(TimerPhase::Running);
        Ok(())
    }

    /// Periodic tick: fold the wall-clock delta and move the anchor forward.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<u64, TimerError> {
        if self.phase != TimerPhase::Running {
            return Err(TimerError::NotRunning);
        }
        self.fold(now);
        debug!(
            consultation_id = %self.consultation_id,
            elapsed_ms = self.state.elapsed_ms,
            "Timer tick"
        );
        Ok(self.state.elapsed_ms)
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), TimerError> {
        match self.phase {
            TimerPhase::Idle => return Err(TimerError::NotRunning),
            TimerPhase::Finalizing => return Err(TimerError::Finalizing),
            TimerPhase::Running => {}
        }
        self.halt(now);
        self.transition(TimerPhase::Idle);
        Ok(())
    }

    /// Stop and capture the duration to submit.
    ///
    /// With nothing accumulated the machine stays `Idle` and no submission
    /// is requested.
    pub fn begin_finalize(&mut self, now: DateTime<Utc>) -> Result<StopDecision, TimerError> {
        if self.phase == TimerPhase::Finalizing {
            return Err(TimerError::Finalizing);
        }
        self.halt(now);

        if self.state.elapsed_ms == 0 {
            self.transition(TimerPhase::Idle);
            return Ok(StopDecision::NothingToSave);
        }

        self.transition(TimerPhase::Finalizing);
        Ok(StopDecision::Submit {
            elapsed_ms: self.state.elapsed_ms,
        })
    }

    /// The backend accepted the duration; local accumulation starts over.
    pub fn finalize_succeeded(&mut self) -> Result<(), TimerError> {
        if self.phase != TimerPhase::Finalizing {
            return Err(TimerError::NotFinalizing);
        }
        self.state = TimerState::fresh();
        self.transition(TimerPhase::Idle);
        Ok(())
    }

    /// The backend call failed; the captured duration stays available to
    /// resume or retry.
    pub fn finalize_failed(&mut self) -> Result<(), TimerError> {
        if self.phase != TimerPhase::Finalizing {
            return Err(TimerError::NotFinalizing);
        }
        self.transition(TimerPhase::Idle);
        Ok(())
    }

    pub fn reset(&mut self) -> Result<(), TimerError> {
        match self.phase {
            TimerPhase::Running => return Err(TimerError::ResetWhileRunning),
            TimerPhase::Finalizing => return Err(TimerError::Finalizing),
            TimerPhase::Idle => {}
        }
        self.state = TimerState::fresh();
        activity_log::log_timer_reset(&self.consultation_id);
        Ok(())
    }

    pub fn view(&self, now: DateTime<Utc>) -> TimerView {
        let elapsed_ms = self.elapsed_at(now);
        let start_label = match self.phase {
            TimerPhase::Running => StartLabel::Running,
            TimerPhase::Finalizing => StartLabel::Saving,
            TimerPhase::Idle if elapsed_ms > 0 => StartLabel::Resume,
            TimerPhase::Idle => StartLabel::Start,
        };
        TimerView {
            phase: self.phase,
            elapsed_ms,
            display: format_elapsed(elapsed_ms),
            start_label,
            start_enabled: self.phase == TimerPhase::Idle,
            pause_enabled: self.phase == TimerPhase::Running,
            stop_enabled: self.phase == TimerPhase::Running
                || (self.phase == TimerPhase::Idle && elapsed_ms > 0),
            reset_enabled: self.phase == TimerPhase::Idle,
        }
    }

    fn fold(&mut self, now: DateTime<Utc>) {
        if let Some(anchor) = self.state.resume_anchor {
            self.state.elapsed_ms = self.state.elapsed_ms.saturating_add(delta_ms(anchor, now));
            self.state.resume_anchor = Some(now);
        }
    }

    fn halt(&mut self, now: DateTime<Utc>) {
        self.fold(now);
        self.state.is_running = false;
        self.state.resume_anchor = None;
    }

    fn transition(&mut self, to: TimerPhase) {
        if self.phase != to {
            activity_log::log_timer_transition(
                &self.consultation_id,
                self.phase.as_str(),
                to.as_str(),
                self.state.elapsed_ms,
            );
        }
        self.phase = to;
    }
}

/// Milliseconds between anchor and now; clock skew backwards counts as zero
fn delta_ms(anchor: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    now.signed_duration_since(anchor).num_milliseconds().max(0) as u64
}

/// Format a duration as `HH:MM:SS`
pub fn format_elapsed(elapsed_ms: u64) -> String {
    let total_secs = elapsed_ms / 1000;
    format!(
        "{:02}:{:02}:{:02}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60
    )
}
