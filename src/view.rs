//! Consultation view controller
//!
//! One `ConsultationView` exists per opened consultation. It owns the
//! session context, the timer machine, the note manager and the history
//! projection, and routes every user or timer event through [`dispatch`].
//! Navigating to another consultation builds a new view.
//!
//! [`dispatch`]: ConsultationView::dispatch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activity_log;
use crate::config::Config;
use crate::gateway::{FailureKind, SyncError, SyncGateway};
use crate::history::{self, HistoryView};
use crate::models::ConsultationSession;
use crate::notes::{Applied, NoteError, NoteManager, NoteView};
use crate::store::{self, KeyValueStore};
use crate::timer::{StopDecision, TimerError, TimerMachine, TimerView};

/// Identity of an opened consultation view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Per-instance id used to correlate log lines
    pub view_id: String,
    pub consultation_id: String,
    pub patient_id: Option<String>,
}

impl SessionContext {
    pub fn new(consultation_id: &str, patient_id: Option<&str>) -> Self {
        Self {
            view_id: Uuid::new_v4().to_string(),
            consultation_id: consultation_id.to_string(),
            patient_id: patient_id
                .filter(|p| !p.trim().is_empty())
                .map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    Start,
    Pause,
    StopAndSave,
    Reset,
    Tick,
    EditNote,
    SetDraft(String),
    SaveNote(String),
    RevealHistory(String),
    /// Final persist before the view goes away
    Unload,
}

impl ViewEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::StopAndSave => "stop_and_save",
            Self::Reset => "reset",
            Self::Tick => "tick",
            Self::EditNote => "edit_note",
            Self::SetDraft(_) => "set_draft",
            Self::SaveNote(_) => "save_note",
            Self::RevealHistory(_) => "reveal_history",
            Self::Unload => "unload",
        }
    }
}

/// User-facing outcome of a failed event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Feedback {
    /// Rejected locally before any backend call
    Precondition(String),
    /// Blocking prompt to log in again
    SessionExpired(String),
    /// Backend unreachable; local state left intact
    Connectivity(String),
    /// Backend refused the operation
    Server(String),
}

impl Feedback {
    pub fn message(&self) -> &str {
        match self {
            Self::Precondition(m) | Self::SessionExpired(m) | Self::Connectivity(m) | Self::Server(m) => m,
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::SessionExpired(_))
    }
}

impl From<&SyncError> for Feedback {
    fn from(e: &SyncError) -> Self {
        let message = e.user_message();
        match e.kind() {
            FailureKind::Authentication => Self::SessionExpired(message),
            FailureKind::Network => Self::Connectivity(message),
            FailureKind::NotFound | FailureKind::Rejected => Self::Server(message),
        }
    }
}

impl From<&NoteError> for Feedback {
    fn from(e: &NoteError) -> Self {
        match e {
            NoteError::Sync(sync) => sync.into(),
            other => Self::Precondition(other.user_message()),
        }
    }
}

impl From<&TimerError> for Feedback {
    fn from(e: &TimerError) -> Self {
        Self::Precondition(e.to_string())
    }
}

/// Per-view tunables taken from [`Config`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSettings {
    pub persist_every_ticks: u32,
    pub history_preview_chars: usize,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ViewSettings {
    fn from(config: &Config) -> Self {
        Self {
            persist_every_ticks: config.persist_every_ticks.max(1),
            history_preview_chars: config.history_preview_chars,
        }
    }
}

/// Full render projection of the view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSnapshot {
    pub view_id: String,
    pub consultation_id: String,
    pub consultation: Option<ConsultationSession>,
    pub timer: TimerView,
    pub note: NoteView,
    pub history: HistoryView,
    pub feedback: Option<Feedback>,
}

pub struct ConsultationView {
    context: SessionContext,
    timer: TimerMachine,
    notes: NoteManager,
    history: HistoryView,
    consultation: Option<ConsultationSession>,
    store: Arc<dyn KeyValueStore>,
    gateway: Arc<dyn SyncGateway>,
    settings: ViewSettings,
    ticks_since_persist: u32,
    feedback: Option<Feedback>,
    closed: bool,
}

impl ConsultationView {
    /// Build the view: rehydrate the timer, then load the current note and
    /// the patient history. Load failures end up in [`feedback`](Self::feedback).
    pub async fn open(
        context: SessionContext,
        store: Arc<dyn KeyValueStore>,
        gateway: Arc<dyn SyncGateway>,
        settings: ViewSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let mut view = Self::restore(context, store, gateway, settings, now);
        if let Err(e) = view.notes.load_current_note(view.gateway.as_ref()).await {
            view.feedback = Some((&e).into());
        }
        if let Some(feedback) = view.refresh_history().await {
            view.feedback.get_or_insert(feedback);
        }
        view
    }

    /// Timer-only view: rehydrates from the store without any backend call.
    /// The note area stays empty until a note is saved.
    pub fn restore(
        context: SessionContext,
        store: Arc<dyn KeyValueStore>,
        gateway: Arc<dyn SyncGateway>,
        settings: ViewSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let persisted = match store::load_timer_state(store.as_ref(), &context.consultation_id) {
            Ok(state) => state,
            Err(e) => {
                activity_log::log_persist_failure(&context.consultation_id, &e.to_string());
                None
            }
        };
        let timer = TimerMachine::rehydrate(&context.consultation_id, persisted, now);
        let notes = NoteManager::new(Some(&context.consultation_id), context.patient_id.as_deref());

        activity_log::log_view_opened(
            &context.view_id,
            &context.consultation_id,
            context.patient_id.is_some(),
        );

        let mut view = Self {
            context,
            timer,
            notes,
            history: HistoryView::Empty,
            consultation: None,
            store,
            gateway,
            settings,
            ticks_since_persist: 0,
            feedback: None,
            closed: false,
        };

        // The rehydrated anchor moved forward
        if view.timer.is_running() {
            view.persist();
        }
        view
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn timer(&self) -> &TimerMachine {
        &self.timer
    }

    pub fn notes(&self) -> &NoteManager {
        &self.notes
    }

    pub fn history(&self) -> &HistoryView {
        &self.history
    }

    /// Consultation record as last confirmed by the backend
    pub fn consultation(&self) -> Option<&ConsultationSession> {
        self.consultation.as_ref()
    }

    /// Outcome of the last failed event, if it has not been superseded
    pub fn feedback(&self) -> Option<&Feedback> {
        self.feedback.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Apply one event. Returns feedback when the event failed.
    pub async fn dispatch(&mut self, event: ViewEvent, now: DateTime<Utc>) -> Option<Feedback> {
        if self.closed {
            debug!(event = event.name(), "Ignoring event on closed view");
            return None;
        }
        if event != ViewEvent::Tick {
            debug!(
                view_id = %self.context.view_id,
                event = event.name(),
                "Dispatching view event"
            );
        }

        let is_tick = event == ViewEvent::Tick;
        let result = match event {
            ViewEvent::Start => self.timer_transition(|t| t.start(now)),
            ViewEvent::Pause => self.timer_transition(|t| t.pause(now)),
            ViewEvent::Reset => self.reset(),
            ViewEvent::Tick => {
                self.tick(now);
                None
            }
            ViewEvent::StopAndSave => self.stop_and_save(now).await,
            ViewEvent::EditNote => {
                self.notes.edit();
                None
            }
            ViewEvent::SetDraft(text) => {
                self.notes.set_draft(&text);
                None
            }
            ViewEvent::SaveNote(content) => self.save_note(&content).await,
            ViewEvent::RevealHistory(note_id) => {
                self.history.reveal(&note_id);
                None
            }
            ViewEvent::Unload => {
                self.unload("unload");
                None
            }
        };

        if !is_tick {
            self.feedback = result.clone();
        }
        result
    }

    /// Idempotent projection of the current state
    pub fn render(&self, now: DateTime<Utc>) -> ViewSnapshot {
        ViewSnapshot {
            view_id: self.context.view_id.clone(),
            consultation_id: self.context.consultation_id.clone(),
            consultation: self.consultation.clone(),
            timer: self.timer.view(now),
            note: self.notes.view(),
            history: self.history.clone(),
            feedback: self.feedback.clone(),
        }
    }

    fn timer_transition(
        &mut self,
        transition: impl FnOnce(&mut TimerMachine) -> Result<(), TimerError>,
    ) -> Option<Feedback> {
        match transition(&mut self.timer) {
            Ok(()) => {
                self.persist();
                None
            }
            Err(e) => Some((&e).into()),
        }
    }

    fn tick(&mut self, now: DateTime<Utc>) {
        if self.timer.tick(now).is_err() {
            return;
        }
        self.ticks_since_persist += 1;
        if self.ticks_since_persist >= self.settings.persist_every_ticks {
            self.persist();
        }
    }

    fn reset(&mut self) -> Option<Feedback> {
        if let Err(e) = self.timer.reset() {
            return Some((&e).into());
        }
        self.ticks_since_persist = 0;
        if let Err(e) = store::clear_timer_state(self.store.as_ref(), &self.context.consultation_id) {
            activity_log::log_persist_failure(&self.context.consultation_id, &e.to_string());
        }
        None
    }

    async fn stop_and_save(&mut self, now: DateTime<Utc>) -> Option<Feedback> {
        let elapsed_ms = match self.timer.begin_finalize(now) {
            Ok(StopDecision::Submit { elapsed_ms }) => elapsed_ms,
            Ok(StopDecision::NothingToSave) => {
                debug!(
                    consultation_id = %self.context.consultation_id,
                    "Nothing recorded, skipping duration finalize"
                );
                self.persist();
                return None;
            }
            Err(e) => return Some((&e).into()),
        };

        // A crash mid-request must still find the stopped duration
        self.persist();

        let consultation_id = self.context.consultation_id.clone();
        let result = self
            .gateway
            .finalize_duration(&consultation_id, elapsed_ms)
            .await;

        match result {
            Ok(confirmed) => {
                activity_log::log_duration_finalize(&consultation_id, elapsed_ms, true, None);
                if let Err(e) = self.timer.finalize_succeeded() {
                    warn!("Finalize completed in unexpected phase: {}", e);
                }
                self.ticks_since_persist = 0;
                if let Err(e) = store::clear_timer_state(self.store.as_ref(), &consultation_id) {
                    activity_log::log_persist_failure(&consultation_id, &e.to_string());
                }
                self.consultation = Some(self.reload_consultation(confirmed).await);
                None
            }
            Err(e) => {
                activity_log::log_duration_finalize(
                    &consultation_id,
                    elapsed_ms,
                    false,
                    Some(&e.to_string()),
                );
                if let Err(err) = self.timer.finalize_failed() {
                    warn!("Finalize failed in unexpected phase: {}", err);
                }
                Some((&e).into())
            }
        }
    }

    /// The backend's state after finalization is authoritative
    async fn reload_consultation(&self, confirmed: ConsultationSession) -> ConsultationSession {
        match self.gateway.get_consultation(&self.context.consultation_id).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(
                    consultation_id = %self.context.consultation_id,
                    "Consultation reload failed, keeping finalize response: {}", e
                );
                confirmed
            }
        }
    }

    async fn save_note(&mut self, content: &str) -> Option<Feedback> {
        match self.notes.save(self.gateway.as_ref(), content).await {
            Ok(Applied::Current(_)) => {
                // The save stands; a failed refresh keeps the previous history
                if let Some(feedback) = self.refresh_history().await {
                    debug!(kind = ?feedback, "History not refreshed after note save");
                }
                None
            }
            Ok(Applied::Discarded) => None,
            Err(e) => Some((&e).into()),
        }
    }

    async fn refresh_history(&mut self) -> Option<Feedback> {
        let patient_id = self.context.patient_id.clone()?;
        let current_note_id = self.notes.current_note_id().map(str::to_string);
        let result = history::load_history(
            self.gateway.as_ref(),
            &patient_id,
            current_note_id.as_deref(),
            self.settings.history_preview_chars,
        )
        .await;
        match result {
            Ok(view) => {
                self.history = view;
                None
            }
            Err(e) => {
                warn!(view_id = %self.context.view_id, "History load failed: {}", e);
                Some((&e).into())
            }
        }
    }

    fn persist(&mut self) {
        self.ticks_since_persist = 0;
        let snapshot = self.timer.snapshot();
        if let Err(e) =
            store::save_timer_state(self.store.as_ref(), &self.context.consultation_id, &snapshot)
        {
            activity_log::log_persist_failure(&self.context.consultation_id, &e.to_string());
        }
    }

    fn unload(&mut self, reason: &str) {
        // Nothing accumulated and nothing persisted: leave the store untouched
        if self.timer.elapsed_ms() > 0 || self.timer.is_running() {
            self.persist();
        }
        self.closed = true;
        activity_log::log_view_closed(&self.context.view_id, &self.context.consultation_id, reason);
    }
}

/// Wall-clock source for the driver
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Drive a view until `Unload` arrives or the event channel closes.
///
/// Ticks and events are handled on this single task, so a tick never
/// interleaves with a transition. `on_update` receives the projection after
/// every handled event or tick.
pub async fn run(
    mut view: ConsultationView,
    mut events: mpsc::Receiver<ViewEvent>,
    tick_interval: Duration,
    clock: Clock,
    mut on_update: impl FnMut(&ViewSnapshot),
) -> ConsultationView {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    info!(
        view_id = %view.context().view_id,
        tick_ms = tick_interval.as_millis() as u64,
        "View driver started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                view.dispatch(ViewEvent::Tick, clock()).await;
            }
            event = events.recv() => match event {
                Some(ViewEvent::Unload) | None => {
                    view.dispatch(ViewEvent::Unload, clock()).await;
                    on_update(&view.render(clock()));
                    break;
                }
                Some(event) => {
                    view.dispatch(event, clock()).await;
                }
            },
        }
        on_update(&view.render(clock()));
    }

    view
}
