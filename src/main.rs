use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use consultation_tracker_lib::activity_log;
use consultation_tracker_lib::auth::AuthState;
use consultation_tracker_lib::history::{HistoryAction, HistoryView};
use consultation_tracker_lib::notes::NoteMode;
use consultation_tracker_lib::view::{run, system_clock, ViewSettings};
use consultation_tracker_lib::{
    ApiClient, Config, ConsultationView, Feedback, FileStore, SessionContext, ViewEvent,
    ViewSnapshot,
};

/// Consultation timer and session notes from the terminal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend base URL (overrides config)
    #[arg(long)]
    api_url: Option<String>,

    /// Directory for persisted timer state (overrides config)
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Control the consultation timer
    Timer {
        /// Consultation id
        consultation: String,
        #[command(subcommand)]
        action: TimerAction,
    },
    /// Run the timer in the foreground until Ctrl+C
    Watch {
        consultation: String,
        /// Start the timer if it is not running
        #[arg(long)]
        start: bool,
    },
    /// Show or save the consultation's session note
    Note {
        consultation: String,
        #[arg(long)]
        patient: String,
        #[command(subcommand)]
        action: NoteAction,
    },
    /// List the patient's earlier notes
    History {
        consultation: String,
        #[arg(long)]
        patient: String,
        /// Show full text of standalone notes
        #[arg(long)]
        full: bool,
    },
    /// Store a bearer token for later calls
    Login {
        #[arg(long)]
        token: String,
        /// Token lifetime in seconds
        #[arg(long)]
        expires_in: Option<i64>,
    },
    /// Forget the stored token
    Logout,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum TimerAction {
    Start,
    Pause,
    /// Stop and submit the duration
    Stop,
    Reset,
    Status,
}

#[derive(Subcommand, Debug)]
enum NoteAction {
    Show,
    Save {
        /// Note text
        content: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load_or_default();
    if let Some(url) = &args.api_url {
        config.api_base_url = url.clone();
    }
    if let Some(dir) = &args.store_dir {
        config.store_dir = Some(dir.clone());
    }

    let log_level = if args.verbose { "debug" } else { "warn" };
    activity_log::init_logging(&Config::log_dir()?, log_level)
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    let auth_path = Config::auth_path()?;
    match args.command {
        Command::Login { token, expires_in } => {
            AuthState::with_token(&token, expires_in)
                .save_to_file(&auth_path)
                .context("Failed to store credential")?;
            println!("Credential stored.");
            Ok(())
        }
        Command::Logout => {
            AuthState::delete_file(&auth_path);
            println!("Logged out.");
            Ok(())
        }
        Command::Timer {
            consultation,
            action,
        } => {
            let mut view = open_timer_view(&config, &consultation)?;
            let event = match action {
                TimerAction::Start => Some(ViewEvent::Start),
                TimerAction::Pause => Some(ViewEvent::Pause),
                TimerAction::Stop => Some(ViewEvent::StopAndSave),
                TimerAction::Reset => Some(ViewEvent::Reset),
                TimerAction::Status => None,
            };
            let feedback = match event {
                Some(event) => view.dispatch(event, Utc::now()).await,
                None => None,
            };
            print_timer(&view.render(Utc::now()));
            fail_on(feedback)
        }
        Command::Watch {
            consultation,
            start,
        } => watch(&config, &consultation, start).await,
        Command::Note {
            consultation,
            patient,
            action,
        } => {
            let mut view = open_view(&config, &consultation, Some(&patient)).await?;
            let feedback = match action {
                NoteAction::Show => view.feedback().cloned(),
                NoteAction::Save { content } => {
                    view.dispatch(ViewEvent::SaveNote(content), Utc::now()).await
                }
            };
            print_note(&view.render(Utc::now()));
            fail_on(feedback)
        }
        Command::History {
            consultation,
            patient,
            full,
        } => {
            let view = open_view(&config, &consultation, Some(&patient)).await?;
            print_history(&view.render(Utc::now()).history, full);
            fail_on(view.feedback().cloned())
        }
    }
}

fn backends(config: &Config) -> Result<(Arc<FileStore>, Arc<ApiClient>)> {
    let store = FileStore::new(config.store_path()?).context("Failed to open timer store")?;
    let auth = AuthState::load(&Config::auth_path()?);
    let client = ApiClient::new(&config.api_base_url, config.request_timeout(), auth)?;
    Ok((Arc::new(store), Arc::new(client)))
}

/// Full view: current note and patient history are fetched
async fn open_view(
    config: &Config,
    consultation_id: &str,
    patient_id: Option<&str>,
) -> Result<ConsultationView> {
    let (store, client) = backends(config)?;
    Ok(ConsultationView::open(
        SessionContext::new(consultation_id, patient_id),
        store,
        client,
        ViewSettings::from(config),
        Utc::now(),
    )
    .await)
}

/// Timer-only view; the backend is reached only on stop-and-save
fn open_timer_view(config: &Config, consultation_id: &str) -> Result<ConsultationView> {
    let (store, client) = backends(config)?;
    Ok(ConsultationView::restore(
        SessionContext::new(consultation_id, None),
        store,
        client,
        ViewSettings::from(config),
        Utc::now(),
    ))
}

async fn watch(config: &Config, consultation_id: &str, start: bool) -> Result<()> {
    let mut view = open_timer_view(config, consultation_id)?;
    if start && !view.timer().is_running() {
        if let Some(feedback) = view.dispatch(ViewEvent::Start, Utc::now()).await {
            return fail_on(Some(feedback));
        }
    }

    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, closing view...");
        if tx.send(ViewEvent::Unload).await.is_err() {
            warn!("View driver already stopped");
        }
    });

    println!("Watching consultation {}. Press Ctrl+C to stop.", consultation_id);
    let view = run(view, rx, config.tick_interval(), system_clock(), |snapshot| {
        print!("\r{} [{}]", snapshot.timer.display, snapshot.timer.phase.as_str());
        let _ = std::io::stdout().flush();
    })
    .await;
    println!();

    print_timer(&view.render(Utc::now()));
    Ok(())
}

fn print_timer(snapshot: &ViewSnapshot) {
    let timer = &snapshot.timer;
    println!("Consultation: {}", snapshot.consultation_id);
    println!("Elapsed:      {}", timer.display);
    println!("State:        {}", timer.phase.as_str());
    if let Some(consultation) = &snapshot.consultation {
        println!("Status:       {:?}", consultation.status);
    }
}

fn print_note(snapshot: &ViewSnapshot) {
    let note = &snapshot.note;
    match (note.mode, note.current_note_id.as_deref()) {
        (NoteMode::Display, Some(id)) => {
            println!("Session note {}:", id);
            println!("{}", note.text);
        }
        _ if note.text.is_empty() => println!("No session note yet."),
        _ => {
            println!("Unsaved draft:");
            println!("{}", note.text);
        }
    }
}

fn print_history(history: &HistoryView, full: bool) {
    let HistoryView::Entries(entries) = history else {
        println!("No earlier notes for this patient.");
        return;
    };
    for entry in entries {
        let date = entry
            .created_at
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "undated".to_string());
        let text = match (&entry.action, full) {
            (HistoryAction::RevealFullText, true) => entry.full_text.as_str(),
            _ => entry.preview.as_str(),
        };
        match &entry.action {
            HistoryAction::OpenConsultation { consultation_id } => {
                println!("[{}] note {} (consultation {})", date, entry.note_id, consultation_id)
            }
            HistoryAction::RevealFullText => println!("[{}] note {}", date, entry.note_id),
        }
        println!("    {}", text);
    }
}

fn fail_on(feedback: Option<Feedback>) -> Result<()> {
    match feedback {
        Some(feedback) => Err(anyhow!("{}", feedback.message())),
        None => Ok(()),
    }
}
