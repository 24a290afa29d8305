// Mysterium Node Launcher
// Main library entry point

pub mod console;
pub mod coordination;
pub mod events;
pub mod installation;
pub mod models;
pub mod tui;
pub mod utils;

use anyhow::{Context, Result};
use log::{error, info, LevelFilter};
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

use crate::coordination::{ui_channel, AckGate, UiTaskQueue};
use crate::events::{EventBus, EventTopic, LauncherEvent};
use crate::installation::flow::{report_failure, run_install_flow, FlowOutcome};
use crate::installation::supervisor::run_supervisor;
use crate::installation::system::SystemSteps;
use crate::models::preferences::PreferenceStore;
use crate::models::state::LauncherModel;
use crate::utils::logging::LogSink;
use crate::utils::settings::{LauncherSettings, UiMode};

/// Process exit code for unusable settings.
pub const EXIT_BAD_SETTINGS: i32 = 2;

/// Initialize logging with dual file formats (JSON + human-readable) plus the event bus
/// sink the surfaces render from. Nothing goes to stdout.
pub fn init_logging(sink: LogSink, level: LevelFilter) -> Result<PathBuf> {
    let log_dir = utils::path_resolver::resolve_log_folder()?;
    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");

    // JSON log file for structured parsing
    let json_log_file = log_dir.join(format!("launcher-{}.log", timestamp));

    // Human-readable log file (.txt)
    let txt_log_file = log_dir.join(format!("launcher-{}.txt", timestamp));

    fern::Dispatch::new()
        .level(level)
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_utc = chrono::Utc::now().to_rfc3339();
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let json_line = utils::logging::format_json_log(
                        &timestamp_utc,
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", json_line));
                })
                .chain(fern::log_file(&json_log_file)?),
        )
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", txt_line));
                })
                .chain(fern::log_file(&txt_log_file)?),
        )
        .chain(bus_log_chain(sink))
        .apply()
        .context("Failed to install logger")?;

    info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(log_dir)
}

/// Chain that republishes every record on the event bus as one `log` event.
fn bus_log_chain(sink: LogSink) -> fern::Dispatch {
    fern::Dispatch::new()
        .format(move |out, message, record| {
            let line = utils::logging::format_display_log(&message.to_string());
            out.finish(format_args!("{:<5} {}", record.level(), line));
        })
        // One write per record so each line becomes exactly one `log` event.
        .chain(fern::Output::call(move |record| {
            let line = format!("{}\n", record.args());
            let _ = sink.clone().write_all(line.as_bytes());
        }))
}

/// Options gathered from the command line.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub settings_path: Option<PathBuf>,
    pub ui: Option<UiMode>,
    pub install_stage2: bool,
}

/// Settings from `path`, or from the default file next to the executable.
pub fn load_settings(path: Option<&Path>) -> Result<LauncherSettings> {
    let default_file;
    let file = match path {
        Some(p) => Some(p),
        None => {
            default_file = utils::path_resolver::default_settings_file().ok();
            default_file.as_deref()
        }
    };
    LauncherSettings::load(file)
}

/// Everything one launcher run shares between the rendering thread and the worker.
pub struct Session {
    pub id: Uuid,
    pub settings: LauncherSettings,
    pub model: Arc<LauncherModel>,
    pub preferences: PreferenceStore,
}

impl Session {
    pub fn new(settings: LauncherSettings, preferences: PreferenceStore) -> Self {
        let model = Arc::new(LauncherModel::new(
            Arc::new(EventBus::new()),
            Arc::new(AckGate::new()),
        ));
        Self {
            id: Uuid::new_v4(),
            settings,
            model,
            preferences,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        self.model.bus()
    }

    /// Load the stored preference into the model.
    pub fn restore_preference(&self) {
        self.model.set_preference(self.preferences.load());
    }

    /// Flip auto-start and persist it right away.
    pub fn toggle_auto_start(&self) {
        let pref = self.model.toggle_auto_start();
        self.preferences.save(&pref);
    }

    pub fn open_node_ui(&self) -> Result<()> {
        utils::shell::open_url(&self.settings.node_ui_url)
    }
}

fn preference_store() -> PreferenceStore {
    match PreferenceStore::default_location() {
        Ok(store) => store,
        Err(e) => {
            // No home directory: keep the preference next to the executable instead.
            let fallback = utils::path_resolver::resolve_deployment_folder()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(utils::path_resolver::PREFERENCE_FILE_NAME);
            eprintln!("Preference location unavailable ({}); using {:?}", e, fallback);
            PreferenceStore::new(fallback)
        }
    }
}

/// Build the session, start logging and bind the calling thread as the rendering thread.
fn start(opts: &LaunchOptions) -> Result<(Session, UiTaskQueue)> {
    let settings = load_settings(opts.settings_path.as_deref())?;
    let session = Session::new(settings, preference_store());

    if let Err(e) = init_logging(
        LogSink::new(Arc::clone(session.bus())),
        session.settings.level_filter(),
    ) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    info!(
        "[PHASE: initialization] [STEP: start] Launcher {} starting at {} (session_id={}, os={})",
        env!("CARGO_PKG_VERSION"),
        chrono::Utc::now(),
        session.id,
        utils::os_detection::get_os_name()
    );

    let (dispatcher, queue) = ui_channel();
    queue.bind_current_thread();
    session.model.attach_dispatcher(dispatcher);
    session.model.set_install_stage2(opts.install_stage2);
    session.restore_preference();

    Ok((session, queue))
}

fn spawn_worker(model: Arc<LauncherModel>, settings: LauncherSettings) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("installer".to_string())
        .spawn(move || install_and_supervise(&model, settings))
        .context("Failed to start installer thread")
}

fn install_and_supervise(model: &LauncherModel, settings: LauncherSettings) {
    let interval = Duration::from_secs(settings.supervisor_interval_secs);
    let steps = match SystemSteps::new(settings) {
        Ok(s) => s,
        Err(e) => {
            report_failure(model, format!("Launcher setup failed: {:#}", e));
            return;
        }
    };

    match run_install_flow(model, &steps) {
        FlowOutcome::Installed | FlowOutcome::AlreadyInstalled => {
            run_supervisor(model, &steps, interval)
        }
        FlowOutcome::RebootRequired => {
            info!("[PHASE: install] [STEP: reboot] Restart Windows to continue the installation");
            model.request_exit();
        }
        FlowOutcome::Failed(_) | FlowOutcome::Aborted => {}
    }
}

fn resolve_ui(opts: &LaunchOptions, settings: &LauncherSettings) -> UiMode {
    match opts.ui.unwrap_or(settings.ui) {
        UiMode::Auto if std::io::stdout().is_terminal() => UiMode::Tui,
        UiMode::Auto => UiMode::Console,
        explicit => explicit,
    }
}

/// Run the launcher with the chosen surface. Returns the process exit code.
pub fn run(opts: LaunchOptions) -> i32 {
    let (session, queue) = match start(&opts) {
        Ok((session, queue)) => (Arc::new(session), queue),
        Err(e) => {
            eprintln!("Launcher settings error: {:#}", e);
            return EXIT_BAD_SETTINGS;
        }
    };

    let ui = resolve_ui(&opts, &session.settings);
    info!("[PHASE: initialization] [STEP: ui] Using {:?} surface", ui);

    // Subscribe before the worker starts so no state change is missed.
    let (subscriptions, events) = session.bus().subscribe_channel(&EventTopic::ALL);
    let surface = match ui {
        UiMode::Tui => run_tui,
        _ => run_console,
    };
    let worker = match spawn_worker(Arc::clone(&session.model), session.settings.clone()) {
        Ok(w) => Some(w),
        Err(e) => {
            error!("[PHASE: initialization] [STEP: worker] {:#}", e);
            None
        }
    };

    let code = surface(&session, &queue, events);
    for id in subscriptions {
        session.bus().unsubscribe(id);
    }

    // Stops the supervisor and releases a worker parked on the gate.
    session.model.request_exit();
    if let Some(w) = worker {
        if w.is_finished() {
            let _ = w.join();
        } else {
            info!("[PHASE: shutdown] [STEP: worker] Installer thread still busy; leaving it behind");
        }
    }
    info!("[PHASE: shutdown] [STEP: exit] Launcher exiting with code {}", code);
    code
}

fn run_tui(session: &Arc<Session>, queue: &UiTaskQueue, events: Receiver<LauncherEvent>) -> i32 {
    match tui::run(session, queue, events) {
        Ok(code) => code,
        Err(e) => {
            error!("[PHASE: tui] [STEP: fatal] TUI exited with error: {:?}", e);
            eprintln!("Launcher error: {}", e);
            1
        }
    }
}

fn run_console(session: &Arc<Session>, queue: &UiTaskQueue, events: Receiver<LauncherEvent>) -> i32 {
    match console::run(session, queue, events) {
        Ok(code) => code,
        Err(e) => {
            error!("[PHASE: console] [STEP: fatal] Console exited with error: {:?}", e);
            eprintln!("Launcher error: {}", e);
            1
        }
    }
}

/// Non-interactive TUI smoke mode (for automated checks).
/// Renders a single frame for the given modal state and exits.
pub fn run_tui_smoke(target: Option<String>) -> i32 {
    let bus = Arc::new(EventBus::new());
    if let Err(e) = init_logging(LogSink::new(Arc::clone(&bus)), LevelFilter::Debug) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let target = target.as_deref().unwrap_or("initial");
    match tui::smoke(target) {
        Ok(()) => 0,
        Err(e) => {
            error!(
                "[PHASE: tui] [STEP: smoke] TUI smoke exited with error: {:?}",
                e
            );
            eprintln!("Launcher error: {}", e);
            1
        }
    }
}

/// Print the effective settings as TOML.
pub fn print_settings(opts: &LaunchOptions) -> i32 {
    let rendered = load_settings(opts.settings_path.as_deref()).and_then(|s| s.to_toml());
    match rendered {
        Ok(text) => {
            print!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("Launcher settings error: {:#}", e);
            EXIT_BAD_SETTINGS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session(dir: &tempfile::TempDir) -> Session {
        Session::new(
            LauncherSettings::default(),
            PreferenceStore::new(dir.path().join(".myst_node_launcher")),
        )
    }

    #[test]
    fn each_record_becomes_one_log_event() {
        let bus = Arc::new(EventBus::new());
        let (_, rx) = bus.subscribe_channel(&[EventTopic::Log]);
        let (_, logger) = bus_log_chain(LogSink::new(Arc::clone(&bus))).into_log();

        logger.log(
            &log::Record::builder()
                .args(format_args!("[PHASE: install] [STEP: docker] Installing Docker"))
                .level(log::Level::Info)
                .target("test")
                .build(),
        );
        logger.log(
            &log::Record::builder()
                .args(format_args!("second"))
                .level(log::Level::Warn)
                .target("test")
                .build(),
        );

        let events: Vec<LauncherEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                LauncherEvent::Log(b"INFO  [install/docker] Installing Docker\n".to_vec()),
                LauncherEvent::Log(b"WARN  second\n".to_vec()),
            ]
        );
    }

    #[test]
    fn toggle_auto_start_persists() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(&dir);

        session.toggle_auto_start();
        assert!(session.model.preference().auto_start);
        assert!(session.preferences.load().auto_start);

        session.toggle_auto_start();
        assert!(!session.preferences.load().auto_start);
    }

    #[test]
    fn restore_preference_reads_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let session = test_session(&dir);
        std::fs::write(session.preferences.path(), br#"{"auto_start": true}"#).unwrap();

        session.restore_preference();
        assert!(session.model.preference().auto_start);
    }

    #[test]
    fn explicit_ui_wins_over_settings() {
        let settings = LauncherSettings {
            ui: UiMode::Tui,
            ..LauncherSettings::default()
        };
        let opts = LaunchOptions {
            ui: Some(UiMode::Console),
            ..LaunchOptions::default()
        };
        assert_eq!(resolve_ui(&opts, &settings), UiMode::Console);
        assert_eq!(resolve_ui(&LaunchOptions::default(), &settings), UiMode::Tui);
    }

    #[test]
    fn explicit_settings_file_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "container_name = \"node\"\n").unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.container_name, "node");
    }
}
