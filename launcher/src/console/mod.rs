//! Line-oriented console surface.
//!
//! Used when stdout is not a terminal or `--console` is given. Log lines and prompts are
//! printed above an indicatif spinner that shows the installation status. Commands are
//! read from stdin on a helper thread:
//!
//! - empty line / `y` / `continue`: acknowledge the open prompt
//! - `a` / `auto`: toggle auto-start
//! - `o` / `open`: open the node UI in the browser
//! - `q` / `quit`: exit

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info};
use std::io::BufRead;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::coordination::{RenderHost, UiTaskQueue};
use crate::events::LauncherEvent;
use crate::models::state::{ModalState, ModelSnapshot, RunnableState};
use crate::Session;

const TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleCommand {
    Continue,
    ToggleAutoStart,
    OpenNodeUi,
    Quit,
}

fn parse_command(line: &str) -> Option<ConsoleCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" | "y" | "yes" | "c" | "continue" | "ok" => Some(ConsoleCommand::Continue),
        "a" | "auto" | "auto-start" => Some(ConsoleCommand::ToggleAutoStart),
        "o" | "open" => Some(ConsoleCommand::OpenNodeUi),
        "q" | "quit" | "exit" => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct ConsoleHost {
    quit: bool,
    exit_code: i32,
}

impl RenderHost for ConsoleHost {
    fn exit(&mut self, code: i32) {
        self.exit_code = code;
        self.quit = true;
    }
}

/// Printer that still works when the spinner is hidden (stdout redirected).
struct Output {
    bar: ProgressBar,
}

impl Output {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .context("Invalid spinner template")?,
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Ok(Self { bar })
    }

    fn say(&self, line: &str) {
        if self.bar.is_hidden() {
            println!("{}", line);
        } else {
            self.bar.println(line);
        }
    }
}

pub fn run(
    session: &Arc<Session>,
    queue: &UiTaskQueue,
    events: mpsc::Receiver<LauncherEvent>,
) -> Result<i32> {
    info!("[PHASE: console] [STEP: start] Starting console surface");

    let out = Output::new()?;
    out.say("Mysterium Node Launcher (type 'q' to quit, 'o' to open the node UI, 'a' to toggle auto-start)");
    spawn_input_reader(Arc::clone(session))?;

    let mut host = ConsoleHost::default();
    let mut shown: Option<ModelSnapshot> = None;

    while !host.quit {
        match events.recv_timeout(TICK) {
            Ok(ev) => {
                let mut refresh = handle_event(&out, ev);
                while let Ok(ev) = events.try_recv() {
                    refresh |= handle_event(&out, ev);
                }
                if refresh {
                    let snapshot = session.model.snapshot();
                    for line in describe_changes(shown.as_ref(), &snapshot) {
                        out.say(&line);
                    }
                    out.bar.set_message(snapshot.flags.installation_status.clone());
                    shown = Some(snapshot);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("[PHASE: console] [STEP: events] Event channel closed");
                thread::sleep(TICK);
            }
        }
        queue.run_pending(&mut host);
    }

    out.bar.finish_and_clear();
    Ok(host.exit_code)
}

/// Returns true when the model should be re-read.
fn handle_event(out: &Output, ev: LauncherEvent) -> bool {
    match ev {
        LauncherEvent::Log(bytes) => {
            for line in String::from_utf8_lossy(&bytes).lines() {
                if !line.trim().is_empty() {
                    out.say(line.trim_end());
                }
            }
            false
        }
        LauncherEvent::StateChange => true,
        LauncherEvent::Exit => {
            out.say("Shutting down...");
            false
        }
    }
}

fn prompt_for(snapshot: &ModelSnapshot) -> Option<String> {
    match snapshot.state {
        ModalState::InstallNeeded => Some(
            "Docker and WSL 2 are required to run the node. Press Enter to install them, or 'q' to quit."
                .to_string(),
        ),
        ModalState::InstallFinished if snapshot.flags.reboot_after_wsl_enable => Some(
            "WSL has been enabled. Restart Windows and run the launcher again. Press Enter to close."
                .to_string(),
        ),
        ModalState::InstallFinished => Some(format!(
            "{}. Press Enter to continue.",
            snapshot.flags.installation_status
        )),
        ModalState::InstallError => Some(format!(
            "Installation failed: {}. Press Enter to exit.",
            snapshot.flags.installation_status
        )),
        ModalState::Initial | ModalState::InstallInProgress => None,
    }
}

/// Lines worth printing for the transition `prev -> next`.
fn describe_changes(prev: Option<&ModelSnapshot>, next: &ModelSnapshot) -> Vec<String> {
    let mut lines = Vec::new();

    if prev.map(|p| p.state) != Some(next.state) {
        if let Some(prompt) = prompt_for(next) {
            lines.push(prompt);
        }
    }

    let services = [
        ("Docker", prev.map(|p| p.docker), next.docker),
        ("Node", prev.map(|p| p.container), next.container),
    ];
    for (name, before, now) in services {
        if now != RunnableState::Unknown && before != Some(now) {
            lines.push(format!("{} is {}", name, now.as_str()));
        }
    }

    if let Some(p) = prev {
        if p.preference.auto_start != next.preference.auto_start {
            lines.push(format!(
                "Auto-start {}",
                if next.preference.auto_start { "enabled" } else { "disabled" }
            ));
        }
    }
    lines
}

fn spawn_input_reader(session: Arc<Session>) -> Result<()> {
    thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        error!("[PHASE: console] [STEP: input] stdin read failed: {}", e);
                        break;
                    }
                };
                match parse_command(&line) {
                    Some(cmd) => apply_command(&session, cmd),
                    None => info!(
                        "[PHASE: console] [STEP: input] Unknown command '{}'",
                        line.trim()
                    ),
                }
                if session.model.exit_requested() {
                    break;
                }
            }
            debug!("[PHASE: console] [STEP: input] Input reader stopped");
        })
        .context("Failed to start console input thread")?;
    Ok(())
}

fn apply_command(session: &Session, cmd: ConsoleCommand) {
    match cmd {
        ConsoleCommand::Continue => {
            if session.model.state().awaits_acknowledgment() {
                session.model.button_clicked();
            }
        }
        ConsoleCommand::ToggleAutoStart => session.toggle_auto_start(),
        ConsoleCommand::OpenNodeUi => match session.open_node_ui() {
            Ok(()) => info!(
                "[PHASE: console] [STEP: open_ui] Opened {}",
                session.settings.node_ui_url
            ),
            Err(e) => error!("[PHASE: console] [STEP: open_ui] {:#}", e),
        },
        ConsoleCommand::Quit => session.model.request_exit(),
    }
}
