//! Terminal UI surface.
//!
//! Layout:
//! - Centered window titled "Mysterium Node Launcher"
//! - Left banner panel with ASCII logo
//! - Main panel: service status or installation progress
//! - Log panel fed by `log` events
//! - Modal for the prompts the installer waits on (confirm, finished, error)
//! - Bottom button row: [ Continue ] [ Open node UI ] [ Quit ]
//!
//! This thread is the rendering thread: it drains the event channel, re-reads the model
//! snapshot on `state-change` and runs marshaled UI tasks every tick. Logging is
//! file-only plus the on-screen panel so the terminal is never written to directly.

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use log::{error, info, warn};
use ratatui::backend::{Backend, CrosstermBackend, TestBackend};
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Margin, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Terminal;
use std::collections::VecDeque;
use std::io::{self, Stdout};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::coordination::{RenderHost, UiTaskQueue};
use crate::events::LauncherEvent;
use crate::models::preferences::InstallPreference;
use crate::models::state::{ModalState, ModelSnapshot, RunnableState, Stage, StageFlags};
use crate::Session;

const ASCII_LOGO: &str = r#"███╗   ███╗██╗   ██╗███████╗████████╗
████╗ ████║╚██╗ ██╔╝██╔════╝╚══██╔══╝
██╔████╔██║ ╚████╔╝ ███████╗   ██║
██║╚██╔╝██║  ╚██╔╝  ╚════██║   ██║
██║ ╚═╝ ██║   ██║   ███████║   ██║
╚═╝     ╚═╝   ╚═╝   ╚══════╝   ╚═╝"#;

const MAX_LOG_LINES: usize = 200;

struct TuiState {
    snapshot: ModelSnapshot,
    log_lines: VecDeque<String>,
    notice: Option<String>,
    exiting: bool,
    quit: bool,
    exit_code: i32,
}

impl TuiState {
    fn new(snapshot: ModelSnapshot) -> Self {
        Self {
            snapshot,
            log_lines: VecDeque::new(),
            notice: None,
            exiting: false,
            quit: false,
            exit_code: 0,
        }
    }

    fn push_log(&mut self, bytes: &[u8]) {
        for line in String::from_utf8_lossy(bytes).lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            if self.log_lines.len() == MAX_LOG_LINES {
                self.log_lines.pop_front();
            }
            self.log_lines.push_back(line.to_string());
        }
    }
}

impl RenderHost for TuiState {
    fn exit(&mut self, code: i32) {
        self.exit_code = code;
        self.quit = true;
    }
}

pub fn run(
    session: &Session,
    queue: &UiTaskQueue,
    events: mpsc::Receiver<LauncherEvent>,
) -> Result<i32> {
    info!("[PHASE: tui] [STEP: start] Starting TUI");

    let mut terminal = setup_terminal()?;
    let result = run_loop(&mut terminal, session, queue, &events);
    restore_terminal(&mut terminal)?;

    result
}

/// Non-interactive smoke mode: render a single frame and exit.
/// Targets: initial|install_needed|install_in_progress|install_finished|install_error
pub fn smoke(target: &str) -> Result<()> {
    info!(
        "[PHASE: tui] [STEP: smoke] Rendering single-frame TUI smoke target={}",
        target
    );

    let state = smoke_state(target);

    // In-memory backend: no raw mode, no alternate screen.
    let backend = TestBackend::new(100, 30);
    let mut terminal = Terminal::new(backend)?;
    terminal.draw(|f| draw(f.size(), f, &state))?;

    Ok(())
}

fn smoke_state(target: &str) -> TuiState {
    let modal = ModalState::parse(target).unwrap_or_else(|| {
        warn!(
            "[PHASE: tui] [STEP: smoke] Unknown smoke target '{}', rendering initial",
            target
        );
        ModalState::Initial
    });

    let mut flags = StageFlags::default();
    let mut snapshot = ModelSnapshot {
        state: modal,
        preference: InstallPreference { auto_start: true },
        ..ModelSnapshot::default()
    };
    match modal {
        ModalState::Initial => {
            snapshot.docker = RunnableState::Running;
            snapshot.container = RunnableState::Starting;
            flags.installation_status = "Docker is already installed".to_string();
        }
        ModalState::InstallNeeded => {
            flags.set(Stage::CheckWindowsVersion);
            flags.set(Stage::CheckVTx);
        }
        ModalState::InstallInProgress => {
            for stage in &Stage::ALL[..4] {
                flags.set(*stage);
            }
            flags.installation_status = "Downloading files...".to_string();
        }
        ModalState::InstallFinished => {
            for stage in Stage::ALL {
                if stage != Stage::RebootAfterWslEnable {
                    flags.set(stage);
                }
            }
            flags.installation_status = "Installation succeeded".to_string();
        }
        ModalState::InstallError => {
            flags.set(Stage::CheckWindowsVersion);
            flags.installation_status = "Checking virtualization support failed".to_string();
        }
    }
    snapshot.flags = flags;

    let mut state = TuiState::new(snapshot);
    state.push_log(b"INFO  [install/step] Checking Windows version\n");
    state
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    session: &Session,
    queue: &UiTaskQueue,
    events: &mpsc::Receiver<LauncherEvent>,
) -> Result<i32> {
    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();
    let mut state = TuiState::new(session.model.snapshot());

    while !state.quit {
        drain_events(&mut state, events, session);
        queue.run_pending(&mut state);
        if state.quit {
            break;
        }
        terminal
            .draw(|f| draw(f.size(), f, &state))
            .context("Failed to draw TUI frame")?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_millis(0));

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    handle_key(&mut state, key.code, session);
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }
    }

    Ok(state.exit_code)
}

fn drain_events(state: &mut TuiState, rx: &mpsc::Receiver<LauncherEvent>, session: &Session) {
    let mut refresh = false;
    while let Ok(ev) = rx.try_recv() {
        match ev {
            LauncherEvent::Log(bytes) => state.push_log(&bytes),
            LauncherEvent::StateChange => refresh = true,
            LauncherEvent::Exit => state.exiting = true,
        }
    }
    if refresh {
        state.snapshot = session.model.snapshot();
    }
}

fn handle_key(state: &mut TuiState, code: KeyCode, session: &Session) {
    match code {
        // The snapshot can lag the worker by a tick; gate on the live state.
        KeyCode::Enter => {
            if session.model.state().awaits_acknowledgment() {
                session.model.button_clicked();
            }
        }
        KeyCode::Char('a') | KeyCode::Char('A') => session.toggle_auto_start(),
        KeyCode::Char('o') | KeyCode::Char('O') => {
            state.notice = Some(match session.open_node_ui() {
                Ok(()) => format!("Opened {}", session.settings.node_ui_url),
                Err(e) => {
                    error!("[PHASE: tui] [STEP: open_ui] {:#}", e);
                    format!("Could not open {}", session.settings.node_ui_url)
                }
            });
        }
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => {
            session.model.request_exit();
        }
        _ => {}
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame<'_>, state: &TuiState) {
    let window_area = centered_window(area, 100, 30);

    // Outer frame
    let outer_block = Block::default()
        .borders(Borders::ALL)
        .title("Mysterium Node Launcher");
    f.render_widget(outer_block, window_area);

    // Inner layout: body + log panel + buttons row
    let inner = window_area.inner(&Margin {
        vertical: 1,
        horizontal: 1,
    });
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Min(12),
                Constraint::Length(8),
                Constraint::Length(1),
            ]
            .as_ref(),
        )
        .split(inner);

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(40), Constraint::Min(0)].as_ref())
        .split(rows[0]);

    // Left banner
    let logo = Paragraph::new(ASCII_LOGO)
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Left)
        .wrap(Wrap { trim: false });
    f.render_widget(logo, cols[0]);

    // Right content
    let content = Paragraph::new(content_text(state))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(content_title(state.snapshot.state)),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(content, cols[1]);

    draw_log_panel(f, rows[1], state);
    draw_buttons(f, rows[2], state);

    if let Some((title, body)) = modal_text(state) {
        draw_message_modal(f, window_area, title, &body, state);
    }
}

fn centered_window(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width.saturating_sub(2)).max(60).min(area.width);
    let h = height.min(area.height.saturating_sub(2)).max(20).min(area.height);
    let x = area.x + (area.width.saturating_sub(w)) / 2;
    let y = area.y + (area.height.saturating_sub(h)) / 2;
    Rect {
        x,
        y,
        width: w,
        height: h,
    }
}

fn content_title(modal: ModalState) -> &'static str {
    match modal {
        ModalState::Initial => "Status",
        ModalState::InstallNeeded => "Installation required",
        ModalState::InstallInProgress => "Installing",
        ModalState::InstallFinished => "Installation finished",
        ModalState::InstallError => "Installation failed",
    }
}

fn runnable_span(state: RunnableState) -> Span<'static> {
    let color = match state {
        RunnableState::Running => Color::Green,
        RunnableState::Starting => Color::Yellow,
        RunnableState::Failed => Color::Red,
        RunnableState::Stopped | RunnableState::Unknown => Color::DarkGray,
    };
    Span::styled(state.as_str().to_string(), Style::default().fg(color))
}

fn content_text(state: &TuiState) -> Text<'static> {
    let snap = &state.snapshot;
    let mut lines = Vec::new();

    match snap.state {
        ModalState::Initial => {
            lines.push(Line::from(vec![
                Span::raw("Docker:       "),
                runnable_span(snap.docker),
            ]));
            lines.push(Line::from(vec![
                Span::raw("Node:         "),
                runnable_span(snap.container),
            ]));
            lines.push(Line::from(""));
        }
        _ => {
            for stage in Stage::ALL {
                let mark = if snap.flags.is_set(stage) { "[x]" } else { "[ ]" };
                lines.push(Line::from(format!("{} {}", mark, stage.label())));
            }
            lines.push(Line::from(""));
        }
    }

    if !snap.flags.installation_status.is_empty() {
        lines.push(Line::from(format!(
            "Status: {}",
            snap.flags.installation_status
        )));
    }
    let auto = if snap.preference.auto_start { "[x]" } else { "[ ]" };
    lines.push(Line::from(format!("{} Start node automatically", auto)));
    if let Some(notice) = &state.notice {
        lines.push(Line::from(notice.clone()));
    }
    if state.exiting {
        lines.push(Line::from(Span::styled(
            "Shutting down...",
            Style::default().add_modifier(Modifier::BOLD),
        )));
    }
    Text::from(lines)
}

fn draw_log_panel(f: &mut ratatui::Frame<'_>, area: Rect, state: &TuiState) {
    let visible = area.height.saturating_sub(2) as usize;
    let start = state.log_lines.len().saturating_sub(visible);
    let lines: Vec<Line> = state
        .log_lines
        .iter()
        .skip(start)
        .map(|l| Line::from(l.clone()))
        .collect();
    let p = Paragraph::new(Text::from(lines))
        .block(Block::default().borders(Borders::ALL).title("Log"))
        .wrap(Wrap { trim: true });
    f.render_widget(p, area);
}

fn draw_buttons(f: &mut ratatui::Frame<'_>, area: Rect, state: &TuiState) {
    let can_continue = state.snapshot.state.awaits_acknowledgment();
    let line = Line::from(vec![
        Span::raw("a=auto-start  "),
        button_text("Enter: Continue", can_continue, can_continue),
        Span::raw(" "),
        button_text("O: Open node UI", false, true),
        Span::raw(" "),
        button_text("Q: Quit", false, true),
    ]);
    let p = Paragraph::new(Text::from(line)).alignment(Alignment::Right);
    f.render_widget(p, area);
}

fn button_text(label: &str, focused: bool, enabled: bool) -> Span<'static> {
    let mut style = Style::default();
    if !enabled {
        style = style.fg(Color::DarkGray);
    }
    if focused && enabled {
        style = style.add_modifier(Modifier::REVERSED);
    }
    Span::styled(format!("[ {} ]", label), style)
}

fn modal_text(state: &TuiState) -> Option<(&'static str, String)> {
    let status = &state.snapshot.flags.installation_status;
    match state.snapshot.state {
        ModalState::InstallNeeded => Some((
            "Install Docker?",
            "Docker and WSL 2 are required to run the node.\n\nPress Enter to install them now or Q to quit."
                .to_string(),
        )),
        ModalState::InstallFinished => {
            let body = if state.snapshot.flags.reboot_after_wsl_enable {
                "WSL has been enabled. Restart Windows and run the launcher again to finish installing."
                    .to_string()
            } else {
                format!("{}\n\nPress Enter to continue.", status)
            };
            Some(("Installation finished", body))
        }
        ModalState::InstallError => Some((
            "Installation failed",
            format!("{}\n\nPress Enter to exit.", status),
        )),
        ModalState::Initial | ModalState::InstallInProgress => None,
    }
}

fn draw_message_modal(
    f: &mut ratatui::Frame<'_>,
    window_area: Rect,
    title: &str,
    body: &str,
    state: &TuiState,
) {
    let modal_w = 70u16.min(window_area.width.saturating_sub(4)).max(40);
    let modal_h = 10u16.min(window_area.height.saturating_sub(4)).max(7);
    let x = window_area.x + (window_area.width.saturating_sub(modal_w)) / 2;
    let y = window_area.y + (window_area.height.saturating_sub(modal_h)) / 2;
    // Tiny terminals: never draw past the window.
    let area = Rect {
        x,
        y,
        width: modal_w,
        height: modal_h,
    }
    .intersection(window_area);

    f.render_widget(Clear, area);
    let block = Block::default().borders(Borders::ALL).title(title);
    let p = Paragraph::new(Text::from(body.to_string()))
        .block(block)
        .wrap(Wrap { trim: false });
    f.render_widget(p, area);

    if area.width < 3 || area.height < 3 {
        return;
    }
    let buttons_area = Rect {
        x: area.x + 1,
        y: area.y + area.height - 2,
        width: area.width - 2,
        height: 1,
    };
    let ok = button_text("OK", true, !state.exiting);
    let p = Paragraph::new(Text::from(Line::from(vec![ok]))).alignment(Alignment::Right);
    f.render_widget(p, buttons_area);
}
