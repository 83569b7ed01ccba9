use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::{ProgressEvent, ProgressSink, ProgressSinkKind};
use crate::error::SpeciesError;

const EVENTS_MAX: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Resolve,
    Fetch,
    Store,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Resolve => "Resolve",
            Phase::Fetch => "Fetch",
            Phase::Store => "Store",
        }
    }

    fn index(self) -> usize {
        match self {
            Phase::Resolve => 0,
            Phase::Fetch => 1,
            Phase::Store => 2,
        }
    }
}

#[derive(Debug)]
struct TuiState {
    status: String,
    phase: Phase,
    pages: u64,
    failures: u64,
    latency_ms: Option<u128>,
    events: VecDeque<String>,
    started: Instant,
}

pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<TuiState>>,
}

struct TuiProgress {
    state: Arc<Mutex<TuiState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            if let Some((phase, payload)) = parse_phase(&message) {
                state.phase = phase;
                state.status = payload.to_string();
                if phase == Phase::Fetch && payload.contains(" page ") {
                    state.pages = state.pages.saturating_add(1);
                }
            } else if let Some(latency) = parse_latency(&message) {
                state.latency_ms = Some(latency);
            } else {
                state.status = message.clone();
            }
            if message.contains("failed") {
                state.failures = state.failures.saturating_add(1);
            }

            state.events.push_back(message);
            while state.events.len() > EVENTS_MAX {
                state.events.pop_front();
            }
        }
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(TuiState {
                status: "ready".to_string(),
                phase: Phase::Resolve,
                pages: 0,
                failures: 0,
                latency_ms: None,
                events: VecDeque::new(),
                started: Instant::now(),
            })),
        }
    }

    /// Runs `f` on a worker thread while drawing its progress. `q` or `Esc`
    /// only closes the screen: the call still waits for `f` to finish and
    /// returns its result.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, SpeciesError> + Send + 'static,
        R: Send + 'static,
    {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        let outcome = loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self.kind, &state, tick))
                    .into_diagnostic()?;
            }

            if let Ok(result) = rx.try_recv() {
                break Some(result);
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if is_quit(key) {
                        break None;
                    }
                }
            }

            tick = tick.wrapping_add(1);
        };

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;

        match outcome {
            Some(result) => {
                handle.join().ok();
                result.map_err(miette::Report::new)
            }
            None => {
                eprintln!("progress screen closed; waiting for the running operation to finish");
                wait_for_worker(&rx, handle)
            }
        }
    }

    pub fn confirm(&mut self, question: &str) -> miette::Result<bool> {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;

        let confirmed = loop {
            terminal
                .draw(|frame| {
                    let block = Block::default().borders(Borders::ALL).title("Confirm");
                    let text = Paragraph::new(vec![
                        Line::from(question.to_string()),
                        Line::from("Press y to confirm, n to cancel."),
                    ])
                    .alignment(Alignment::Center)
                    .block(block);
                    frame.render_widget(text, frame.area());
                })
                .into_diagnostic()?;

            if event::poll(Duration::from_millis(100)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    match key.code {
                        KeyCode::Char('y') | KeyCode::Char('Y') => break true,
                        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => break false,
                        _ => {}
                    }
                }
            }
        };

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        Ok(confirmed)
    }
}

fn is_quit(key: KeyEvent) -> bool {
    key.kind == KeyEventKind::Press && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
}

fn draw_ui(frame: &mut ratatui::Frame, kind: ProgressSinkKind, state: &TuiState, tick: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(6),
            Constraint::Min(4),
        ])
        .split(frame.area());

    let hb = if tick % 2 == 0 { "*" } else { " " };
    let op_label = match kind {
        ProgressSinkKind::List => "List",
        ProgressSinkKind::Lookup => "Lookup",
        ProgressSinkKind::Search => "Search",
        ProgressSinkKind::Invalidate => "Invalidate",
    };
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "SPECIES-CACHE",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(op_label, Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]))
    .block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, chunks[0]);

    let latency = state
        .latency_ms
        .map(|v| format!("{v} ms"))
        .unwrap_or_else(|| "--".to_string());
    let status = Paragraph::new(vec![
        Line::from(vec![
            Span::styled("Phase: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{:<7} ", state.phase.label()),
                Style::default().fg(Color::Cyan),
            ),
            Span::raw(progress_bar(state.phase)),
        ]),
        Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
        Line::from(vec![
            Span::styled("Page requests: ", Style::default().fg(Color::Gray)),
            Span::raw(state.pages.to_string()),
            Span::styled("   Failures: ", Style::default().fg(Color::Gray)),
            Span::styled(
                state.failures.to_string(),
                Style::default().fg(if state.failures > 0 {
                    Color::Yellow
                } else {
                    Color::Green
                }),
            ),
        ]),
        Line::from(vec![
            Span::styled("Latency: ", Style::default().fg(Color::Gray)),
            Span::raw(latency),
            Span::styled("   Elapsed: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{}s", state.started.elapsed().as_secs())),
        ]),
    ])
    .block(Block::default().borders(Borders::BOTTOM).title("STATUS"));
    frame.render_widget(status, chunks[1]);

    let events = state
        .events
        .iter()
        .rev()
        .map(|event| Line::from(format!("- {event}")))
        .collect::<Vec<_>>();
    let events = Paragraph::new(events)
        .block(Block::default().title("Recent events (q to leave)"))
        .wrap(Wrap { trim: true });
    frame.render_widget(events, chunks[2]);
}

fn progress_bar(phase: Phase) -> String {
    let total = 9;
    let filled = (phase.index() + 1) * total / 3;
    let mut out = String::from("[");
    for i in 0..total {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    if let Some(rest) = message.strip_prefix("phase=Resolve;") {
        return Some((Phase::Resolve, rest.trim()));
    }
    if let Some(rest) = message.strip_prefix("phase=Fetch;") {
        return Some((Phase::Fetch, rest.trim()));
    }
    if let Some(rest) = message.strip_prefix("phase=Store;") {
        return Some((Phase::Store, rest.trim()));
    }
    None
}

fn wait_for_worker<R, T>(
    rx: &Receiver<Result<R, SpeciesError>>,
    handle: JoinHandle<T>,
) -> miette::Result<R> {
    let result = rx.recv();
    handle
        .join()
        .map_err(|_| miette::Report::msg("worker thread panicked"))?;
    let result = result.map_err(|_| miette::Report::msg("worker stopped without a result"))?;
    result.map_err(miette::Report::new)
}

fn parse_latency(message: &str) -> Option<u128> {
    message
        .split("latency_ms=")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse::<u128>().ok())
}
