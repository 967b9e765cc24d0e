//! Terminal explorer for a mirrored world.
//!
//! Run with: cargo run -p tui-explorer-demo
//!
//! Environment:
//! - `WORLDLINK_CONFIG` - path to a JSON client config
//! - `WORLDLINK_URL` - server URL, overrides the config
//! - `WORLDLINK_SECRET` - session secret to resume with
//! - `WORLDLINK_SECRET_FILE` - where the session secret is loaded from and saved to
//! - `WORLDLINK_LOG` - log file, `tui-explorer.log` by default

use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use anyhow::Context;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction as Axis, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use worldlink_client::{
    ChatKind, ClientConfig, ClientUpdate, ConnectionStatus, Crumb, Direction, ObjectId, WorldClient,
};
use worldlink_transport::WsConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let config = load_config()?;
    let secret_file = std::env::var_os("WORLDLINK_SECRET_FILE").map(PathBuf::from);
    let secret = initial_secret(secret_file.as_deref());
    let client = WorldClient::connect(config, WsConnector, secret)?;

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, App::new(client, secret_file)).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

/// Logs go to a file so they do not scribble over the UI.
fn init_tracing() -> anyhow::Result<()> {
    let path = std::env::var("WORLDLINK_LOG").unwrap_or_else(|_| "tui-explorer.log".to_string());
    let file = File::create(&path).with_context(|| format!("creating log file {path}"))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    Ok(())
}

fn load_config() -> anyhow::Result<ClientConfig> {
    let mut config = match std::env::var_os("WORLDLINK_CONFIG") {
        Some(path) => {
            let path = PathBuf::from(path);
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            ClientConfig::from_json(&text).context("parsing client config")?
        }
        None => ClientConfig::default(),
    };
    if let Ok(url) = std::env::var("WORLDLINK_URL") {
        config.url = url;
    }
    Ok(config)
}

fn initial_secret(secret_file: Option<&Path>) -> Option<String> {
    if let Ok(secret) = std::env::var("WORLDLINK_SECRET") {
        return Some(secret);
    }
    let text = std::fs::read_to_string(secret_file?).ok()?;
    let secret = text.trim();
    (!secret.is_empty()).then(|| secret.to_string())
}

/// Forward terminal events from a blocking reader thread.
fn spawn_input_reader() -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        loop {
            match event::poll(Duration::from_millis(100)) {
                Ok(true) => match event::read() {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Terminal read failed: {e}");
                        break;
                    }
                },
                Ok(false) if tx.is_closed() => break,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("Terminal poll failed: {e}");
                    break;
                }
            }
        }
    });
    rx
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Browse,
    Chat,
}

struct App {
    client: WorldClient,
    mode: Mode,
    input: String,
    notice: Option<String>,
    secret_file: Option<PathBuf>,
}

impl App {
    const fn new(client: WorldClient, secret_file: Option<PathBuf>) -> Self {
        Self {
            client,
            mode: Mode::Browse,
            input: String::new(),
            notice: None,
            secret_file,
        }
    }

    /// Returns whether the screen needs a redraw.
    async fn apply(&mut self, update: ClientUpdate) -> bool {
        match update {
            ClientUpdate::Render { .. } | ClientUpdate::Status(_) | ClientUpdate::Chat(_) => true,
            ClientUpdate::SecretRotated(secret) => {
                if let Some(path) = &self.secret_file {
                    if let Err(e) = tokio::fs::write(path, secret).await {
                        tracing::warn!("Saving session secret to {} failed: {e}", path.display());
                    }
                }
                false
            }
            ClientUpdate::Fault(fault) => {
                self.notice = Some(format!("bad record: {}", fault.error));
                true
            }
            _ => false,
        }
    }

    /// Returns `false` when the user asked to quit.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return false;
        }
        match self.mode {
            Mode::Browse => self.browse_key(key.code),
            Mode::Chat => {
                self.chat_key(key.code);
                true
            }
        }
    }

    fn browse_key(&mut self, code: KeyCode) -> bool {
        let direction = match code {
            KeyCode::Char('q') => return false,
            KeyCode::Char('/') | KeyCode::Tab => {
                self.mode = Mode::Chat;
                return true;
            }
            KeyCode::Up | KeyCode::Char('k') => Direction::PrevSibling,
            KeyCode::Down | KeyCode::Char('j') => Direction::NextSibling,
            KeyCode::Right | KeyCode::Char('l') => Direction::FirstChild,
            KeyCode::Left | KeyCode::Char('h') => Direction::Parent,
            _ => return true,
        };
        self.notice = None;
        self.client.move_focus(direction);
        true
    }

    fn chat_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc => self.mode = Mode::Browse,
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Enter => {
                let text = std::mem::take(&mut self.input);
                let text = text.trim();
                if text.is_empty() {
                    return;
                }
                if let Err(e) = self.client.send_chat(text, None) {
                    tracing::warn!("Chat not sent: {e}");
                    self.notice = Some(format!("not sent: {e}"));
                }
            }
            KeyCode::Char(c) => self.input.push(c),
            _ => {}
        }
    }
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    mut app: App,
) -> anyhow::Result<()> {
    let mut input = spawn_input_reader();
    terminal.draw(|f| ui(f, &app))?;

    loop {
        tokio::select! {
            update = app.client.next_update() => {
                let Some(update) = update else {
                    break;
                };
                if app.apply(update).await {
                    terminal.draw(|f| ui(f, &app))?;
                }
            }
            event = input.recv() => {
                match event {
                    Some(Event::Key(key)) => {
                        if !app.handle_key(key) {
                            break;
                        }
                    }
                    Some(_) => {}
                    None => break,
                }
                terminal.draw(|f| ui(f, &app))?;
            }
        }
    }

    app.client.close().await;
    Ok(())
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Axis::Vertical)
        .constraints([
            Constraint::Length(1), // Breadcrumb
            Constraint::Min(5),    // Columns
            Constraint::Length(8), // Chat
            Constraint::Length(3), // Input
            Constraint::Length(1), // Status
        ])
        .split(f.area());

    render_breadcrumb(f, app, chunks[0]);
    render_columns(f, app, chunks[1]);
    render_chat(f, app, chunks[2]);
    render_input(f, app, chunks[3]);
    render_status(f, app, chunks[4]);
}

fn render_breadcrumb(f: &mut Frame, app: &App, area: Rect) {
    let mut spans = vec![Span::raw(" ")];
    for (i, crumb) in app.client.breadcrumb().iter().enumerate() {
        if i > 0 {
            spans.push(Span::styled(" > ", Style::default().fg(Color::DarkGray)));
        }
        match crumb {
            Crumb::Ellipsis(_) => spans.push(Span::raw("...")),
            Crumb::Object(obj) => spans.push(Span::raw(obj.label())),
        }
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn object_lines<'a>(app: &App, ids: &'a [ObjectId], highlight: Option<&str>) -> Vec<Line<'a>> {
    ids.iter()
        .map(|id| {
            let label = app.client.get(id).map_or_else(|| id.clone(), |obj| obj.label());
            if highlight == Some(id.as_str()) {
                Line::styled(
                    format!("> {label}"),
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )
            } else {
                Line::raw(format!("  {label}"))
            }
        })
        .collect()
}

fn render_columns(f: &mut Frame, app: &App, area: Rect) {
    let columns = Layout::default()
        .direction(Axis::Horizontal)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Percentage(30),
            Constraint::Percentage(40),
        ])
        .split(area);

    let focus = app.client.focus();
    let focus_id = focus.map(|obj| obj.id.clone());

    let root_only;
    let siblings = match focus {
        Some(obj) if obj.parent_id.is_none() => {
            root_only = [obj.id.clone()];
            &root_only[..]
        }
        _ => app.client.siblings(),
    };
    let sibling_list = Paragraph::new(object_lines(app, siblings, focus_id.as_deref()))
        .block(Block::default().borders(Borders::ALL).title("Siblings"));
    f.render_widget(sibling_list, columns[0]);

    let children = focus_id.as_deref().map_or(&[][..], |id| app.client.children_of(id));
    let child_list = Paragraph::new(object_lines(app, children, None))
        .block(Block::default().borders(Borders::ALL).title("Children"));
    f.render_widget(child_list, columns[1]);

    let details = focus.map_or_else(
        || vec![Line::raw("Nothing focused yet")],
        |obj| {
            let mut lines = vec![
                Line::raw(format!("id:      {}", obj.id)),
                Line::raw(format!("type:    {}", obj.kind)),
                Line::raw(format!("name:    {}", obj.name)),
                Line::raw(format!("quality: {:.2}", obj.quality)),
                Line::raw(format!("damage:  {:.2}", obj.damage)),
                Line::raw(format!("weight:  {}", obj.weight)),
            ];
            let mut extra: Vec<_> = obj.extra.iter().collect();
            extra.sort_by(|a, b| a.0.cmp(b.0));
            lines.extend(extra.into_iter().map(|(k, v)| Line::raw(format!("{k}: {v}"))));
            lines
        },
    );
    let detail_view = Paragraph::new(details)
        .block(Block::default().borders(Borders::ALL).title("Details"))
        .wrap(Wrap { trim: false });
    f.render_widget(detail_view, columns[2]);
}

fn render_chat(f: &mut Frame, app: &App, area: Rect) {
    let visible = usize::from(area.height.saturating_sub(2));
    let log = app.client.chat_log();
    let lines: Vec<Line> = log
        .iter()
        .skip(log.len().saturating_sub(visible))
        .map(|line| {
            let style = match line.kind {
                ChatKind::Received => Style::default(),
                ChatKind::Sent => Style::default().fg(Color::Cyan),
                ChatKind::System => Style::default().fg(Color::DarkGray),
            };
            Line::styled(format!("[{}] {}", line.channel, line.content), style)
        })
        .collect();

    let chat = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Chat"))
        .wrap(Wrap { trim: false });
    f.render_widget(chat, area);
}

fn render_input(f: &mut Frame, app: &App, area: Rect) {
    let title = match app.mode {
        Mode::Browse => "Press / to chat",
        Mode::Chat => "Chat (Enter send, Esc back)",
    };
    let input = Paragraph::new(app.input.as_str())
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(input, area);

    if app.mode == Mode::Chat {
        let offset = u16::try_from(app.input.chars().count()).unwrap_or(u16::MAX);
        f.set_cursor_position((area.x.saturating_add(offset).saturating_add(1), area.y + 1));
    }
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let (text, color) = match app.client.status() {
        ConnectionStatus::Connecting => ("Connecting...".to_string(), Color::Yellow),
        ConnectionStatus::Open => ("Connected".to_string(), Color::Green),
        ConnectionStatus::Closed { retry_in } => (
            format!("Disconnected, retrying in {}s", retry_in.as_secs()),
            Color::Red,
        ),
    };

    let mut spans = vec![
        Span::raw(" "),
        Span::styled(text, Style::default().fg(color)),
        Span::raw(format!(" | {} objects | ", app.client.graph().len())),
        Span::styled("hjkl/arrows", Style::default().fg(Color::Yellow)),
        Span::raw(" move | "),
        Span::styled("q", Style::default().fg(Color::Yellow)),
        Span::raw(" quit "),
    ];
    if let Some(notice) = &app.notice {
        spans.push(Span::styled(format!("| {notice}"), Style::default().fg(Color::Red)));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}
