use std::io::{self, Stdout};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use connector_adapters::http::{HttpBackend, HttpBackendError};
use connector_core::connection_log::{ConnectionLog, ConnectionLogError, FileConnectionLog};
use connector_core::session::{ConnectionStatus, Session, SessionHandle};
use connector_core::settings::ConnectorSettings;
use connector_core::tag_store::{FileTagStore, TagFileError};
use connector_core::tags::{EditorPhase, TagStore, TagsEditor};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

pub mod app;
pub mod services;

use app::{Command, Completion, ConnectorApp, DirectionKey, Msg, Pane, SchemaFocus};
use services::Services;

const TICK_RATE: Duration = Duration::from_millis(100);
const ACTIVITY_LINES: u16 = 3;

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Backend(#[from] HttpBackendError),
    #[error(transparent)]
    Tags(#[from] TagFileError),
    #[error(transparent)]
    ConnectionLog(#[from] ConnectionLogError),
}

type HttpServices = Services<HttpBackend>;

/// Runs the terminal UI against the backend named in `settings`.
pub fn run(settings: &ConnectorSettings) -> Result<(), TuiError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    let backend = HttpBackend::from_settings(settings)?;
    let log = if settings.connection_log {
        ConnectionLog::with_file(FileConnectionLog::load_default()?)
    } else {
        ConnectionLog::in_memory()
    };
    let session = SessionHandle::new(settings.default_dialect);
    let services = Arc::new(Services::new(
        backend,
        session.clone(),
        log,
        settings.preview_row_limit,
    ));

    let store = Arc::new(FileTagStore::load_default()?);
    let editor = TagsEditor::new(Arc::clone(&store), store.tags());
    let app = ConnectorApp::new(session.clone(), editor);

    let (session_tx, session_rx) = mpsc::channel::<Session>();
    let subscription = session.subscribe(forward_session(session_tx));

    info!(backend_url = %settings.backend_url, "starting terminal UI");
    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, &runtime, &services, app, &session_rx);
    let restore_result = restore_terminal(&mut terminal);
    session.unsubscribe(subscription);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn forward_session(sender: Sender<Session>) -> impl Fn(&Session) + Send + Sync + 'static {
    move |snapshot| {
        if sender.send(snapshot.clone()).is_err() {
            debug!("terminal UI closed before a session update was delivered");
        }
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop<S: TagStore>(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    runtime: &Runtime,
    services: &Arc<HttpServices>,
    mut app: ConnectorApp<S>,
    session_rx: &Receiver<Session>,
) -> Result<(), TuiError> {
    let (completion_tx, completion_rx) = mpsc::channel::<Completion>();

    loop {
        terminal.draw(|frame| render(frame, &app))?;

        if event::poll(TICK_RATE)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(command) = map_key_event(key).and_then(|msg| app.handle(msg)) {
                        dispatch(runtime, services, &completion_tx, &mut app, command);
                    }
                }
            }
        }

        while let Ok(snapshot) = session_rx.try_recv() {
            app.apply_session(snapshot);
        }
        while let Ok(completion) = completion_rx.try_recv() {
            if let Some(command) = app.apply(completion) {
                dispatch(runtime, services, &completion_tx, &mut app, command);
            }
        }

        if app.should_quit() {
            break;
        }
    }

    Ok(())
}

/// Session commands run on the runtime and report back over `completions`;
/// tag actions only touch the local tag file and complete inline.
fn dispatch<S: TagStore>(
    runtime: &Runtime,
    services: &Arc<HttpServices>,
    completions: &Sender<Completion>,
    app: &mut ConnectorApp<S>,
    command: Command,
) {
    match command {
        Command::Session(command) => {
            let services = Arc::clone(services);
            let completions = completions.clone();
            runtime.spawn(async move {
                let completion = services.execute(command).await;
                if completions.send(completion).is_err() {
                    warn!("terminal UI closed before a backend call completed");
                }
            });
        }
        Command::Tag(action) => runtime.block_on(app.run_tag_action(action)),
    }
}

fn render<S: TagStore>(frame: &mut Frame<'_>, app: &ConnectorApp<S>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(ACTIVITY_LINES + 3),
        ])
        .split(frame.area());

    let session = app.session();
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" {} ", app.pane().title()),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!("Dialect: {}", session.dialect.label())),
        Span::raw(" | "),
        Span::styled(
            format!("Status: {}", session.status.as_str()),
            status_style(session.status),
        ),
        Span::raw(" | "),
        Span::raw(format!(
            "DB: {}",
            session.selected_database.as_deref().unwrap_or("-")
        )),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Connector"));
    frame.render_widget(header, chunks[0]);

    match app.pane() {
        Pane::Connection => render_connection(frame, app, chunks[1]),
        Pane::Schema => render_schema(frame, app, chunks[1]),
        Pane::Query => render_query(frame, app, chunks[1]),
        Pane::Tags => render_tags(frame, app, chunks[1]),
    }

    let mut footer_lines = vec![Line::from(format!("Status: {}", app.status_line()))];
    footer_lines.extend(
        app.activity()
            .iter()
            .rev()
            .take(usize::from(ACTIVITY_LINES))
            .map(|line| Line::from(format!("  {line}"))),
    );
    let footer = Paragraph::new(footer_lines)
        .block(Block::default().borders(Borders::ALL).title("Log"));
    frame.render_widget(footer, chunks[2]);

    if app.show_help() {
        render_help_popup(frame);
    }
}

fn status_style(status: ConnectionStatus) -> Style {
    let color = match status {
        ConnectionStatus::Disconnected => Color::Gray,
        ConnectionStatus::Connecting => Color::Yellow,
        ConnectionStatus::Connected => Color::Green,
        ConnectionStatus::Error => Color::Red,
    };
    Style::default().fg(color)
}

fn render_connection<S: TagStore>(frame: &mut Frame<'_>, app: &ConnectorApp<S>, area: Rect) {
    let session = app.session();
    let dialects = app
        .dialect_markers()
        .into_iter()
        .map(|(dialect, selected)| {
            if selected {
                Span::styled(
                    format!("[x] {}  ", dialect.label()),
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                )
            } else {
                Span::raw(format!("[ ] {}  ", dialect.label()))
            }
        })
        .collect::<Vec<_>>();

    let mut lines = vec![Line::from(dialects), Line::from("")];
    for field in app.credential_fields() {
        let marker = if app.active_field() == Some(*field) {
            ">"
        } else {
            " "
        };
        let value = session.credential(*field);
        let shown = if field.is_secret() {
            "*".repeat(value.chars().count())
        } else {
            value.to_string()
        };
        lines.push(Line::from(format!("{marker} {:<9} {shown}", field.label())));
    }
    lines.push(Line::from(""));
    let button = match session.status {
        ConnectionStatus::Connecting => "[ Connecting... ]",
        ConnectionStatus::Connected => "[ Connected ]  Ctrl+D to disconnect",
        ConnectionStatus::Disconnected | ConnectionStatus::Error => "[ Enter: Connect ]",
    };
    lines.push(Line::from(button));
    if let Some(message) = &session.error_message {
        lines.push(Line::from(Span::styled(
            message.clone(),
            Style::default().fg(Color::Red),
        )));
    }

    let body = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Connection"))
        .alignment(Alignment::Left);
    frame.render_widget(body, area);
}

fn render_schema<S: TagStore>(frame: &mut Frame<'_>, app: &ConnectorApp<S>, area: Rect) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(20),
            Constraint::Percentage(20),
            Constraint::Percentage(60),
        ])
        .split(area);

    let databases = list_lines(
        app.databases().iter().map(String::as_str),
        app.database_cursor(),
        app.schema_focus() == SchemaFocus::Databases,
    );
    frame.render_widget(
        Paragraph::new(databases).block(Block::default().borders(Borders::ALL).title("Databases")),
        columns[0],
    );

    let table_names = app
        .tables()
        .map(|metadata| metadata.table_names())
        .unwrap_or_default();
    let tables = list_lines(
        table_names.into_iter(),
        app.table_cursor(),
        app.schema_focus() == SchemaFocus::Tables,
    );
    frame.render_widget(
        Paragraph::new(tables).block(Block::default().borders(Borders::ALL).title("Tables")),
        columns[1],
    );

    let preview = match app.selected_table() {
        Some(table) => {
            let mut lines = vec![Line::from(Span::styled(
                table.columns.join(" | "),
                Style::default().add_modifier(Modifier::BOLD),
            ))];
            lines.extend(table.rows.iter().map(|row| {
                Line::from(
                    row.values()
                        .map(format_value)
                        .collect::<Vec<_>>()
                        .join(" | "),
                )
            }));
            lines
        }
        None => vec![Line::from("Select a database and press Enter")],
    };
    frame.render_widget(
        Paragraph::new(preview).block(Block::default().borders(Borders::ALL).title("Preview")),
        columns[2],
    );
}

fn list_lines<'a>(
    items: impl Iterator<Item = &'a str>,
    cursor: usize,
    focused: bool,
) -> Vec<Line<'static>> {
    items
        .enumerate()
        .map(|(index, item)| {
            let marker = if index == cursor && focused { ">" } else { " " };
            Line::from(format!("{marker} {item}"))
        })
        .collect()
}

fn render_query<S: TagStore>(frame: &mut Frame<'_>, app: &ConnectorApp<S>, area: Rect) {
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(5), Constraint::Min(3)])
        .split(area);

    let editor = Paragraph::new(format!("{}_", app.query_text()))
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Statement (Enter to run)"));
    frame.render_widget(editor, sections[0]);

    let lines = match app.query_result() {
        None => vec![Line::from("No results")],
        Some(result) => match &result.error {
            Some(message) => vec![Line::from(Span::styled(
                message.clone(),
                Style::default().fg(Color::Red),
            ))],
            None => {
                let mut lines = vec![Line::from(Span::styled(
                    result.columns().join(" | "),
                    Style::default().add_modifier(Modifier::BOLD),
                ))];
                lines.extend(result.rows.iter().map(|row| {
                    Line::from(
                        row.values()
                            .map(format_value)
                            .collect::<Vec<_>>()
                            .join(" | "),
                    )
                }));
                lines
            }
        },
    };
    frame.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Results")),
        sections[1],
    );
}

fn render_tags<S: TagStore>(frame: &mut Frame<'_>, app: &ConnectorApp<S>, area: Rect) {
    let editor = app.tags_editor();
    let mut lines = vec![
        Line::from(format!("New tag: {}_", app.tag_name_input())),
        Line::from(match app.picker_draft() {
            Some(draft) => format!("Picker color: {}  new: {draft}_", editor.picker_color()),
            None => format!("Picker color: {}", editor.picker_color()),
        }),
        Line::from(""),
    ];

    for (index, tag) in app.tag_list().iter().enumerate() {
        let marker = if index == app.tag_cursor() { ">" } else { " " };
        let mut spans = vec![
            Span::raw(format!("{marker} ")),
            Span::styled("■ ", Style::default().fg(tag_color(&tag.color))),
            Span::raw(format!("{} {}", tag.name, tag.color)),
        ];
        if let EditorPhase::EditingColor { tag_id, draft, .. } = editor.phase() {
            if *tag_id == tag.id {
                spans.push(Span::raw(format!("  color: {draft}_")));
            }
        }
        if editor.pending_delete() == Some(tag.id.as_str()) {
            spans.push(Span::styled(
                "  Enter to confirm delete",
                Style::default().fg(Color::Red),
            ));
        }
        lines.push(Line::from(spans));
    }

    if let Some(error) = editor.error() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            error.to_string(),
            Style::default().fg(Color::Red),
        )));
    }

    let body = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Tags (Enter: create, Ctrl+P: new color, Ctrl+E: color, Del: delete)"),
    );
    frame.render_widget(body, area);
}

fn tag_color(hex: &str) -> Color {
    let channel = |range: std::ops::Range<usize>| {
        hex.get(range)
            .and_then(|digits| u8::from_str_radix(digits, 16).ok())
    };
    match (channel(1..3), channel(3..5), channel(5..7)) {
        (Some(red), Some(green), Some(blue)) => Color::Rgb(red, green, blue),
        _ => Color::Reset,
    }
}

/// Cell text for a JSON value; strings are shown without quotes.
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 60, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Global keymap"),
        Line::from("Ctrl+Q / Ctrl+C: quit"),
        Line::from("F1: toggle help"),
        Line::from("Tab: cycle panes"),
        Line::from("Enter: connect, load tables, preview, run query or save tag"),
        Line::from("Ctrl+D: disconnect"),
        Line::from("Left/Right: dialect or schema column"),
        Line::from("Up/Down: field or list cursor"),
        Line::from("Ctrl+P: pick the color for new tags"),
        Line::from("Ctrl+E: edit tag color, Esc: close picker"),
        Line::from("Delete: reveal tag delete"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent) -> Option<Msg> {
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('q' | 'c')) => Some(Msg::Quit),
        (KeyModifiers::CONTROL, KeyCode::Char('d')) => Some(Msg::Disconnect),
        (KeyModifiers::CONTROL, KeyCode::Char('e')) => Some(Msg::EditColor),
        (KeyModifiers::CONTROL, KeyCode::Char('p')) => Some(Msg::PickColor),
        (_, KeyCode::F(1)) => Some(Msg::ToggleHelp),
        (_, KeyCode::Tab) => Some(Msg::NextPane),
        (_, KeyCode::Enter) => Some(Msg::Submit),
        (_, KeyCode::Esc) => Some(Msg::Cancel),
        (_, KeyCode::Delete) => Some(Msg::Delete),
        (_, KeyCode::Backspace) => Some(Msg::Backspace),
        (_, KeyCode::Up) => Some(Msg::Navigate(DirectionKey::Up)),
        (_, KeyCode::Down) => Some(Msg::Navigate(DirectionKey::Down)),
        (_, KeyCode::Left) => Some(Msg::Navigate(DirectionKey::Left)),
        (_, KeyCode::Right) => Some(Msg::Navigate(DirectionKey::Right)),
        (KeyModifiers::NONE | KeyModifiers::SHIFT, KeyCode::Char(ch)) => Some(Msg::Input(ch)),
        _ => None,
    }
}
