use std::io;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame, Terminal,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use chat_relay::protocol::{ChatMessage, ClientFrame, Destination, MessageKind, ServerFrame};

// ─── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "client", about = "Chat relay TUI client")]
struct Args {
    #[arg(long, default_value = "localhost:8080")]
    addr: String,

    /// Pre-fill the username field
    #[arg(long)]
    username: Option<String>,

    /// Wait this long before reconnecting after the link drops
    #[arg(long, default_value_t = 5000)]
    reconnect_delay_ms: u64,
}

// ─── Screens ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Screen {
    Login,
    Chat,
}

// ─── Simple one-line text input ───────────────────────────────────────────────

#[derive(Default, Clone)]
struct Input {
    value: String,
    cursor: usize,
}

impl Input {
    fn with_value(value: String) -> Self {
        let cursor = value.len();
        Self { value, cursor }
    }

    fn insert(&mut self, ch: char) {
        self.value.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    fn delete_back(&mut self) {
        if self.cursor == 0 {
            return;
        }
        let mut prev = self.cursor - 1;
        while prev > 0 && !self.value.is_char_boundary(prev) {
            prev -= 1;
        }
        self.value.drain(prev..self.cursor);
        self.cursor = prev;
    }

    fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.value)
    }

    /// Cursor position in terminal columns.
    fn column(&self) -> u16 {
        self.value[..self.cursor].chars().count() as u16
    }
}

// ─── App state ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum LineKind {
    Chat,
    Notice,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
struct ChatLine {
    sender: String,
    content: String,
    timestamp: String,
    kind: LineKind,
}

impl ChatLine {
    fn notice(content: impl Into<String>) -> Self {
        Self {
            sender: String::new(),
            content: content.into(),
            timestamp: String::new(),
            kind: LineKind::Notice,
        }
    }

    fn error(content: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Error,
            ..Self::notice(content)
        }
    }

    fn from_frame(frame: ServerFrame) -> Self {
        match frame {
            ServerFrame::Message { payload, .. } => match payload.kind {
                MessageKind::Chat => Self {
                    sender: payload.sender,
                    content: payload.content.unwrap_or_default(),
                    timestamp: Local::now().format("%H:%M:%S").to_string(),
                    kind: LineKind::Chat,
                },
                MessageKind::Join => Self::notice(format!("{} joined", payload.sender)),
                MessageKind::Leave => Self::notice(format!("{} left", payload.sender)),
            },
            ServerFrame::Error { message } => Self::error(message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LinkState {
    Connecting,
    Connected,
    Reconnecting,
}

struct App {
    screen: Screen,
    username: Input,
    login_error: String,

    messages: Vec<ChatLine>,
    chat_input: Input,
    link: LinkState,
    scroll: usize, // how many lines from the bottom we are scrolled
    viewport_height: u16,

    out_tx: Option<mpsc::Sender<Vec<u8>>>,
    quit: bool,
}

impl App {
    fn new(username: Option<String>) -> Self {
        Self {
            screen: Screen::Login,
            username: Input::with_value(username.unwrap_or_default()),
            login_error: String::new(),

            messages: Vec::new(),
            chat_input: Input::default(),
            link: LinkState::Connecting,
            scroll: 0,
            viewport_height: 20,

            out_tx: None,
            quit: false,
        }
    }

    fn push_line(&mut self, line: ChatLine) {
        self.messages.push(line);
        // keep the view anchored when scrolled back
        if self.scroll > 0 {
            self.scroll += 1;
        }
    }

    fn scroll_up(&mut self) {
        let max = self.messages.len().saturating_sub(self.viewport_height as usize);
        self.scroll = (self.scroll + 3).min(max);
    }

    fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(3);
    }
}

// ─── Network link (reconnects on its own) ────────────────────────────────────

enum NetMsg {
    Frame(ServerFrame),
    Connected,
    Disconnected(String),
}

struct Link {
    addr: String,
    username: String,
    reconnect_delay: Duration,
    net_tx: mpsc::Sender<NetMsg>,
}

impl Link {
    /// Keeps a connection up until the UI drops its sender.
    async fn run(self, mut out_rx: mpsc::Receiver<Vec<u8>>) {
        loop {
            let reason = match self.session(&mut out_rx).await {
                Ok(true) => return,
                Ok(false) => "connection lost".to_string(),
                Err(e) => e.to_string(),
            };
            if self.net_tx.send(NetMsg::Disconnected(reason)).await.is_err() {
                return;
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    /// One connection's lifetime. Ok(true) means the UI is gone.
    async fn session(&self, out_rx: &mut mpsc::Receiver<Vec<u8>>) -> Result<bool> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (reader, mut writer) = stream.into_split();

        let join = ClientFrame::new(Destination::AddUser, &ChatMessage::join(&self.username))?;
        writer.write_all(&join.encode_line()?).await?;
        self.net_tx.send(NetMsg::Connected).await.ok();

        let mut lines = BufReader::new(reader).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if let Ok(frame) = serde_json::from_str::<ServerFrame>(&line) {
                            if self.net_tx.send(NetMsg::Frame(frame)).await.is_err() {
                                return Ok(true);
                            }
                        }
                    }
                    None => return Ok(false),
                },
                out = out_rx.recv() => match out {
                    Some(data) => writer.write_all(&data).await?,
                    None => return Ok(true),
                },
            }
        }
    }
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Channel: link → UI
    let (net_tx, mut net_rx) = mpsc::channel::<NetMsg>(128);

    // Set up terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(args.username.clone());
    let result = run_app(&mut terminal, &mut app, &args, net_tx, &mut net_rx).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    args: &Args,
    net_tx: mpsc::Sender<NetMsg>,
    net_rx: &mut mpsc::Receiver<NetMsg>,
) -> Result<()> {
    loop {
        // Draw
        let size = terminal.size()?;
        app.viewport_height = size.height.saturating_sub(5);
        terminal.draw(|f| draw(f, app))?;

        // Poll keyboard (non-blocking, 20ms)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(key) = event::read()? {
                handle_key(app, key, args, &net_tx)?;
            }
        }

        // Drain all pending network messages
        while let Ok(msg) = net_rx.try_recv() {
            handle_net(app, msg, args.reconnect_delay_ms);
        }

        if app.quit {
            break;
        }
    }
    Ok(())
}

// ─── Key handling ─────────────────────────────────────────────────────────────

fn handle_key(app: &mut App, key: KeyEvent, args: &Args, net_tx: &mpsc::Sender<NetMsg>) -> Result<()> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    if ctrl && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('q')) {
        app.quit = true;
        return Ok(());
    }
    match app.screen {
        Screen::Login => handle_login_key(app, key, args, net_tx),
        Screen::Chat => handle_chat_key(app, key),
    }
}

fn handle_login_key(app: &mut App, key: KeyEvent, args: &Args, net_tx: &mpsc::Sender<NetMsg>) -> Result<()> {
    match key.code {
        KeyCode::Enter => {
            let username = app.username.value.trim().to_string();
            if username.is_empty() {
                app.login_error = "Username is required".into();
                return Ok(());
            }
            let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(64);
            let link = Link {
                addr: args.addr.clone(),
                username: username.clone(),
                reconnect_delay: Duration::from_millis(args.reconnect_delay_ms),
                net_tx: net_tx.clone(),
            };
            tokio::spawn(link.run(out_rx));

            app.username = Input::with_value(username);
            app.out_tx = Some(out_tx);
            app.login_error.clear();
            app.screen = Screen::Chat;
            app.push_line(ChatLine::notice(format!("Connecting to {} ...", args.addr)));
        }
        KeyCode::Backspace => app.username.delete_back(),
        KeyCode::Char(c) => app.username.insert(c),
        _ => {}
    }
    Ok(())
}

fn handle_chat_key(app: &mut App, key: KeyEvent) -> Result<()> {
    match key.code {
        KeyCode::PageUp => app.scroll_up(),
        KeyCode::PageDown => app.scroll_down(),
        KeyCode::Enter => {
            let content = app.chat_input.value.trim().to_string();
            if content.is_empty() {
                return Ok(());
            }
            if app.link != LinkState::Connected {
                app.push_line(ChatLine::error("Not connected, message not sent"));
                return Ok(());
            }
            app.chat_input.take();
            let msg = ChatMessage::chat(app.username.value.clone(), content);
            let data = ClientFrame::new(Destination::SendMessage, &msg)?.encode_line()?;
            if let Some(tx) = &app.out_tx {
                if tx.try_send(data).is_err() {
                    app.push_line(ChatLine::error("Outgoing queue full, message dropped"));
                }
            }
        }
        KeyCode::Backspace => app.chat_input.delete_back(),
        KeyCode::Char(c) => app.chat_input.insert(c),
        _ => {}
    }
    Ok(())
}

// ─── Network message handling ─────────────────────────────────────────────────

fn handle_net(app: &mut App, msg: NetMsg, reconnect_delay_ms: u64) {
    match msg {
        NetMsg::Connected => {
            app.link = LinkState::Connected;
            app.push_line(ChatLine::notice(format!("Connected as {}", app.username.value)));
        }
        NetMsg::Disconnected(reason) => {
            app.link = LinkState::Reconnecting;
            app.push_line(ChatLine::error(format!(
                "Disconnected ({}), retrying in {}s",
                reason,
                reconnect_delay_ms / 1000
            )));
        }
        NetMsg::Frame(frame) => app.push_line(ChatLine::from_frame(frame)),
    }
}

// ─── Drawing ─────────────────────────────────────────────────────────────────

const AVATAR_COLORS: [Color; 8] = [
    Color::Rgb(0x21, 0x96, 0xF3),
    Color::Rgb(0x32, 0xc7, 0x87),
    Color::Rgb(0x00, 0xBC, 0xD4),
    Color::Rgb(0xff, 0x56, 0x52),
    Color::Rgb(0xff, 0xc1, 0x07),
    Color::Rgb(0xff, 0x85, 0xaf),
    Color::Rgb(0xFF, 0x98, 0x00),
    Color::Rgb(0x39, 0xbb, 0xb0),
];

/// Stable colour for a sender: the same name always gets the same colour.
///
/// The hash runs over UTF-16 code units in `f64`, so it matches the palette
/// the web client picks, including for names long enough to lose precision.
fn avatar_color(sender: &str) -> Color {
    let hash = sender
        .encode_utf16()
        .fold(0f64, |h, unit| 31.0 * h + f64::from(unit));
    // Absurdly long names overflow to infinity; NaN casts to index 0.
    AVATAR_COLORS[(hash % AVATAR_COLORS.len() as f64).abs() as usize]
}

fn draw(f: &mut Frame, app: &App) {
    match app.screen {
        Screen::Login => draw_login(f, app),
        Screen::Chat => draw_chat(f, app),
    }
}

fn draw_login(f: &mut Frame, app: &App) {
    let area = f.area();

    let block = Block::default()
        .title(" Chat Relay ")
        .title_alignment(Alignment::Center)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // title
            Constraint::Length(3), // username
            Constraint::Length(1), // hint
            Constraint::Length(1), // error
            Constraint::Min(0),
        ])
        .split(inner);

    let title = Paragraph::new("── Join the chat ──")
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));
    f.render_widget(title, chunks[0]);

    let username_widget = Paragraph::new(app.username.value.as_str())
        .block(
            Block::default()
                .title(" Username ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow)),
        )
        .style(Style::default().fg(Color::White));
    f.render_widget(username_widget, chunks[1]);

    let hint_widget = Paragraph::new("Enter to join | Ctrl+Q to quit")
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::DarkGray));
    f.render_widget(hint_widget, chunks[2]);

    if !app.login_error.is_empty() {
        let err = Paragraph::new(app.login_error.as_str())
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::Red));
        f.render_widget(err, chunks[3]);
    }

    f.set_cursor_position((chunks[1].x + 1 + app.username.column(), chunks[1].y + 1));
}

fn draw_chat(f: &mut Frame, app: &App) {
    let area = f.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // header
            Constraint::Min(3),    // messages
            Constraint::Length(3), // input
        ])
        .split(area);

    // Header
    let (status, status_color) = match app.link {
        LinkState::Connecting => ("connecting…", Color::Yellow),
        LinkState::Connected => ("connected", Color::Green),
        LinkState::Reconnecting => ("reconnecting…", Color::Red),
    };
    let header = Line::from(vec![
        Span::raw(format!(" Chat Relay  │  {}  │  ", app.username.value)),
        Span::styled(status, Style::default().fg(status_color)),
        Span::raw("  │  PgUp/PgDn scroll  │  Ctrl+Q quit "),
    ]);
    let header = Paragraph::new(header).style(
        Style::default()
            .bg(Color::DarkGray)
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    );
    f.render_widget(header, chunks[0]);

    // Messages viewport
    let msg_block = Block::default()
        .borders(Borders::LEFT | Borders::RIGHT | Borders::TOP)
        .border_style(Style::default().fg(Color::DarkGray));
    let msg_inner = msg_block.inner(chunks[1]);
    f.render_widget(msg_block, chunks[1]);

    let height = msg_inner.height as usize;
    let total = app.messages.len();
    let end = total.saturating_sub(app.scroll);
    let start = end.saturating_sub(height);
    let visible = &app.messages[start..end];

    let items: Vec<ListItem> = visible.iter().map(render_line).collect();
    f.render_widget(List::new(items), msg_inner);

    // Input box
    let input_block = Block::default()
        .title(" Message (Enter to send) ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    let input_inner = input_block.inner(chunks[2]);
    f.render_widget(input_block, chunks[2]);

    let input_widget =
        Paragraph::new(app.chat_input.value.as_str()).style(Style::default().fg(Color::White));
    f.render_widget(input_widget, input_inner);

    f.set_cursor_position((input_inner.x + app.chat_input.column(), input_inner.y));
}

fn render_line(line: &ChatLine) -> ListItem<'static> {
    match line.kind {
        LineKind::Notice => ListItem::new(Line::from(Span::styled(
            format!("  ◆ {}", line.content),
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        ))),
        LineKind::Error => ListItem::new(Line::from(Span::styled(
            format!("  ! {}", line.content),
            Style::default().fg(Color::Red),
        ))),
        LineKind::Chat => ListItem::new(Line::from(vec![
            Span::styled(
                format!("[{}] ", line.timestamp),
                Style::default().fg(Color::DarkGray),
            ),
            Span::styled(
                format!("{}: ", line.sender),
                Style::default()
                    .fg(avatar_color(&line.sender))
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(line.content.clone()),
        ])),
    }
}
