mod auth;
mod config;
mod events;
mod instance;
mod lobby;
mod manager;
mod tui;
mod workers;

use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use auth::JsonAuthService;
use config::ServerConfig;
use events::ServerEvent;
use lobby::LobbyServer;
use manager::InstanceManager;
use riptide::net::protocol::DEFAULT_LOBBY_PORT;
use tui::TuiState;

const LOG_CONFIG_FILE: &str = "server.log.config";

#[derive(Parser)]
#[command(name = "riptide-server")]
#[command(about = "riptide lobby and game-instance server")]
struct Args {
    #[arg(short, long)]
    verbose: bool,

    /// Show the network overlay (TUI).
    #[arg(short, long)]
    network: bool,

    /// Show the admin overlay (TUI with broadcast controls).
    #[arg(short, long)]
    admin: bool,

    #[arg(long, default_value_t = DEFAULT_LOBBY_PORT)]
    lobby_port: u16,

    #[arg(long, default_value_t = DEFAULT_LOBBY_PORT)]
    base_port: u16,

    #[arg(long, default_value_t = 16)]
    max_instances: u32,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("fatal: {err:#}");
            eprintln!("fatal: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Default filter comes from `server.log.config` when present (one
/// env_logger filter spec per file), raised to `debug` by `--verbose`.
fn init_logging(args: &Args) {
    let file_filter = std::fs::read_to_string(LOG_CONFIG_FILE)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let default = if args.verbose { "debug" } else { "info" };
    let filter = file_filter.unwrap_or_else(|| default.to_string());

    let interactive = args.network || args.admin;
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter));
    if interactive {
        // The alternate screen owns stdout; keep the log stream off it.
        builder.target(env_logger::Target::Stderr);
    }
    builder.init();
}

fn run(args: Args) -> Result<()> {
    let config = ServerConfig {
        lobby_port: args.lobby_port,
        game_base_port: args.base_port,
        max_instances: args.max_instances,
        ..Default::default()
    };

    let running = Arc::new(AtomicBool::new(true));
    let auth = Arc::new(JsonAuthService::open(&config.accounts_path)?);
    let manager = Arc::new(InstanceManager::new(config.clone(), Arc::clone(&running)));
    let mut lobby = LobbyServer::start(
        config,
        auth,
        manager,
        Arc::clone(&running),
    )?;

    log::info!("riptide server up on lobby port {}", lobby.port());

    let result = if args.network || args.admin {
        run_with_tui(&lobby, &running, args.admin)
    } else {
        run_headless(&lobby, &running);
        Ok(())
    };

    lobby.stop();
    result.map_err(Into::into)
}

fn run_headless(lobby: &LobbyServer, running: &Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        for event in lobby.drain_events() {
            log_event(&event);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::RoomCreated { room_id, port } => {
            log::info!("room {room_id} created on port {port}");
        }
        ServerEvent::RoomDestroyed { room_id } => log::info!("room {room_id} destroyed"),
        ServerEvent::ClientJoined { room_id, endpoint } => {
            log::info!("{endpoint} joined room {room_id}");
        }
        ServerEvent::AuthFailure { endpoint } => {
            log::warn!("auth failure from {endpoint}");
        }
    }
}

fn run_with_tui(
    lobby: &LobbyServer,
    running: &Arc<AtomicBool>,
    admin: bool,
) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut state = TuiState::new(admin);
    state.log(format!("server up on lobby port {}", lobby.port()));

    while running.load(Ordering::SeqCst) {
        for event in lobby.drain_events() {
            log_event(&event);
            state.log(describe_event(&event));
        }

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if state.composing {
                        match key.code {
                            KeyCode::Esc => {
                                state.composing = false;
                                state.broadcast_input.clear();
                            }
                            KeyCode::Enter => {
                                if !state.broadcast_input.is_empty() {
                                    lobby.broadcast(&state.broadcast_input);
                                    state.log(format!("broadcast: {}", state.broadcast_input));
                                }
                                state.composing = false;
                                state.broadcast_input.clear();
                            }
                            KeyCode::Backspace => {
                                state.broadcast_input.pop();
                            }
                            KeyCode::Char(c) => state.broadcast_input.push(c),
                            _ => {}
                        }
                    } else {
                        match key.code {
                            KeyCode::Char('q') | KeyCode::Esc => {
                                running.store(false, Ordering::SeqCst);
                            }
                            KeyCode::Tab => state.next_tab(),
                            KeyCode::Char('b') if state.admin() => state.composing = true,
                            _ => {}
                        }
                    }
                }
            }
        }

        let stats = lobby.stats();
        let rooms = lobby.room_infos();
        terminal.draw(|frame| tui::render(frame, &state, &stats, &rooms))?;
    }

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;
    Ok(())
}

fn describe_event(event: &ServerEvent) -> String {
    match event {
        ServerEvent::RoomCreated { room_id, port } => {
            format!("room {room_id} created on port {port}")
        }
        ServerEvent::RoomDestroyed { room_id } => format!("room {room_id} destroyed"),
        ServerEvent::ClientJoined { room_id, endpoint } => {
            format!("{endpoint} joined room {room_id}")
        }
        ServerEvent::AuthFailure { endpoint } => format!("auth failure from {endpoint}"),
    }
}
