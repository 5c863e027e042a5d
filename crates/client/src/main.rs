mod menu;
mod net;
mod replication;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use net::pipeline::ClientFlags;
use net::{LobbyClient, MessagePipeline, Receiver, WelcomeLoop};
use replication::ClientReplication;
use riptide::net::protocol::DEFAULT_LOBBY_PORT;
use riptide::{
    CreateRoom, InputButtons, InputFrame, IpEndpoint, Message, RoomDifficulty, RoomState,
    RoomType, RoomVisibility, UdpTransport,
};

#[derive(Parser)]
#[command(name = "riptide-client")]
#[command(about = "riptide game client (network core)")]
struct Args {
    #[arg(short, long)]
    verbose: bool,

    /// Connect straight to 127.0.0.1:50010 instead of showing the menu.
    #[arg(short, long)]
    default: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let lobby = if args.default {
        Some(IpEndpoint::localhost(DEFAULT_LOBBY_PORT))
    } else {
        match menu::run_menu(&format!("127.0.0.1:{DEFAULT_LOBBY_PORT}")) {
            Ok(choice) => choice,
            Err(e) => {
                eprintln!("menu failed: {e}");
                return ExitCode::FAILURE;
            }
        }
    };

    let Some(lobby) = lobby else {
        return ExitCode::SUCCESS;
    };

    match run(lobby) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("fatal: {err:#}");
            eprintln!("fatal: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(lobby_addr: IpEndpoint) -> Result<()> {
    let mut lobby = LobbyClient::connect(lobby_addr)?;

    // Guest identity; the hash is whatever the (out-of-scope) hasher makes
    // of the password, so a fixed token serves here.
    let username = format!("pilot-{}", std::process::id());
    let password_hash = "guest";
    if lobby.register(&username, password_hash).is_err() {
        log::debug!("{username} already registered");
    }
    lobby
        .login(&username, password_hash)
        .context("lobby login")?;
    log::info!("logged in as {username}");

    let rooms = lobby.list_rooms().context("listing rooms")?;
    let open = rooms
        .iter()
        .find(|room| room.state == RoomState::Waiting && room.players < room.capacity);

    // Prefer an open room; a refusal (passworded, filled meanwhile) falls
    // back to hosting our own.
    let joined = match open {
        Some(room) => {
            log::info!("joining room {} ({})", room.room_id, room.name);
            lobby.join_room(room.room_id, "").ok()
        }
        None => None,
    };
    let (room_id, port) = match joined {
        Some(assignment) => assignment,
        None => {
            log::info!("no open room; creating one");
            let (room_id, _) = lobby.create_room(CreateRoom {
                name: format!("{username}'s run"),
                capacity: 4,
                visibility: RoomVisibility::Public,
                room_type: RoomType::Quickplay,
                difficulty: RoomDifficulty::Normal,
                password_hash: String::new(),
            })?;
            lobby.join_room(room_id, "")?
        }
    };

    log::info!("room {room_id} assigned game port {port}");
    let mut server = lobby_addr;
    server.port = port;
    game_session(server)
}

fn game_session(server: IpEndpoint) -> Result<()> {
    let transport = UdpTransport::open(IpEndpoint::new([0, 0, 0, 0], 0))?;
    let running = Arc::new(AtomicBool::new(true));
    let flags = Arc::new(ClientFlags::default());

    let mut receiver = Receiver::spawn(transport.try_clone()?, Arc::clone(&running))?;
    let mut welcome = WelcomeLoop::spawn(
        transport.try_clone()?,
        server,
        Arc::clone(&flags),
        Arc::clone(&running),
    )?;

    let mut pipeline = MessagePipeline::new(Arc::clone(&receiver.raw), Arc::clone(&flags));
    let mut replication = ClientReplication::default();

    log::info!("connecting to game instance at {server}");

    let frame_duration = Duration::from_secs_f64(1.0 / 60.0);
    let mut next_frame = Instant::now() + frame_duration;
    let mut last_frame = Instant::now();
    let mut input_seq: u16 = 0;
    let mut last_status = Instant::now();

    let outcome = loop {
        pipeline.pump();

        if flags.join_denied.load(Ordering::SeqCst) {
            break Err(anyhow::anyhow!("server denied the join request"));
        }
        if flags.disconnected.load(Ordering::SeqCst) {
            for notice in pipeline.drain_notices() {
                log::info!("{notice}");
            }
            break Ok(());
        }

        if let Some(init) = pipeline.next_level_init() {
            log::info!(
                "level {} starting (scroll {} u/s)",
                init.level_id,
                init.scroll_speed
            );
        }
        for event in pipeline.drain_level_events() {
            log::debug!("level event: {event:?}");
        }
        for spawn in pipeline.drain_spawns() {
            replication.apply_spawn(&spawn);
        }
        for destroyed in pipeline.drain_destroys() {
            replication.apply_destroy(destroyed);
        }
        while let Some(snapshot) = pipeline.next_snapshot() {
            replication.apply_snapshot(&snapshot.entities);
        }
        for notice in pipeline.drain_notices() {
            log::info!("{notice}");
        }

        let dt = last_frame.elapsed().as_secs_f32();
        last_frame = Instant::now();
        replication.advance(dt);

        if flags.handshake_done() {
            // Renderer and input devices live outside the core; a neutral
            // input frame keeps the session alive and the echo observable.
            input_seq = input_seq.wrapping_add(1);
            let input = Message::ClientInput(InputFrame {
                x: 0.0,
                y: 0.0,
                angle: 0.0,
                buttons: InputButtons::empty(),
            });
            let _ = transport.send_to(&input.encode(input_seq, 0), server);
        }

        if let Some(victory) = pipeline.game_ended() {
            log::info!(
                "game over: {}",
                if victory { "level complete" } else { "defeat" }
            );
            break Ok(());
        }

        if last_status.elapsed() >= Duration::from_secs(1) {
            last_status = Instant::now();
            log::debug!(
                "entities={} acked_input={} malformed={}",
                replication.entity_count(),
                pipeline.last_input_ack(),
                pipeline.malformed()
            );
        }

        let now = Instant::now();
        if next_frame > now {
            thread::sleep(next_frame - now);
        } else {
            next_frame = now;
        }
        next_frame += frame_duration;
    };

    let _ = transport.send_to(&Message::ClientDisconnect.encode(input_seq, 0), server);
    welcome.stop();
    receiver.stop();
    outcome
}
