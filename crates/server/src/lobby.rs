//! The control-plane singleton on the lobby port: room catalog, admission,
//! auth gate and operator broadcast. One receive thread handles every lobby
//! RPC; a cleanup thread reconciles the catalog with the live instances.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use riptide::net::protocol::MAX_UDP_PAYLOAD;
use riptide::{
    CreateRoom, IpEndpoint, Message, NetworkStats, PacketDirection, Room, RoomCatalog, RoomState,
    TransportError, UdpTransport, WorkQueue,
};

use crate::auth::{AuthError, AuthService};
use crate::config::ServerConfig;
use crate::events::ServerEvent;
use crate::manager::InstanceManager;

const IDLE_SLEEP: Duration = Duration::from_millis(1);
/// Lobby sessions silent past this are forgotten.
const LOBBY_SESSION_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct LobbySession {
    endpoint: IpEndpoint,
    authenticated: bool,
    username: Option<String>,
    room_id: Option<u32>,
    last_seen: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct LobbyStats {
    pub rooms: usize,
    pub clients: usize,
    pub network: NetworkStats,
}

pub struct LobbyServer {
    shared: Arc<LobbyShared>,
    receive: Option<JoinHandle<()>>,
    cleanup: Option<JoinHandle<()>>,
}

struct LobbyShared {
    config: ServerConfig,
    transport: UdpTransport,
    auth: Arc<dyn AuthService>,
    manager: Arc<InstanceManager>,
    sessions: Mutex<HashMap<String, LobbySession>>,
    catalog: Mutex<RoomCatalog>,
    stats: Mutex<NetworkStats>,
    events: WorkQueue<ServerEvent>,
    running: Arc<AtomicBool>,
}

impl LobbyServer {
    pub fn start(
        config: ServerConfig,
        auth: Arc<dyn AuthService>,
        manager: Arc<InstanceManager>,
        running: Arc<AtomicBool>,
    ) -> Result<Self, TransportError> {
        let transport = UdpTransport::open(IpEndpoint::new([0, 0, 0, 0], config.lobby_port))?;
        log::info!(
            "[Lobby] listening on {}",
            transport.local_endpoint()
        );

        let shared = Arc::new(LobbyShared {
            config,
            transport,
            auth,
            manager,
            sessions: Mutex::new(HashMap::new()),
            catalog: Mutex::new(RoomCatalog::new()),
            stats: Mutex::new(NetworkStats::default()),
            events: WorkQueue::new(256),
            running,
        });

        let recv_shared = Arc::clone(&shared);
        let receive = thread::Builder::new()
            .name("lobby-recv".into())
            .spawn(move || recv_shared.receive_loop())
            .map_err(TransportError::Other)?;

        let cleanup_shared = Arc::clone(&shared);
        let cleanup = thread::Builder::new()
            .name("lobby-cleanup".into())
            .spawn(move || cleanup_shared.cleanup_loop())
            .map_err(TransportError::Other)?;

        Ok(Self {
            shared,
            receive: Some(receive),
            cleanup: Some(cleanup),
        })
    }

    pub fn port(&self) -> u16 {
        self.shared.transport.local_endpoint().port
    }

    pub fn drain_events(&self) -> Vec<ServerEvent> {
        self.shared.events.drain()
    }

    pub fn room_infos(&self) -> Vec<riptide::RoomInfo> {
        self.shared
            .catalog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .list_all()
    }

    pub fn stats(&self) -> LobbyStats {
        let network = *self
            .shared
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let clients: usize = self
            .shared
            .manager
            .statuses()
            .iter()
            .map(|&(_, _, players, _)| players)
            .sum();
        LobbyStats {
            rooms: self.shared.manager.count(),
            clients,
            network,
        }
    }

    /// Operator broadcast: every lobby session and every room hears it.
    pub fn broadcast(&self, message: &str) {
        log::info!("[Lobby] broadcast: {message}");
        let bytes = Message::ServerBroadcast {
            message: message.to_string(),
        }
        .encode(0, 0);
        let sessions = self
            .shared
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for session in sessions.values() {
            self.shared.send(&bytes, session.endpoint);
        }
        drop(sessions);
        self.shared.manager.broadcast(message);
    }

    pub fn stop(&mut self) {
        log::info!("[Lobby] stopping");
        let bytes = Message::ServerDisconnect {
            reason: "server shutting down".into(),
        }
        .encode(0, 0);
        {
            let sessions = self
                .shared
                .sessions
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for session in sessions.values() {
                self.shared.send(&bytes, session.endpoint);
            }
        }
        self.shared.manager.shutdown_all("server shutting down");
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.receive.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.cleanup.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LobbyServer {
    fn drop(&mut self) {
        if self.receive.is_some() {
            self.stop();
        }
    }
}

impl LobbyShared {
    fn send(&self, bytes: &[u8], to: IpEndpoint) {
        match self.transport.send_to(bytes, to) {
            Ok(sent) => {
                let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
                stats.record_send(sent);
            }
            Err(e) if e.is_transient() => {}
            Err(e) => log::warn!("[Lobby] send to {to} failed: {e}"),
        }
    }

    fn reply(&self, message: Message, sequence_id: u16, to: IpEndpoint) {
        self.send(&message.encode(sequence_id, 0), to);
    }

    fn receive_loop(&self) {
        let mut buf = [0u8; MAX_UDP_PAYLOAD];
        while self.running.load(Ordering::SeqCst) {
            match self.transport.recv_from(&mut buf) {
                Ok((size, from)) => {
                    match Message::decode(&buf[..size], PacketDirection::ClientToServer) {
                        Ok((header, message)) => {
                            {
                                let mut stats =
                                    self.stats.lock().unwrap_or_else(|e| e.into_inner());
                                stats.record_receive(size);
                            }
                            self.touch_session(from);
                            self.dispatch(message, header.sequence_id, from);
                        }
                        Err(err) => {
                            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
                            stats.record_malformed();
                            log::debug!("[Lobby] malformed packet from {from}: {err}");
                        }
                    }
                }
                Err(e) if e.is_transient() => thread::sleep(IDLE_SLEEP),
                Err(e) => {
                    log::error!("[Lobby] receive failed: {e}");
                    thread::sleep(IDLE_SLEEP);
                }
            }
        }
        log::info!("[Lobby] receive thread stopped");
    }

    fn cleanup_loop(&self) {
        let slice = Duration::from_millis(50);
        while self.running.load(Ordering::SeqCst) {
            // Sleep in slices so shutdown never waits a full interval.
            let wake = Instant::now() + self.config.cleanup_interval;
            while Instant::now() < wake && self.running.load(Ordering::SeqCst) {
                thread::sleep(slice.min(wake - Instant::now()));
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            for room_id in self.manager.cleanup_empty() {
                self.events.push(ServerEvent::RoomDestroyed { room_id });
            }

            let statuses = self.manager.statuses();
            let alive: Vec<u32> = statuses.iter().map(|&(id, ..)| id).collect();
            let mut catalog = self.catalog.lock().unwrap_or_else(|e| e.into_inner());
            for removed in catalog.retain_existing(&alive) {
                log::info!("[Lobby] removed orphaned room {removed} from catalog");
            }
            for (room_id, _, players, started) in statuses {
                catalog.update_players(room_id, players.min(u8::MAX as usize) as u8);
                catalog.update_state(
                    room_id,
                    if started {
                        RoomState::Playing
                    } else {
                        RoomState::Waiting
                    },
                );
            }
            drop(catalog);

            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.retain(|_, session| session.last_seen.elapsed() < LOBBY_SESSION_TTL);
        }
        log::info!("[Lobby] cleanup thread stopped");
    }

    fn touch_session(&self, endpoint: IpEndpoint) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(endpoint.key())
            .or_insert_with(|| LobbySession {
                endpoint,
                authenticated: false,
                username: None,
                room_id: None,
                last_seen: Instant::now(),
            })
            .last_seen = Instant::now();
    }

    fn is_authenticated(&self, endpoint: IpEndpoint) -> bool {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(&endpoint.key())
            .is_some_and(|session| session.authenticated)
    }

    fn username_of(&self, endpoint: IpEndpoint) -> Option<String> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(&endpoint.key())
            .and_then(|session| session.username.clone())
    }

    fn dispatch(&self, message: Message, sequence_id: u16, from: IpEndpoint) {
        match message {
            Message::ListRooms => self.handle_list_rooms(sequence_id, from),
            Message::LoginRequest {
                username,
                password_hash,
            } => self.handle_login(username, password_hash, sequence_id, from),
            Message::RegisterRequest {
                username,
                password_hash,
            } => self.handle_register(username, password_hash, sequence_id, from),
            Message::ChangePasswordRequest { old_hash, new_hash } => {
                self.handle_change_password(old_hash, new_hash, sequence_id, from);
            }
            Message::GetStatsRequest => self.handle_get_stats(sequence_id, from),
            Message::CreateRoom(request) => self.handle_create_room(request, sequence_id, from),
            Message::JoinRoom {
                room_id,
                password_hash,
            } => self.handle_join_room(room_id, &password_hash, sequence_id, from),
            Message::LeaveRoom { room_id } => self.handle_leave_room(room_id, from),
            Message::KickPlayer { room_id, player_id } => {
                self.handle_kick(room_id, player_id, sequence_id, from);
            }
            Message::ForceStart { room_id } => self.handle_force_start(room_id, sequence_id, from),
            Message::Chat { message } => self.handle_chat(message, from),
            Message::ClientDisconnect => {
                let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
                sessions.remove(&from.key());
            }
            other => {
                log::debug!(
                    "[Lobby] unhandled message {:?} from {from}",
                    other.message_type()
                );
            }
        }
    }

    fn handle_list_rooms(&self, sequence_id: u16, from: IpEndpoint) {
        let rooms = self
            .catalog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .list_public();
        self.reply(Message::RoomList { rooms }, sequence_id, from);
    }

    fn handle_login(
        &self,
        username: String,
        password_hash: String,
        sequence_id: u16,
        from: IpEndpoint,
    ) {
        let result = self.auth.login(&username, &password_hash);
        let (success, message) = match &result {
            Ok(()) => (true, "welcome back".to_string()),
            Err(err) => (false, err.to_string()),
        };
        if success {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(session) = sessions.get_mut(&from.key()) {
                session.authenticated = true;
                session.username = Some(username.clone());
            }
            log::info!("[Lobby] {username} logged in from {from}");
        } else {
            self.events.push(ServerEvent::AuthFailure { endpoint: from });
        }
        self.reply(Message::LoginResponse { success, message }, sequence_id, from);
    }

    fn handle_register(
        &self,
        username: String,
        password_hash: String,
        sequence_id: u16,
        from: IpEndpoint,
    ) {
        let result = self.auth.register(&username, &password_hash);
        let (success, message) = match &result {
            Ok(()) => (true, "account created".to_string()),
            Err(err) => (false, err.to_string()),
        };
        self.reply(
            Message::RegisterResponse { success, message },
            sequence_id,
            from,
        );
    }

    fn handle_change_password(
        &self,
        old_hash: String,
        new_hash: String,
        sequence_id: u16,
        from: IpEndpoint,
    ) {
        let Some(username) = self.require_auth(sequence_id, from) else {
            return;
        };
        let result = self.auth.change_password(&username, &old_hash, &new_hash);
        let (success, message) = match &result {
            Ok(()) => (true, "password changed".to_string()),
            Err(err) => (false, err.to_string()),
        };
        self.reply(
            Message::ChangePasswordResponse { success, message },
            sequence_id,
            from,
        );
    }

    fn handle_get_stats(&self, sequence_id: u16, from: IpEndpoint) {
        let Some(username) = self.require_auth(sequence_id, from) else {
            return;
        };
        match self.auth.stats(&username) {
            Ok(stats) => self.reply(
                Message::GetStatsResponse {
                    games_played: stats.games_played,
                    games_won: stats.games_won,
                    high_score: stats.high_score,
                },
                sequence_id,
                from,
            ),
            Err(AuthError::UnknownUser) => {
                self.reply(Message::AuthRequired, sequence_id, from);
            }
            Err(err) => {
                log::error!("[Lobby] stats lookup failed for {username}: {err}");
            }
        }
    }

    fn handle_create_room(&self, request: CreateRoom, sequence_id: u16, from: IpEndpoint) {
        if self.require_auth(sequence_id, from).is_none() {
            return;
        }

        let Some((room_id, port)) = self.manager.create(request.difficulty) else {
            self.reply(
                Message::JoinFailed {
                    reason: "no room slots available".into(),
                },
                sequence_id,
                from,
            );
            return;
        };

        let capacity = if request.capacity == 0 {
            self.config.room_capacity
        } else {
            request.capacity.min(self.config.room_capacity)
        };

        let mut room = Room::new(room_id, port, capacity);
        if !request.name.is_empty() {
            room.name = request.name;
        }
        room.visibility = request.visibility;
        room.room_type = request.room_type;
        room.difficulty = request.difficulty;
        if !request.password_hash.is_empty() {
            room.password_hash = Some(request.password_hash);
        }
        self.catalog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .add(room);

        log::info!("[Lobby] created room {room_id} on port {port}");
        self.events.push(ServerEvent::RoomCreated { room_id, port });
        self.reply(Message::RoomCreated { room_id, port }, sequence_id, from);
    }

    fn handle_join_room(
        &self,
        room_id: u32,
        password_hash: &str,
        sequence_id: u16,
        from: IpEndpoint,
    ) {
        if self.require_auth(sequence_id, from).is_none() {
            return;
        }

        let verdict = {
            let catalog = self.catalog.lock().unwrap_or_else(|e| e.into_inner());
            match catalog.get(room_id) {
                None => Err("room does not exist"),
                Some(room) if room.is_full() => Err("room is full"),
                Some(room) if room.state == RoomState::Playing => Err("game in progress"),
                Some(room) if !room.password_matches(password_hash) => Err("wrong password"),
                Some(room) => Ok(room.port),
            }
        };

        match verdict {
            Ok(port) if self.manager.has(room_id) => {
                let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(session) = sessions.get_mut(&from.key()) {
                    session.room_id = Some(room_id);
                }
                drop(sessions);
                log::info!("[Lobby] {from} joining room {room_id} on port {port}");
                self.events.push(ServerEvent::ClientJoined {
                    room_id,
                    endpoint: from,
                });
                self.reply(Message::JoinSuccess { room_id, port }, sequence_id, from);
            }
            Ok(_) => {
                self.reply(
                    Message::JoinFailed {
                        reason: "room does not exist".into(),
                    },
                    sequence_id,
                    from,
                );
            }
            Err(reason) => {
                log::info!("[Lobby] join {room_id} refused for {from}: {reason}");
                self.reply(
                    Message::JoinFailed {
                        reason: reason.into(),
                    },
                    sequence_id,
                    from,
                );
            }
        }
    }

    fn handle_leave_room(&self, room_id: u32, from: IpEndpoint) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get_mut(&from.key()) {
            if session.room_id == Some(room_id) {
                session.room_id = None;
            }
        }
    }

    fn handle_kick(&self, room_id: u32, player_id: u32, sequence_id: u16, from: IpEndpoint) {
        if self.require_auth(sequence_id, from).is_none() {
            return;
        }
        if !self.manager.kick(room_id, player_id) {
            log::warn!("[Lobby] kick in unknown room {room_id}");
        }
    }

    fn handle_force_start(&self, room_id: u32, sequence_id: u16, from: IpEndpoint) {
        if self.require_auth(sequence_id, from).is_none() {
            return;
        }
        let Some(port) = self.manager.port_of(room_id) else {
            self.reply(
                Message::JoinFailed {
                    reason: "room does not exist".into(),
                },
                sequence_id,
                from,
            );
            return;
        };

        // Tell everyone waiting in this room to move to the game port; the
        // ready handshake there still gates the actual start.
        let bytes =
            Message::RoomGameStarting { room_id, port }.encode_as(PacketDirection::ServerToClient, 0, 0);
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        for session in sessions.values() {
            if session.room_id == Some(room_id) {
                self.send(&bytes, session.endpoint);
            }
        }
    }

    fn handle_chat(&self, message: String, from: IpEndpoint) {
        let sender = self
            .username_of(from)
            .unwrap_or_else(|| from.to_string());
        let relay = Message::Chat {
            message: format!("{sender}: {message}"),
        }
        .encode_as(PacketDirection::ServerToClient, 0, 0);

        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        for session in sessions.values() {
            self.send(&relay, session.endpoint);
        }
    }

    /// Gate for operations that need a prior login; answers `AuthRequired`
    /// and returns `None` when the endpoint has not authenticated.
    fn require_auth(&self, sequence_id: u16, from: IpEndpoint) -> Option<String> {
        if self.is_authenticated(from) {
            self.username_of(from)
        } else {
            self.events.push(ServerEvent::AuthFailure { endpoint: from });
            self.reply(Message::AuthRequired, sequence_id, from);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JsonAuthService;
    use riptide::{MessageType, RoomDifficulty, RoomType, RoomVisibility};

    fn start_lobby(cleanup_ms: u64) -> (LobbyServer, Arc<AtomicBool>) {
        let running = Arc::new(AtomicBool::new(true));
        let config = ServerConfig {
            lobby_port: 0,
            game_base_port: 0,
            cleanup_interval: Duration::from_millis(cleanup_ms),
            client_timeout: Duration::from_millis(300),
            ..Default::default()
        };
        let mut path = std::env::temp_dir();
        path.push(format!(
            "riptide-lobby-{}-{cleanup_ms}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let auth = Arc::new(JsonAuthService::open(path).unwrap());
        let manager = Arc::new(InstanceManager::new(config.clone(), Arc::clone(&running)));
        let lobby = LobbyServer::start(config, auth, manager, Arc::clone(&running)).unwrap();
        (lobby, running)
    }

    struct LobbyClient {
        transport: UdpTransport,
        lobby: IpEndpoint,
        seq: u16,
    }

    impl LobbyClient {
        fn new(port: u16) -> Self {
            Self {
                transport: UdpTransport::open(IpEndpoint::localhost(0)).unwrap(),
                lobby: IpEndpoint::localhost(port),
                seq: 0,
            }
        }

        fn request(&mut self, message: Message, expect: MessageType) -> Message {
            let bytes = message.encode(self.seq, 0);
            self.seq += 1;
            self.transport.send_to(&bytes, self.lobby).unwrap();

            let mut buf = [0u8; 4096];
            let deadline = Instant::now() + Duration::from_secs(2);
            while Instant::now() < deadline {
                match self.transport.recv_from(&mut buf) {
                    Ok((size, _)) => {
                        if let Ok((_, reply)) =
                            Message::decode(&buf[..size], PacketDirection::ServerToClient)
                        {
                            if reply.message_type() == expect {
                                return reply;
                            }
                        }
                    }
                    Err(e) if e.is_transient() => thread::sleep(Duration::from_millis(1)),
                    Err(e) => panic!("recv failed: {e}"),
                }
            }
            panic!("no {expect:?} reply");
        }

        fn login(&mut self) {
            let reply = self.request(
                Message::RegisterRequest {
                    username: "ace".into(),
                    password_hash: "h4sh".into(),
                },
                MessageType::RegisterResponse,
            );
            assert!(matches!(reply, Message::RegisterResponse { success: true, .. }));
            let reply = self.request(
                Message::LoginRequest {
                    username: "ace".into(),
                    password_hash: "h4sh".into(),
                },
                MessageType::LoginResponse,
            );
            assert!(matches!(reply, Message::LoginResponse { success: true, .. }));
        }
    }

    #[test]
    fn unauthenticated_create_room_is_gated() {
        let (mut lobby, running) = start_lobby(1000);
        let mut client = LobbyClient::new(lobby.port());

        let reply = client.request(
            Message::CreateRoom(CreateRoom {
                name: "nope".into(),
                capacity: 4,
                visibility: RoomVisibility::Public,
                room_type: RoomType::Quickplay,
                difficulty: RoomDifficulty::Normal,
                password_hash: String::new(),
            }),
            MessageType::AuthRequired,
        );
        assert_eq!(reply, Message::AuthRequired);

        lobby.stop();
        running.store(false, Ordering::SeqCst);
    }

    #[test]
    fn room_lifecycle_list_create_join_cleanup() {
        let (mut lobby, running) = start_lobby(100);
        let mut client = LobbyClient::new(lobby.port());
        client.login();

        // Empty lobby lists zero rooms.
        let reply = client.request(Message::ListRooms, MessageType::RoomList);
        assert_eq!(reply, Message::RoomList { rooms: vec![] });

        // Create; the first room id is 1.
        let reply = client.request(
            Message::CreateRoom(CreateRoom {
                name: "test run".into(),
                capacity: 4,
                visibility: RoomVisibility::Public,
                room_type: RoomType::Quickplay,
                difficulty: RoomDifficulty::Normal,
                password_hash: String::new(),
            }),
            MessageType::RoomCreated,
        );
        let (room_id, port) = match reply {
            Message::RoomCreated { room_id, port } => (room_id, port),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(room_id, 1);
        assert_ne!(port, 0);

        let reply = client.request(Message::ListRooms, MessageType::RoomList);
        match reply {
            Message::RoomList { rooms } => {
                assert_eq!(rooms.len(), 1);
                assert_eq!(rooms[0].room_id, room_id);
                assert_eq!(rooms[0].state, RoomState::Waiting);
                assert_eq!(rooms[0].players, 0);
            }
            other => panic!("unexpected {other:?}"),
        }

        // Join succeeds and points at the game port.
        let reply = client.request(
            Message::JoinRoom {
                room_id,
                password_hash: String::new(),
            },
            MessageType::JoinSuccess,
        );
        assert_eq!(reply, Message::JoinSuccess { room_id, port });

        // Nobody ever connects to the game port: two cleanup sweeps later
        // the room is gone and the catalog follows.
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let reply = client.request(Message::ListRooms, MessageType::RoomList);
            match reply {
                Message::RoomList { rooms } if rooms.is_empty() => break,
                _ if Instant::now() > deadline => panic!("room never cleaned up"),
                _ => thread::sleep(Duration::from_millis(50)),
            }
        }

        lobby.stop();
        running.store(false, Ordering::SeqCst);
    }

    #[test]
    fn join_checks_password_and_existence() {
        let (mut lobby, running) = start_lobby(10_000);
        let mut client = LobbyClient::new(lobby.port());
        client.login();

        let reply = client.request(
            Message::JoinRoom {
                room_id: 99,
                password_hash: String::new(),
            },
            MessageType::JoinFailed,
        );
        assert!(matches!(reply, Message::JoinFailed { .. }));

        let reply = client.request(
            Message::CreateRoom(CreateRoom {
                name: "locked".into(),
                capacity: 4,
                visibility: RoomVisibility::Public,
                room_type: RoomType::Quickplay,
                difficulty: RoomDifficulty::Hard,
                password_hash: "sekrit".into(),
            }),
            MessageType::RoomCreated,
        );
        let room_id = match reply {
            Message::RoomCreated { room_id, .. } => room_id,
            other => panic!("unexpected {other:?}"),
        };

        let reply = client.request(
            Message::JoinRoom {
                room_id,
                password_hash: "wrong".into(),
            },
            MessageType::JoinFailed,
        );
        assert!(matches!(reply, Message::JoinFailed { .. }));

        let reply = client.request(
            Message::JoinRoom {
                room_id,
                password_hash: "sekrit".into(),
            },
            MessageType::JoinSuccess,
        );
        assert!(matches!(reply, Message::JoinSuccess { .. }));

        lobby.stop();
        running.store(false, Ordering::SeqCst);
    }
}
