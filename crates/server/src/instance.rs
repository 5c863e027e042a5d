//! The per-room runtime: one UDP port, one entity store, one session table
//! and a fixed 60 Hz tick thread flanked by the receive/send workers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use glam::Vec2;

use riptide::{
    Bounty, CameraBounds, DifficultyPreset, EntityId, EntityTag, Health, Hitbox, IpEndpoint,
    LevelDirector, LevelScript, Lives, Message, NetworkStats, PlayerInput, Projectile, Registry,
    RenderType, ReplicationEngine, Score, SessionTable, SpawnOrder, SystemSchedule, Tag,
    Transform, TransportError, UdpTransport, Velocity, WorkQueue,
    session::JoinOutcome,
    simulation::{
        BoundarySystem, CleanupSystem, EnemyMovementSystem, EnemyShootingSystem,
        InvincibilitySystem, MovementSystem, PlayerInputSystem, RespawnTimerSystem, apply_damage,
        award_scores, detect_collisions,
    },
};

use crate::config::ServerConfig;
use crate::workers::{
    ClientTimeoutEvent, ControlEvent, ControlKind, ReceiveWorker, ReceivedInput, SendHandle,
    SendWorker,
};

const PLAYER_RENDER_TYPE: u16 = 1;
const PLAYER_MAX_HEALTH: i32 = 1;
const PLAYER_LIVES: u8 = 3;
const DEATH_FX_RENDER_TYPE: u16 = 16;
const DEATH_FX_LIFETIME: f32 = 0.9;
const OFFSCREEN_PLACEHOLDER: Vec2 = Vec2::new(-10_000.0, -10_000.0);
const RESPAWN_POINT: Vec2 = Vec2::new(100.0, 400.0);
const RESPAWN_DELAY: f32 = 3.0;
const RESPAWN_INVINCIBILITY: f32 = 3.0;
const ENEMY_FIRE_INTERVAL: f32 = 2.0;
const BANDWIDTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum InstanceCommand {
    Broadcast(String),
    Kick(u32),
    Stop(String),
}

/// State an instance exposes to the manager and lobby without locking into
/// the tick thread.
pub struct InstanceShared {
    pub room_id: u32,
    pub port: u16,
    pub player_count: AtomicUsize,
    pub game_started: AtomicBool,
    pub running: AtomicBool,
    pub commands: WorkQueue<InstanceCommand>,
}

pub struct InstanceHandle {
    pub shared: Arc<InstanceShared>,
    receive: ReceiveWorker,
    send: SendWorker,
    tick: Option<JoinHandle<()>>,
}

impl InstanceHandle {
    pub fn room_id(&self) -> u32 {
        self.shared.room_id
    }

    pub fn port(&self) -> u16 {
        self.shared.port
    }

    pub fn player_count(&self) -> usize {
        self.shared.player_count.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.shared.game_started.load(Ordering::SeqCst)
    }

    pub fn broadcast(&self, message: String) {
        self.shared
            .commands
            .push(InstanceCommand::Broadcast(message));
    }

    pub fn kick(&self, player_id: u32) {
        self.shared.commands.push(InstanceCommand::Kick(player_id));
    }

    /// Stops in reverse start order: tick loop first, then the workers.
    pub fn shutdown(&mut self, reason: &str) {
        self.shared
            .commands
            .push(InstanceCommand::Stop(reason.to_string()));
        if let Some(tick) = self.tick.take() {
            let _ = tick.join();
        }
        self.shared.running.store(false, Ordering::SeqCst);
        self.send.stop();
        self.receive.stop();
    }
}

impl Drop for InstanceHandle {
    fn drop(&mut self) {
        if self.tick.is_some() {
            self.shutdown("server shutting down");
        }
    }
}

/// Binds the room's port and starts the three instance threads.
pub fn spawn_instance(
    room_id: u32,
    port: u16,
    config: &ServerConfig,
    preset: DifficultyPreset,
    global_running: Arc<AtomicBool>,
) -> Result<InstanceHandle, TransportError> {
    let transport = UdpTransport::open(IpEndpoint::new([0, 0, 0, 0], port))?;
    let bound_port = transport.local_endpoint().port;
    let recv_transport = transport.try_clone()?;

    let stop = Arc::new(AtomicBool::new(true));
    let stats = Arc::new(Mutex::new(NetworkStats::default()));

    let inputs = Arc::new(WorkQueue::new(1024));
    let control = Arc::new(WorkQueue::new(256));
    let timeouts = Arc::new(WorkQueue::new(64));

    let receive = ReceiveWorker::spawn(
        recv_transport,
        Arc::clone(&inputs),
        Arc::clone(&control),
        Arc::clone(&timeouts),
        Arc::clone(&stats),
        Arc::clone(&stop),
        config.client_timeout,
        format!("room-{room_id}-recv"),
    )
    .map_err(TransportError::Other)?;

    let (send, send_handle) = SendWorker::spawn(
        transport,
        Arc::clone(&stats),
        Arc::clone(&stop),
        config.snapshot_rate,
        format!("room-{room_id}-send"),
    )
    .map_err(TransportError::Other)?;

    let shared = Arc::new(InstanceShared {
        room_id,
        port: bound_port,
        player_count: AtomicUsize::new(0),
        game_started: AtomicBool::new(false),
        running: AtomicBool::new(true),
        commands: WorkQueue::new(64),
    });

    let mut instance = GameInstance::new(
        room_id,
        config,
        preset,
        send_handle,
        inputs,
        control,
        timeouts,
        Arc::clone(&stats),
        Arc::clone(&shared),
        global_running,
    );

    let tick = thread::Builder::new()
        .name(format!("room-{room_id}-tick"))
        .spawn(move || instance.run())
        .map_err(TransportError::Other)?;

    log::info!("[Room {room_id}] instance listening on port {bound_port}");

    Ok(InstanceHandle {
        shared,
        receive,
        send,
        tick: Some(tick),
    })
}

struct GameInstance {
    room_id: u32,
    tick_duration: Duration,
    dt: f32,
    client_timeout: Duration,
    preset: DifficultyPreset,

    registry: Registry,
    sessions: SessionTable,
    engine: ReplicationEngine,
    director: LevelDirector,
    pre_systems: SystemSchedule,
    post_systems: SystemSchedule,

    send: SendHandle,
    inputs: Arc<WorkQueue<ReceivedInput>>,
    control: Arc<WorkQueue<ControlEvent>>,
    timeouts: Arc<WorkQueue<ClientTimeoutEvent>>,
    stats: Arc<Mutex<NetworkStats>>,
    shared: Arc<InstanceShared>,
    global_running: Arc<AtomicBool>,

    tick: u32,
    started: bool,
    finished: bool,
    player_slot: u32,
    last_bandwidth_log: Instant,
}

impl GameInstance {
    #[allow(clippy::too_many_arguments)]
    fn new(
        room_id: u32,
        config: &ServerConfig,
        preset: DifficultyPreset,
        send: SendHandle,
        inputs: Arc<WorkQueue<ReceivedInput>>,
        control: Arc<WorkQueue<ControlEvent>>,
        timeouts: Arc<WorkQueue<ClientTimeoutEvent>>,
        stats: Arc<Mutex<NetworkStats>>,
        shared: Arc<InstanceShared>,
        global_running: Arc<AtomicBool>,
    ) -> Self {
        let script = LevelScript::first_mission();
        let bounds = script.bounds;
        Self {
            room_id,
            tick_duration: Duration::from_secs_f64(1.0 / config.tick_rate as f64),
            dt: 1.0 / config.tick_rate as f32,
            client_timeout: config.client_timeout,
            preset,
            registry: Registry::new(),
            sessions: SessionTable::new(),
            engine: ReplicationEngine::default(),
            director: LevelDirector::new(script),
            pre_systems: build_pre_systems(bounds),
            post_systems: build_post_systems(bounds),
            send,
            inputs,
            control,
            timeouts,
            stats,
            shared,
            global_running,
            tick: 0,
            started: false,
            finished: false,
            player_slot: 0,
            last_bandwidth_log: Instant::now(),
        }
    }

    fn running(&self) -> bool {
        self.global_running.load(Ordering::SeqCst) && self.shared.running.load(Ordering::SeqCst)
    }

    /// Monotonic tick clock; sleeps to the next deadline rather than a fixed
    /// interval so the loop does not drift.
    fn run(&mut self) {
        let mut next_tick = Instant::now() + self.tick_duration;
        while self.running() {
            self.tick_once();

            let now = Instant::now();
            if next_tick > now {
                thread::sleep(next_tick - now);
            } else {
                // Fell behind a full tick; re-anchor instead of spiraling.
                next_tick = now;
            }
            next_tick += self.tick_duration;
        }
        log::info!("[Room {}] tick loop stopped", self.room_id);
    }

    fn tick_once(&mut self) {
        self.drain_commands();
        self.drain_control();
        self.drain_timeouts();
        self.start_gate();
        self.drain_inputs();

        if self.started && !self.finished {
            self.step_simulation();
            self.resolve_combat();
            self.replicate();
            self.check_game_end();
        }

        // Ids freed this tick only become reusable once the replication
        // mirror has seen the destruction.
        self.registry.reclaim_ids();
        self.tick = self.tick.wrapping_add(1);
        self.housekeeping();
    }

    fn drain_commands(&mut self) {
        while let Some(command) = self.shared.commands.try_pop() {
            match command {
                InstanceCommand::Broadcast(message) => {
                    let bytes = Message::ServerBroadcast { message }.encode(0, self.tick);
                    self.send.broadcast(bytes);
                }
                InstanceCommand::Kick(player_id) => self.kick_player(player_id),
                InstanceCommand::Stop(reason) => {
                    let bytes = Message::ServerDisconnect { reason }.encode(0, self.tick);
                    self.send.broadcast(bytes);
                    self.shared.running.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    fn kick_player(&mut self, player_id: u32) {
        let Some(session) = self.sessions.by_player_id(player_id) else {
            log::warn!("[Room {}] kick failed: player {player_id} not found", self.room_id);
            return;
        };
        let endpoint = session.endpoint;
        let bytes = Message::PlayerKicked {
            reason: "kicked from the room".into(),
        }
        .encode(0, self.tick);
        self.send.send_to(bytes, endpoint);
        log::info!("[Room {}] kicked player {player_id} ({endpoint})", self.room_id);
        self.evict(endpoint, "kicked");
    }

    fn drain_control(&mut self) {
        while let Some(event) = self.control.try_pop() {
            self.handle_control(event);
        }
    }

    fn handle_control(&mut self, event: ControlEvent) {
        let ControlEvent {
            endpoint,
            sequence_id,
            kind,
        } = event;

        match kind {
            ControlKind::Hello => {
                self.sessions.hello(endpoint);
                let bytes = Message::ServerHello.encode(sequence_id, self.tick);
                self.send.send_to(bytes, endpoint);
            }
            ControlKind::JoinRequest => match self.sessions.join(endpoint, self.started) {
                JoinOutcome::Accepted { player_id } => {
                    self.send.register(endpoint);
                    self.ensure_player_entity(endpoint, player_id);
                    let bytes =
                        Message::ServerJoinAccept { player_id }.encode(sequence_id, self.tick);
                    self.send.send_to(bytes, endpoint);
                }
                JoinOutcome::Denied { reason } => {
                    log::info!(
                        "[Room {}] join denied for {endpoint}: {reason}",
                        self.room_id
                    );
                    let bytes = Message::ServerJoinDeny { reason }.encode(sequence_id, self.tick);
                    self.send.send_to(bytes, endpoint);
                }
            },
            ControlKind::Ready => {
                self.sessions.ready(endpoint);
            }
            ControlKind::Ping { timestamp_ms } => {
                let bytes = Message::Pong { timestamp_ms }.encode(sequence_id, self.tick);
                self.send.send_to(bytes, endpoint);
            }
            ControlKind::Disconnect => self.evict(endpoint, "disconnected"),
        }
    }

    fn ensure_player_entity(&mut self, endpoint: IpEndpoint, player_id: u32) {
        let key = endpoint.key();
        let already = self
            .sessions
            .get(&key)
            .and_then(|session| session.entity)
            .is_some();
        if already {
            return;
        }

        let slot = self.player_slot;
        self.player_slot += 1;
        let spawn = RESPAWN_POINT + Vec2::new(0.0, slot as f32 * 80.0);

        let id = self.registry.create_entity();
        self.registry.emplace(id, Transform::at(spawn.x, spawn.y));
        self.registry.emplace(id, Velocity(Vec2::ZERO));
        self.registry.emplace(id, Tag(EntityTag::PLAYER));
        self.registry.emplace(id, Health::full(PLAYER_MAX_HEALTH));
        self.registry.emplace(
            id,
            Lives {
                current: PLAYER_LIVES,
                max: PLAYER_LIVES,
            },
        );
        self.registry.emplace(id, Score(0));
        self.registry.emplace(id, RenderType(PLAYER_RENDER_TYPE));
        self.registry.emplace(id, Hitbox::centered(32.0, 16.0));
        self.registry.emplace(id, PlayerInput::default());

        if let Some(session) = self.sessions.get_mut(&key) {
            session.entity = Some(id);
        }
        log::info!(
            "[Room {}] player {player_id} -> entity {id} at {spawn}",
            self.room_id
        );
    }

    fn drain_timeouts(&mut self) {
        while let Some(ClientTimeoutEvent { endpoint }) = self.timeouts.try_pop() {
            if self.sessions.get(&endpoint.key()).is_some() {
                log::info!(
                    "[Room {}] client {endpoint} silent past {:?}",
                    self.room_id,
                    self.client_timeout
                );
                self.evict(endpoint, "timed out");
            }
        }
    }

    fn evict(&mut self, endpoint: IpEndpoint, reason: &str) {
        let Some(session) = self.sessions.remove(&endpoint.key()) else {
            return;
        };
        log::info!(
            "[Room {}] player {} {reason}",
            self.room_id,
            session.player_id
        );

        if session.joined {
            let bytes = Message::PlayerDisconnected {
                player_id: session.player_id,
            }
            .encode(0, self.tick);
            self.send.broadcast(bytes);
        }
        self.send.unregister(endpoint);

        if let Some(entity) = session.entity {
            self.registry.destroy_entity(entity);
        }
        self.purge_inputs(endpoint);

        if self.sessions.is_empty() {
            self.reset_game();
        }
    }

    fn purge_inputs(&mut self, endpoint: IpEndpoint) {
        let kept: Vec<ReceivedInput> = self
            .inputs
            .drain()
            .into_iter()
            .filter(|input| input.endpoint != endpoint)
            .collect();
        for input in kept {
            self.inputs.push(input);
        }
    }

    fn reset_game(&mut self) {
        log::info!("[Room {}] empty; resetting to pre-start state", self.room_id);
        self.registry.clear();
        self.engine.reset();
        self.director.reset();
        let bounds = self.director.bounds();
        self.pre_systems = build_pre_systems(bounds);
        self.post_systems = build_post_systems(bounds);
        self.sessions.clear();
        self.inputs.clear();
        self.control.clear();
        self.timeouts.clear();
        self.started = false;
        self.finished = false;
        self.tick = 0;
        self.player_slot = 0;
        self.shared.game_started.store(false, Ordering::SeqCst);
    }

    fn start_gate(&mut self) {
        if self.started || !self.sessions.all_ready() {
            return;
        }

        log::info!(
            "[Room {}] all {} player(s) ready; starting",
            self.room_id,
            self.sessions.len()
        );
        self.send
            .broadcast(Message::GameStart.encode(0, self.tick));
        self.send
            .broadcast(Message::LevelInit(self.director.init_message()).encode(0, self.tick));
        for session in self.sessions.iter_mut() {
            session.level_sent = true;
        }
        self.sessions.mark_started();
        self.started = true;
        self.shared.game_started.store(true, Ordering::SeqCst);
    }

    fn drain_inputs(&mut self) {
        while let Some(input) = self.inputs.try_pop() {
            let key = input.endpoint.key();
            let Some(session) = self.sessions.get_mut(&key) else {
                continue;
            };
            session.touch();
            session.record_input_sequence(input.sequence_id);

            let Some(entity) = session.entity else {
                continue;
            };
            self.registry.emplace(
                entity,
                PlayerInput {
                    x: input.frame.x,
                    y: input.frame.y,
                    angle: input.frame.angle,
                    buttons: input.frame.buttons.bits(),
                    sequence_id: input.sequence_id,
                },
            );
        }
    }

    fn step_simulation(&mut self) {
        self.pre_systems.run(&mut self.registry, self.dt);

        for order in self.director.update(self.dt) {
            self.spawn_enemy(order);
        }
        for event in self.director.consume_events() {
            let bytes = Message::LevelEvent(event).encode(0, self.tick);
            self.send.broadcast(bytes);
        }

        self.post_systems.run(&mut self.registry, self.dt);
    }

    fn spawn_enemy(&mut self, order: SpawnOrder) {
        let id = self.registry.create_entity();
        self.registry.emplace(id, Transform::at(order.x, order.y));
        self.registry.emplace(
            id,
            Velocity(Vec2::new(order.vel_x * self.preset.enemy_speed, order.vel_y)),
        );
        self.registry.emplace(id, Tag(EntityTag::ENEMY));
        let health = ((order.health as f32) * self.preset.enemy_health).ceil() as i32;
        self.registry.emplace(id, Health::full(health.max(1)));
        self.registry.emplace(id, RenderType(order.render_type));
        self.registry.emplace(id, Bounty(order.score_value));
        self.registry.emplace(id, Hitbox::centered(32.0, 32.0));
    }

    fn resolve_combat(&mut self) {
        let collisions = detect_collisions(&self.registry);
        if !collisions.is_empty() {
            log::debug!(
                "[Room {}] {} collision(s) this tick",
                self.room_id,
                collisions.len()
            );
        }
        let events = apply_damage(&mut self.registry, &collisions);
        award_scores(&mut self.registry, &events, self.preset.score);

        self.reap_dead();
        self.process_respawns();
    }

    fn reap_dead(&mut self) {
        let dead: Vec<EntityId> = self
            .registry
            .view::<Health>()
            .into_iter()
            .filter(|&id| {
                self.registry
                    .get::<Health>(id)
                    .is_some_and(Health::is_dead)
            })
            .collect();

        for id in dead {
            let is_player = self
                .registry
                .get::<Tag>(id)
                .is_some_and(|tag| tag.has(EntityTag::PLAYER));
            if is_player {
                self.handle_player_death(id);
            } else {
                self.registry.destroy_entity(id);
            }
        }
    }

    fn handle_player_death(&mut self, id: EntityId) {
        let pos = self
            .registry
            .get::<Transform>(id)
            .map(|t| t.pos)
            .unwrap_or(RESPAWN_POINT);
        self.spawn_death_fx(pos);

        let lives_left = self.registry.get::<Lives>(id).map_or(0, |l| l.current);
        if lives_left > 0 {
            if let Some(lives) = self.registry.get_mut::<Lives>(id) {
                lives.current -= 1;
            }
            if let Some(transform) = self.registry.get_mut::<Transform>(id) {
                transform.pos = OFFSCREEN_PLACEHOLDER;
            }
            if let Some(velocity) = self.registry.get_mut::<Velocity>(id) {
                velocity.0 = Vec2::ZERO;
            }
            if let Some(health) = self.registry.get_mut::<Health>(id) {
                health.current = health.max;
            }
            self.registry.emplace(
                id,
                riptide::RespawnTimer {
                    remaining: RESPAWN_DELAY,
                },
            );
            log::info!("[Room {}] player entity {id} down, {lives_left} life(s) banked", self.room_id);
        } else {
            log::info!("[Room {}] player entity {id} out of lives", self.room_id);
            self.registry.destroy_entity(id);
            for session in self.sessions.iter_mut() {
                if session.entity == Some(id) {
                    session.entity = None;
                }
            }
        }
    }

    fn spawn_death_fx(&mut self, pos: Vec2) {
        let fx = self.registry.create_entity();
        self.registry.emplace(fx, Transform::at(pos.x, pos.y));
        self.registry.emplace(fx, Tag(EntityTag::PROJECTILE));
        self.registry.emplace(fx, RenderType(DEATH_FX_RENDER_TYPE));
        self.registry.emplace(
            fx,
            Projectile {
                lifetime: DEATH_FX_LIFETIME,
                damage: 0,
                owner: 0,
                from_player: false,
            },
        );
    }

    fn process_respawns(&mut self) {
        let due: Vec<EntityId> = self
            .registry
            .view::<riptide::RespawnTimer>()
            .into_iter()
            .filter(|&id| {
                self.registry
                    .get::<riptide::RespawnTimer>(id)
                    .is_some_and(|timer| timer.remaining <= 0.0)
            })
            .collect();

        for id in due {
            self.registry.remove::<riptide::RespawnTimer>(id);
            if let Some(transform) = self.registry.get_mut::<Transform>(id) {
                transform.pos = RESPAWN_POINT;
            }
            if let Some(health) = self.registry.get_mut::<Health>(id) {
                health.current = health.max;
            }
            self.registry
                .emplace(id, riptide::Invincibility::new(RESPAWN_INVINCIBILITY));
            log::info!("[Room {}] player entity {id} respawned", self.room_id);
        }
    }

    fn replicate(&mut self) {
        let result = self.engine.synchronize(&self.registry, self.tick);

        for spawn in &result.spawns {
            let bytes = Message::EntitySpawn(*spawn).encode(0, self.tick);
            self.send.broadcast(bytes);
        }
        for &entity_id in &result.destroys {
            let bytes = Message::EntityDestroyed { entity_id }.encode(0, self.tick);
            self.send.broadcast(bytes);
        }

        if result.packets.is_empty() {
            return;
        }

        let mut datagrams = Vec::new();
        for session in self.sessions.iter() {
            if !session.joined {
                continue;
            }
            for packet in &result.packets {
                datagrams.push((
                    session.endpoint,
                    packet.to_datagram(session.last_input_sequence),
                ));
            }
        }
        if !datagrams.is_empty() {
            self.send.publish(datagrams);
        }
    }

    fn check_game_end(&mut self) {
        if self.director.is_complete() {
            log::info!("[Room {}] level complete", self.room_id);
            self.send
                .broadcast(Message::GameEnd { victory: true }.encode(0, self.tick));
            self.finished = true;
            return;
        }

        let any_player_left = self
            .sessions
            .iter()
            .any(|session| session.entity.is_some());
        if !self.sessions.is_empty() && !any_player_left {
            log::info!("[Room {}] all players destroyed", self.room_id);
            self.send
                .broadcast(Message::GameEnd { victory: false }.encode(0, self.tick));
            self.finished = true;
        }
    }

    fn housekeeping(&mut self) {
        let joined = self.sessions.iter().filter(|s| s.joined).count();
        self.shared.player_count.store(joined, Ordering::SeqCst);

        if self.last_bandwidth_log.elapsed() >= BANDWIDTH_LOG_INTERVAL {
            self.last_bandwidth_log = Instant::now();
            let stats = *self.stats.lock().unwrap_or_else(|e| e.into_inner());
            log::info!(
                "[Room {}] tick={} entities={} in={}B/{}pkts out={}B/{}pkts malformed={}",
                self.room_id,
                self.tick,
                self.registry.entity_count(),
                stats.bytes_received,
                stats.packets_received,
                stats.bytes_sent,
                stats.packets_sent,
                stats.malformed_packets,
            );
        }
    }
}

fn build_pre_systems(bounds: CameraBounds) -> SystemSchedule {
    let mut schedule = SystemSchedule::new();
    schedule.push(Box::new(PlayerInputSystem::new()));
    schedule.push(Box::new(MovementSystem));
    schedule.push(Box::new(BoundarySystem::new(bounds)));
    schedule.push(Box::new(EnemyMovementSystem::new()));
    schedule
}

fn build_post_systems(bounds: CameraBounds) -> SystemSchedule {
    let mut schedule = SystemSchedule::new();
    schedule.push(Box::new(EnemyShootingSystem::new(ENEMY_FIRE_INTERVAL)));
    schedule.push(Box::new(RespawnTimerSystem));
    schedule.push(Box::new(InvincibilitySystem));
    schedule.push(Box::new(CleanupSystem::new(bounds)));
    schedule
}

#[cfg(test)]
mod tests {
    use super::*;
    use riptide::{MessageType, PacketDirection};

    fn test_config() -> ServerConfig {
        ServerConfig {
            client_timeout: Duration::from_millis(300),
            ..Default::default()
        }
    }

    fn spawn_test_instance() -> (InstanceHandle, Arc<AtomicBool>) {
        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn_instance(
            1,
            0, // ephemeral port; the handle reports what was bound
            &test_config(),
            DifficultyPreset::of(riptide::RoomDifficulty::Normal),
            Arc::clone(&running),
        )
        .unwrap();
        (handle, running)
    }

    struct TestClient {
        transport: UdpTransport,
        server: IpEndpoint,
        seq: u16,
    }

    impl TestClient {
        fn new(port: u16) -> Self {
            Self {
                transport: UdpTransport::open(IpEndpoint::localhost(0)).unwrap(),
                server: IpEndpoint::localhost(port),
                seq: 0,
            }
        }

        fn send(&mut self, message: Message) {
            let bytes = message.encode(self.seq, 0);
            self.seq += 1;
            self.transport.send_to(&bytes, self.server).unwrap();
        }

        /// Pumps inbound datagrams until `wanted` arrives or `ms` elapses.
        fn expect(&self, wanted: MessageType, ms: u64) -> Option<Message> {
            let mut buf = [0u8; 2048];
            let deadline = Instant::now() + Duration::from_millis(ms);
            while Instant::now() < deadline {
                match self.transport.recv_from(&mut buf) {
                    Ok((size, _)) => {
                        if let Ok((_, message)) =
                            Message::decode(&buf[..size], PacketDirection::ServerToClient)
                        {
                            if message.message_type() == wanted {
                                return Some(message);
                            }
                        }
                    }
                    Err(e) if e.is_transient() => thread::sleep(Duration::from_millis(1)),
                    Err(_) => return None,
                }
            }
            None
        }
    }

    fn handshake(client: &mut TestClient) {
        client.send(Message::ClientHello);
        assert!(client.expect(MessageType::ServerHello, 500).is_some());
        client.send(Message::ClientJoinRequest);
        assert!(client.expect(MessageType::ServerJoinAccept, 500).is_some());
        client.send(Message::ClientReady);
    }

    #[test]
    fn handshake_reaches_game_start_and_level_init() {
        let (mut handle, running) = spawn_test_instance();
        let mut client = TestClient::new(handle.port());

        handshake(&mut client);
        assert!(client.expect(MessageType::GameStart, 1000).is_some());
        assert!(client.expect(MessageType::LevelInit, 1000).is_some());
        // The player entity announces itself.
        assert!(client.expect(MessageType::EntitySpawn, 1000).is_some());
        assert!(handle.is_started());
        assert_eq!(handle.player_count(), 1);

        handle.shutdown("test over");
        running.store(false, Ordering::SeqCst);
    }

    #[test]
    fn join_during_game_is_denied() {
        let (mut handle, running) = spawn_test_instance();
        let mut first = TestClient::new(handle.port());
        handshake(&mut first);
        assert!(first.expect(MessageType::GameStart, 1000).is_some());

        let mut second = TestClient::new(handle.port());
        second.send(Message::ClientHello);
        assert!(second.expect(MessageType::ServerHello, 500).is_some());
        second.send(Message::ClientJoinRequest);
        assert!(second.expect(MessageType::ServerJoinDeny, 500).is_some());

        // The denied endpoint never becomes a player.
        assert_eq!(handle.player_count(), 1);
        handle.shutdown("test over");
        running.store(false, Ordering::SeqCst);
    }

    #[test]
    fn silent_client_times_out_and_instance_resets() {
        let (mut handle, running) = spawn_test_instance();
        let mut client = TestClient::new(handle.port());
        handshake(&mut client);
        assert!(client.expect(MessageType::GameStart, 1000).is_some());

        // Go silent; the 300 ms test timeout evicts us and, as the last
        // client, resets the instance.
        let deadline = Instant::now() + Duration::from_secs(3);
        while handle.player_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(handle.player_count(), 0);
        assert!(!handle.is_started());

        handle.shutdown("test over");
        running.store(false, Ordering::SeqCst);
    }

    #[test]
    fn snapshots_echo_highest_input_sequence() {
        let (mut handle, running) = spawn_test_instance();
        let mut client = TestClient::new(handle.port());
        handshake(&mut client);
        assert!(client.expect(MessageType::GameStart, 1000).is_some());

        let input = Message::ClientInput(riptide::InputFrame {
            x: 1.0,
            y: 0.0,
            angle: 0.0,
            buttons: riptide::InputButtons::empty(),
        });
        let bytes = input.encode(41, 0);
        client.transport.send_to(&bytes, client.server).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut echoed = false;
        let mut buf = [0u8; 2048];
        while Instant::now() < deadline && !echoed {
            if let Ok((size, _)) = client.transport.recv_from(&mut buf) {
                if let Ok((header, Message::Snapshot(_))) =
                    Message::decode(&buf[..size], PacketDirection::ServerToClient)
                {
                    if header.sequence_id == 41 {
                        echoed = true;
                    }
                }
            } else {
                thread::sleep(Duration::from_millis(2));
            }
        }
        assert!(echoed, "snapshot never echoed input sequence 41");

        handle.shutdown("test over");
        running.store(false, Ordering::SeqCst);
    }
}
