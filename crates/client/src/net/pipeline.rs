//! Decode-and-route stage between the receiver thread and the game loop.
//!
//! Snapshots and chunks land in a per-tick reassembly buffer and come out as
//! complete entity sets; everything else fans out to typed queues or the
//! shared handshake flags the welcome loop watches.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use riptide::{
    ChunkAssembler, EntitySpawn, IpEndpoint, LevelEventData, LevelInit, Message, PacketDirection,
    SnapshotEntity, WorkQueue,
};

/// Handshake and liveness state shared with the welcome loop.
#[derive(Debug, Default)]
pub struct ClientFlags {
    pub join_accepted: AtomicBool,
    pub join_denied: AtomicBool,
    pub game_start: AtomicBool,
    pub handshake_done: AtomicBool,
    pub disconnected: AtomicBool,
    pub player_id: AtomicU32,
    pub countdown: AtomicU8,
    pub last_pong_ms: AtomicU64,
}

impl ClientFlags {
    pub fn handshake_done(&self) -> bool {
        self.handshake_done.load(Ordering::SeqCst)
    }
}

/// One parsed, reassembled snapshot.
#[derive(Debug, Clone)]
pub struct ParsedSnapshot {
    pub tick: u32,
    pub input_ack: u16,
    pub entities: Vec<SnapshotEntity>,
}

pub struct MessagePipeline {
    raw: Arc<WorkQueue<(Vec<u8>, IpEndpoint)>>,
    pub flags: Arc<ClientFlags>,
    assembler: ChunkAssembler,

    snapshots: VecDeque<ParsedSnapshot>,
    level_inits: VecDeque<LevelInit>,
    level_events: VecDeque<LevelEventData>,
    spawns: VecDeque<EntitySpawn>,
    destroys: VecDeque<u32>,
    notices: VecDeque<String>,
    game_ended: Option<bool>,
    malformed: u64,
    last_input_ack: u16,
}

impl MessagePipeline {
    pub fn new(raw: Arc<WorkQueue<(Vec<u8>, IpEndpoint)>>, flags: Arc<ClientFlags>) -> Self {
        Self {
            raw,
            flags,
            assembler: ChunkAssembler::new(),
            snapshots: VecDeque::new(),
            level_inits: VecDeque::new(),
            level_events: VecDeque::new(),
            spawns: VecDeque::new(),
            destroys: VecDeque::new(),
            notices: VecDeque::new(),
            game_ended: None,
            malformed: 0,
            last_input_ack: 0,
        }
    }

    /// Drains the raw queue, decoding and routing everything in it.
    pub fn pump(&mut self) {
        while let Some((datagram, _from)) = self.raw.try_pop() {
            match Message::decode(&datagram, PacketDirection::ServerToClient) {
                Ok((header, message)) => {
                    self.route(message, header.sequence_id, header.tick_id);
                }
                Err(err) => {
                    self.malformed += 1;
                    log::debug!("[Net] dropping malformed packet: {err}");
                }
            }
        }
    }

    fn route(&mut self, message: Message, sequence_id: u16, tick_id: u32) {
        match message {
            Message::Snapshot(mut packet) | Message::SnapshotChunk(mut packet) => {
                packet.tick_id = tick_id;
                if let Some((tick, entities)) = self.assembler.push(packet) {
                    self.last_input_ack = sequence_id;
                    self.snapshots.push_back(ParsedSnapshot {
                        tick,
                        input_ack: sequence_id,
                        entities,
                    });
                }
            }
            Message::LevelInit(init) => self.level_inits.push_back(init),
            Message::LevelEvent(event) => self.level_events.push_back(event),
            Message::EntitySpawn(spawn) => self.spawns.push_back(spawn),
            Message::EntityDestroyed { entity_id } => self.destroys.push_back(entity_id),
            Message::ServerHello => {}
            Message::ServerJoinAccept { player_id } => {
                self.flags.player_id.store(player_id, Ordering::SeqCst);
                self.flags.join_accepted.store(true, Ordering::SeqCst);
            }
            Message::ServerJoinDeny { reason } => {
                self.flags.join_denied.store(true, Ordering::SeqCst);
                self.notices.push_back(format!("join denied: {reason}"));
            }
            Message::GameStart => {
                self.flags.game_start.store(true, Ordering::SeqCst);
                self.flags.handshake_done.store(true, Ordering::SeqCst);
            }
            Message::GameEnd { victory } => {
                self.game_ended = Some(victory);
            }
            Message::CountdownTick { seconds_left } => {
                self.flags.countdown.store(seconds_left, Ordering::SeqCst);
            }
            Message::Pong { timestamp_ms } => {
                self.flags.last_pong_ms.store(timestamp_ms, Ordering::SeqCst);
            }
            Message::PlayerDisconnected { player_id } => {
                self.notices.push_back(format!("player {player_id} left"));
            }
            Message::PlayerKicked { reason } => {
                self.flags.disconnected.store(true, Ordering::SeqCst);
                self.notices.push_back(format!("kicked: {reason}"));
            }
            Message::ServerBroadcast { message } | Message::Chat { message } => {
                self.notices.push_back(message);
            }
            Message::ServerDisconnect { reason } => {
                self.flags.disconnected.store(true, Ordering::SeqCst);
                self.notices.push_back(format!("server closed: {reason}"));
            }
            other => {
                log::debug!("[Net] ignoring {:?} on game socket", other.message_type());
            }
        }
    }

    pub fn next_snapshot(&mut self) -> Option<ParsedSnapshot> {
        self.snapshots.pop_front()
    }

    pub fn next_level_init(&mut self) -> Option<LevelInit> {
        self.level_inits.pop_front()
    }

    pub fn drain_level_events(&mut self) -> Vec<LevelEventData> {
        self.level_events.drain(..).collect()
    }

    pub fn drain_spawns(&mut self) -> Vec<EntitySpawn> {
        self.spawns.drain(..).collect()
    }

    pub fn drain_destroys(&mut self) -> Vec<u32> {
        self.destroys.drain(..).collect()
    }

    pub fn drain_notices(&mut self) -> Vec<String> {
        self.notices.drain(..).collect()
    }

    pub fn game_ended(&self) -> Option<bool> {
        self.game_ended
    }

    /// Highest input sequence the server has acknowledged via snapshots.
    pub fn last_input_ack(&self) -> u16 {
        self.last_input_ack
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riptide::{SnapshotPacket, UpdateMask};

    fn pipeline() -> MessagePipeline {
        let raw = Arc::new(WorkQueue::new(64));
        MessagePipeline::new(raw, Arc::new(ClientFlags::default()))
    }

    fn push(pipeline: &MessagePipeline, bytes: Vec<u8>) {
        pipeline.raw.push((bytes, IpEndpoint::localhost(1)));
    }

    #[test]
    fn handshake_flags_follow_messages() {
        let mut p = pipeline();
        push(&p, Message::ServerJoinAccept { player_id: 7 }.encode(0, 0));
        push(&p, Message::GameStart.encode(0, 1));
        p.pump();

        assert!(p.flags.join_accepted.load(Ordering::SeqCst));
        assert!(p.flags.handshake_done());
        assert_eq!(p.flags.player_id.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn lifecycle_and_level_messages_queue_up() {
        let mut p = pipeline();
        push(
            &p,
            Message::EntitySpawn(EntitySpawn {
                entity_id: 5,
                entity_type: 8,
                pos_x: 10.0,
                pos_y: 20.0,
            })
            .encode(0, 2),
        );
        push(&p, Message::EntityDestroyed { entity_id: 9 }.encode(0, 2));
        push(
            &p,
            Message::LevelEvent(LevelEventData::SetScroll { speed: 90.0 }).encode(0, 2),
        );
        p.pump();

        assert_eq!(p.drain_spawns().len(), 1);
        assert_eq!(p.drain_destroys(), vec![9]);
        assert_eq!(p.drain_level_events().len(), 1);
    }

    #[test]
    fn snapshot_reassembly_and_ack_tracking() {
        let mut p = pipeline();

        let mut entity = SnapshotEntity::new(1);
        entity.mask = UpdateMask::POS_X;
        entity.pos_x = 55.0;
        let mut packet = SnapshotPacket::new(30);
        packet.entities = vec![entity];

        push(&p, packet.to_datagram(12));
        p.pump();

        let parsed = p.next_snapshot().expect("snapshot not parsed");
        assert_eq!(parsed.tick, 30);
        assert_eq!(parsed.input_ack, 12);
        assert_eq!(parsed.entities.len(), 1);
        assert_eq!(p.last_input_ack(), 12);

        // An older tick arriving late is dropped by the assembler.
        let mut stale = SnapshotPacket::new(29);
        stale.entities = vec![entity];
        push(&p, stale.to_datagram(13));
        p.pump();
        assert!(p.next_snapshot().is_none());
    }

    #[test]
    fn malformed_datagrams_count_and_never_panic() {
        let mut p = pipeline();
        push(&p, b"garbage".to_vec());
        // A client-direction packet on the client is also malformed.
        push(&p, Message::ClientHello.encode(0, 0));
        p.pump();
        assert_eq!(p.malformed(), 2);
    }
}
