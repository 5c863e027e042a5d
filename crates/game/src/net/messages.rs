//! Typed messages and their payload layouts.
//!
//! Every message fixes its own string form: names and reasons are
//! `u8`-length-prefixed, chat/broadcast text and password hashes are
//! `u16`-length-prefixed. Empty payloads are omitted entirely.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::protocol::{self, MessageType, PacketDirection, PacketHeader, ParseError};
use super::snapshot::SnapshotPacket;
use super::wire::{ByteReader, ByteWriter};

bitflags! {
    /// Button state carried by `ClientInput`; movement itself is analog.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InputButtons: u16 {
        const FIRE = 1 << 0;
        const CHARGE = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputFrame {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub buttons: InputButtons,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntitySpawn {
    pub entity_id: u32,
    pub entity_type: u16,
    pub pos_x: f32,
    pub pos_y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraBounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelInit {
    pub level_id: u16,
    pub scroll_speed: f32,
    pub bounds: CameraBounds,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LevelEventData {
    SetScroll { speed: f32 },
    SetBackground { background_id: u16 },
    SetMusic { music_id: u16 },
    SetCameraBounds(CameraBounds),
    GateOpen { gate_id: u16 },
    GateClose { gate_id: u16 },
}

impl LevelEventData {
    fn kind(&self) -> u8 {
        match self {
            Self::SetScroll { .. } => 0,
            Self::SetBackground { .. } => 1,
            Self::SetMusic { .. } => 2,
            Self::SetCameraBounds(_) => 3,
            Self::GateOpen { .. } => 4,
            Self::GateClose { .. } => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum RoomState {
    #[default]
    Waiting = 0,
    Countdown = 1,
    Playing = 2,
    Finished = 3,
}

impl TryFrom<u8> for RoomState {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, ParseError> {
        match value {
            0 => Ok(Self::Waiting),
            1 => Ok(Self::Countdown),
            2 => Ok(Self::Playing),
            3 => Ok(Self::Finished),
            other => Err(ParseError::BadEnum("roomState", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum RoomVisibility {
    #[default]
    Public = 0,
    Private = 1,
}

impl TryFrom<u8> for RoomVisibility {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, ParseError> {
        match value {
            0 => Ok(Self::Public),
            1 => Ok(Self::Private),
            other => Err(ParseError::BadEnum("visibility", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum RoomType {
    #[default]
    Quickplay = 0,
    Ranked = 1,
}

impl TryFrom<u8> for RoomType {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, ParseError> {
        match value {
            0 => Ok(Self::Quickplay),
            1 => Ok(Self::Ranked),
            other => Err(ParseError::BadEnum("roomType", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum RoomDifficulty {
    Easy = 0,
    #[default]
    Normal = 1,
    Hard = 2,
}

impl TryFrom<u8> for RoomDifficulty {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, ParseError> {
        match value {
            0 => Ok(Self::Easy),
            1 => Ok(Self::Normal),
            2 => Ok(Self::Hard),
            other => Err(ParseError::BadEnum("difficulty", other)),
        }
    }
}

/// One row of the lobby's room catalog as it crosses the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomInfo {
    pub room_id: u32,
    pub port: u16,
    pub state: RoomState,
    pub players: u8,
    pub capacity: u8,
    pub visibility: RoomVisibility,
    pub room_type: RoomType,
    pub difficulty: RoomDifficulty,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateRoom {
    pub name: String,
    pub capacity: u8,
    pub visibility: RoomVisibility,
    pub room_type: RoomType,
    pub difficulty: RoomDifficulty,
    /// Empty string means an open room.
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerEntry {
    pub player_id: u32,
    pub name: String,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ClientHello,
    ServerHello,
    ClientJoinRequest,
    ServerJoinAccept { player_id: u32 },
    ServerJoinDeny { reason: String },
    ClientReady,
    Ping { timestamp_ms: u64 },
    Pong { timestamp_ms: u64 },
    ClientInput(InputFrame),
    Snapshot(SnapshotPacket),
    SnapshotChunk(SnapshotPacket),
    EntitySpawn(EntitySpawn),
    EntityDestroyed { entity_id: u32 },
    LevelInit(LevelInit),
    LevelEvent(LevelEventData),
    GameStart,
    GameEnd { victory: bool },
    PlayerDisconnected { player_id: u32 },
    ClientDisconnect,
    CountdownTick { seconds_left: u8 },

    ListRooms,
    RoomList { rooms: Vec<RoomInfo> },
    CreateRoom(CreateRoom),
    RoomCreated { room_id: u32, port: u16 },
    JoinRoom { room_id: u32, password_hash: String },
    JoinSuccess { room_id: u32, port: u16 },
    JoinFailed { reason: String },
    LeaveRoom { room_id: u32 },
    KickPlayer { room_id: u32, player_id: u32 },
    PlayerList { players: Vec<PlayerEntry> },
    ForceStart { room_id: u32 },
    RoomGameStarting { room_id: u32, port: u16 },
    PlayerKicked { reason: String },
    Chat { message: String },

    LoginRequest { username: String, password_hash: String },
    LoginResponse { success: bool, message: String },
    RegisterRequest { username: String, password_hash: String },
    RegisterResponse { success: bool, message: String },
    ChangePasswordRequest { old_hash: String, new_hash: String },
    ChangePasswordResponse { success: bool, message: String },
    AuthRequired,
    GetStatsRequest,
    GetStatsResponse { games_played: u32, games_won: u32, high_score: u32 },

    ServerBroadcast { message: String },
    ServerDisconnect { reason: String },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ClientHello => MessageType::ClientHello,
            Self::ServerHello => MessageType::ServerHello,
            Self::ClientJoinRequest => MessageType::ClientJoinRequest,
            Self::ServerJoinAccept { .. } => MessageType::ServerJoinAccept,
            Self::ServerJoinDeny { .. } => MessageType::ServerJoinDeny,
            Self::ClientReady => MessageType::ClientReady,
            Self::Ping { .. } => MessageType::Ping,
            Self::Pong { .. } => MessageType::Pong,
            Self::ClientInput(_) => MessageType::ClientInput,
            Self::Snapshot(_) => MessageType::Snapshot,
            Self::SnapshotChunk(_) => MessageType::SnapshotChunk,
            Self::EntitySpawn(_) => MessageType::EntitySpawn,
            Self::EntityDestroyed { .. } => MessageType::EntityDestroyed,
            Self::LevelInit(_) => MessageType::LevelInit,
            Self::LevelEvent(_) => MessageType::LevelEvent,
            Self::GameStart => MessageType::GameStart,
            Self::GameEnd { .. } => MessageType::GameEnd,
            Self::PlayerDisconnected { .. } => MessageType::PlayerDisconnected,
            Self::ClientDisconnect => MessageType::ClientDisconnect,
            Self::CountdownTick { .. } => MessageType::CountdownTick,
            Self::ListRooms => MessageType::ListRooms,
            Self::RoomList { .. } => MessageType::RoomList,
            Self::CreateRoom(_) => MessageType::CreateRoom,
            Self::RoomCreated { .. } => MessageType::RoomCreated,
            Self::JoinRoom { .. } => MessageType::JoinRoom,
            Self::JoinSuccess { .. } => MessageType::JoinSuccess,
            Self::JoinFailed { .. } => MessageType::JoinFailed,
            Self::LeaveRoom { .. } => MessageType::LeaveRoom,
            Self::KickPlayer { .. } => MessageType::KickPlayer,
            Self::PlayerList { .. } => MessageType::PlayerList,
            Self::ForceStart { .. } => MessageType::ForceStart,
            Self::RoomGameStarting { .. } => MessageType::RoomGameStarting,
            Self::PlayerKicked { .. } => MessageType::PlayerKicked,
            Self::Chat { .. } => MessageType::Chat,
            Self::LoginRequest { .. } => MessageType::LoginRequest,
            Self::LoginResponse { .. } => MessageType::LoginResponse,
            Self::RegisterRequest { .. } => MessageType::RegisterRequest,
            Self::RegisterResponse { .. } => MessageType::RegisterResponse,
            Self::ChangePasswordRequest { .. } => MessageType::ChangePasswordRequest,
            Self::ChangePasswordResponse { .. } => MessageType::ChangePasswordResponse,
            Self::AuthRequired => MessageType::AuthRequired,
            Self::GetStatsRequest => MessageType::GetStatsRequest,
            Self::GetStatsResponse { .. } => MessageType::GetStatsResponse,
            Self::ServerBroadcast { .. } => MessageType::ServerBroadcast,
            Self::ServerDisconnect { .. } => MessageType::ServerDisconnect,
        }
    }

    /// The side that originates this message. Chat originates on the client;
    /// the lobby relays it with `encode_as(ServerToClient, …)`.
    pub fn direction(&self) -> PacketDirection {
        use MessageType::*;
        match self.message_type() {
            ClientHello | ClientJoinRequest | ClientReady | Ping | ClientInput
            | ClientDisconnect | ListRooms | CreateRoom | JoinRoom | LeaveRoom | KickPlayer
            | ForceStart | Chat | LoginRequest | RegisterRequest | ChangePasswordRequest
            | GetStatsRequest => PacketDirection::ClientToServer,
            _ => PacketDirection::ServerToClient,
        }
    }

    pub fn encode(&self, sequence_id: u16, tick_id: u32) -> Vec<u8> {
        self.encode_as(self.direction(), sequence_id, tick_id)
    }

    pub fn encode_as(
        &self,
        direction: PacketDirection,
        sequence_id: u16,
        tick_id: u32,
    ) -> Vec<u8> {
        let mut w = ByteWriter::new();
        self.write_payload(&mut w);
        protocol::frame(
            direction,
            self.message_type(),
            sequence_id,
            tick_id,
            &w.into_vec(),
        )
    }

    fn write_payload(&self, w: &mut ByteWriter) {
        match self {
            Self::ClientHello
            | Self::ServerHello
            | Self::ClientJoinRequest
            | Self::ClientReady
            | Self::GameStart
            | Self::ClientDisconnect
            | Self::ListRooms
            | Self::AuthRequired
            | Self::GetStatsRequest => {}

            Self::ServerJoinAccept { player_id } => w.put_u32(*player_id),
            Self::ServerJoinDeny { reason } | Self::JoinFailed { reason } => {
                w.put_string8(reason);
            }
            Self::Ping { timestamp_ms } | Self::Pong { timestamp_ms } => {
                w.put_u64(*timestamp_ms);
            }
            Self::ClientInput(input) => {
                w.put_f32(input.x);
                w.put_f32(input.y);
                w.put_f32(input.angle);
                w.put_u16(input.buttons.bits());
            }
            Self::Snapshot(packet) => packet.write_payload(w, false),
            Self::SnapshotChunk(packet) => packet.write_payload(w, true),
            Self::EntitySpawn(spawn) => {
                w.put_u32(spawn.entity_id);
                w.put_u16(spawn.entity_type);
                w.put_f32(spawn.pos_x);
                w.put_f32(spawn.pos_y);
            }
            Self::EntityDestroyed { entity_id } => w.put_u32(*entity_id),
            Self::LevelInit(init) => {
                w.put_u16(init.level_id);
                w.put_f32(init.scroll_speed);
                write_bounds(w, &init.bounds);
            }
            Self::LevelEvent(event) => {
                w.put_u8(event.kind());
                match event {
                    LevelEventData::SetScroll { speed } => w.put_f32(*speed),
                    LevelEventData::SetBackground { background_id } => {
                        w.put_u16(*background_id);
                    }
                    LevelEventData::SetMusic { music_id } => w.put_u16(*music_id),
                    LevelEventData::SetCameraBounds(bounds) => write_bounds(w, bounds),
                    LevelEventData::GateOpen { gate_id }
                    | LevelEventData::GateClose { gate_id } => w.put_u16(*gate_id),
                }
            }
            Self::GameEnd { victory } => w.put_u8(*victory as u8),
            Self::PlayerDisconnected { player_id } => w.put_u32(*player_id),
            Self::CountdownTick { seconds_left } => w.put_u8(*seconds_left),

            Self::RoomList { rooms } => {
                w.put_u8(rooms.len().min(u8::MAX as usize) as u8);
                for room in rooms.iter().take(u8::MAX as usize) {
                    w.put_u32(room.room_id);
                    w.put_u16(room.port);
                    w.put_u8(room.state as u8);
                    w.put_u8(room.players);
                    w.put_u8(room.capacity);
                    w.put_u8(room.visibility as u8);
                    w.put_u8(room.room_type as u8);
                    w.put_u8(room.difficulty as u8);
                    w.put_string8(&room.name);
                }
            }
            Self::CreateRoom(req) => {
                w.put_string8(&req.name);
                w.put_u8(req.capacity);
                w.put_u8(req.visibility as u8);
                w.put_u8(req.room_type as u8);
                w.put_u8(req.difficulty as u8);
                w.put_string16(&req.password_hash);
            }
            Self::RoomCreated { room_id, port }
            | Self::JoinSuccess { room_id, port }
            | Self::RoomGameStarting { room_id, port } => {
                w.put_u32(*room_id);
                w.put_u16(*port);
            }
            Self::JoinRoom {
                room_id,
                password_hash,
            } => {
                w.put_u32(*room_id);
                w.put_string16(password_hash);
            }
            Self::LeaveRoom { room_id } | Self::ForceStart { room_id } => {
                w.put_u32(*room_id);
            }
            Self::KickPlayer { room_id, player_id } => {
                w.put_u32(*room_id);
                w.put_u32(*player_id);
            }
            Self::PlayerList { players } => {
                w.put_u8(players.len().min(u8::MAX as usize) as u8);
                for player in players.iter().take(u8::MAX as usize) {
                    w.put_u32(player.player_id);
                    w.put_string8(&player.name);
                    w.put_u8(player.ready as u8);
                }
            }
            Self::PlayerKicked { reason } | Self::ServerDisconnect { reason } => {
                w.put_string8(reason);
            }
            Self::Chat { message } | Self::ServerBroadcast { message } => {
                w.put_string16(message);
            }

            Self::LoginRequest {
                username,
                password_hash,
            }
            | Self::RegisterRequest {
                username,
                password_hash,
            } => {
                w.put_string8(username);
                w.put_string16(password_hash);
            }
            Self::LoginResponse { success, message }
            | Self::RegisterResponse { success, message }
            | Self::ChangePasswordResponse { success, message } => {
                w.put_u8(*success as u8);
                w.put_string8(message);
            }
            Self::ChangePasswordRequest { old_hash, new_hash } => {
                w.put_string16(old_hash);
                w.put_string16(new_hash);
            }
            Self::GetStatsResponse {
                games_played,
                games_won,
                high_score,
            } => {
                w.put_u32(*games_played);
                w.put_u32(*games_won);
                w.put_u32(*high_score);
            }
        }
    }

    /// Unframes `data` (checking magic, version, length, CRC and direction)
    /// and parses the payload for the header's message type. Trailing bytes
    /// after the last field are treated as a length inconsistency.
    pub fn decode(
        data: &[u8],
        expected: PacketDirection,
    ) -> Result<(PacketHeader, Message), ParseError> {
        let (header, payload) = protocol::unframe(data, expected)?;
        let mut r = ByteReader::new(&payload);
        let message = Self::read_payload(header.message_type, &mut r)?;
        if !r.is_exhausted() {
            return Err(ParseError::LengthMismatch);
        }
        Ok((header, message))
    }

    fn read_payload(kind: MessageType, r: &mut ByteReader<'_>) -> Result<Message, ParseError> {
        Ok(match kind {
            MessageType::ClientHello => Self::ClientHello,
            MessageType::ServerHello => Self::ServerHello,
            MessageType::ClientJoinRequest => Self::ClientJoinRequest,
            MessageType::ServerJoinAccept => Self::ServerJoinAccept {
                player_id: r.u32()?,
            },
            MessageType::ServerJoinDeny => Self::ServerJoinDeny {
                reason: r.string8()?,
            },
            MessageType::ClientReady => Self::ClientReady,
            MessageType::Ping => Self::Ping {
                timestamp_ms: r.u64()?,
            },
            MessageType::Pong => Self::Pong {
                timestamp_ms: r.u64()?,
            },
            MessageType::ClientInput => Self::ClientInput(InputFrame {
                x: r.f32()?,
                y: r.f32()?,
                angle: r.f32()?,
                buttons: InputButtons::from_bits_truncate(r.u16()?),
            }),
            MessageType::Snapshot => Self::Snapshot(SnapshotPacket::read_payload(r, false)?),
            MessageType::SnapshotChunk => {
                Self::SnapshotChunk(SnapshotPacket::read_payload(r, true)?)
            }
            MessageType::EntitySpawn => Self::EntitySpawn(EntitySpawn {
                entity_id: r.u32()?,
                entity_type: r.u16()?,
                pos_x: r.f32()?,
                pos_y: r.f32()?,
            }),
            MessageType::EntityDestroyed => Self::EntityDestroyed {
                entity_id: r.u32()?,
            },
            MessageType::LevelInit => Self::LevelInit(LevelInit {
                level_id: r.u16()?,
                scroll_speed: r.f32()?,
                bounds: read_bounds(r)?,
            }),
            MessageType::LevelEvent => Self::LevelEvent(match r.u8()? {
                0 => LevelEventData::SetScroll { speed: r.f32()? },
                1 => LevelEventData::SetBackground {
                    background_id: r.u16()?,
                },
                2 => LevelEventData::SetMusic { music_id: r.u16()? },
                3 => LevelEventData::SetCameraBounds(read_bounds(r)?),
                4 => LevelEventData::GateOpen { gate_id: r.u16()? },
                5 => LevelEventData::GateClose { gate_id: r.u16()? },
                other => return Err(ParseError::BadEnum("levelEvent", other)),
            }),
            MessageType::GameStart => Self::GameStart,
            MessageType::GameEnd => Self::GameEnd {
                victory: r.u8()? != 0,
            },
            MessageType::PlayerDisconnected => Self::PlayerDisconnected {
                player_id: r.u32()?,
            },
            MessageType::ClientDisconnect => Self::ClientDisconnect,
            MessageType::CountdownTick => Self::CountdownTick {
                seconds_left: r.u8()?,
            },

            MessageType::ListRooms => Self::ListRooms,
            MessageType::RoomList => {
                let count = r.u8()? as usize;
                let mut rooms = Vec::with_capacity(count);
                for _ in 0..count {
                    rooms.push(RoomInfo {
                        room_id: r.u32()?,
                        port: r.u16()?,
                        state: RoomState::try_from(r.u8()?)?,
                        players: r.u8()?,
                        capacity: r.u8()?,
                        visibility: RoomVisibility::try_from(r.u8()?)?,
                        room_type: RoomType::try_from(r.u8()?)?,
                        difficulty: RoomDifficulty::try_from(r.u8()?)?,
                        name: r.string8()?,
                    });
                }
                Self::RoomList { rooms }
            }
            MessageType::CreateRoom => Self::CreateRoom(CreateRoom {
                name: r.string8()?,
                capacity: r.u8()?,
                visibility: RoomVisibility::try_from(r.u8()?)?,
                room_type: RoomType::try_from(r.u8()?)?,
                difficulty: RoomDifficulty::try_from(r.u8()?)?,
                password_hash: r.string16()?,
            }),
            MessageType::RoomCreated => Self::RoomCreated {
                room_id: r.u32()?,
                port: r.u16()?,
            },
            MessageType::JoinRoom => Self::JoinRoom {
                room_id: r.u32()?,
                password_hash: r.string16()?,
            },
            MessageType::JoinSuccess => Self::JoinSuccess {
                room_id: r.u32()?,
                port: r.u16()?,
            },
            MessageType::JoinFailed => Self::JoinFailed {
                reason: r.string8()?,
            },
            MessageType::LeaveRoom => Self::LeaveRoom { room_id: r.u32()? },
            MessageType::KickPlayer => Self::KickPlayer {
                room_id: r.u32()?,
                player_id: r.u32()?,
            },
            MessageType::PlayerList => {
                let count = r.u8()? as usize;
                let mut players = Vec::with_capacity(count);
                for _ in 0..count {
                    players.push(PlayerEntry {
                        player_id: r.u32()?,
                        name: r.string8()?,
                        ready: r.u8()? != 0,
                    });
                }
                Self::PlayerList { players }
            }
            MessageType::ForceStart => Self::ForceStart { room_id: r.u32()? },
            MessageType::RoomGameStarting => Self::RoomGameStarting {
                room_id: r.u32()?,
                port: r.u16()?,
            },
            MessageType::PlayerKicked => Self::PlayerKicked {
                reason: r.string8()?,
            },
            MessageType::Chat => Self::Chat {
                message: r.string16()?,
            },

            MessageType::LoginRequest => Self::LoginRequest {
                username: r.string8()?,
                password_hash: r.string16()?,
            },
            MessageType::LoginResponse => Self::LoginResponse {
                success: r.u8()? != 0,
                message: r.string8()?,
            },
            MessageType::RegisterRequest => Self::RegisterRequest {
                username: r.string8()?,
                password_hash: r.string16()?,
            },
            MessageType::RegisterResponse => Self::RegisterResponse {
                success: r.u8()? != 0,
                message: r.string8()?,
            },
            MessageType::ChangePasswordRequest => Self::ChangePasswordRequest {
                old_hash: r.string16()?,
                new_hash: r.string16()?,
            },
            MessageType::ChangePasswordResponse => Self::ChangePasswordResponse {
                success: r.u8()? != 0,
                message: r.string8()?,
            },
            MessageType::AuthRequired => Self::AuthRequired,
            MessageType::GetStatsRequest => Self::GetStatsRequest,
            MessageType::GetStatsResponse => Self::GetStatsResponse {
                games_played: r.u32()?,
                games_won: r.u32()?,
                high_score: r.u32()?,
            },

            MessageType::ServerBroadcast => Self::ServerBroadcast {
                message: r.string16()?,
            },
            MessageType::ServerDisconnect => Self::ServerDisconnect {
                reason: r.string8()?,
            },
        })
    }
}

fn write_bounds(w: &mut ByteWriter, bounds: &CameraBounds) {
    w.put_f32(bounds.min_x);
    w.put_f32(bounds.max_x);
    w.put_f32(bounds.min_y);
    w.put_f32(bounds.max_y);
}

fn read_bounds(r: &mut ByteReader<'_>) -> Result<CameraBounds, ParseError> {
    Ok(CameraBounds {
        min_x: r.f32()?,
        max_x: r.f32()?,
        min_y: r.f32()?,
        max_y: r.f32()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: Message) -> Message {
        let bytes = message.encode(11, 77);
        let (header, decoded) = Message::decode(&bytes, message.direction()).unwrap();
        assert_eq!(header.sequence_id, 11);
        assert_eq!(header.tick_id, 77);
        assert_eq!(header.message_type, message.message_type());
        decoded
    }

    #[test]
    fn handshake_messages_roundtrip() {
        assert_eq!(roundtrip(Message::ClientHello), Message::ClientHello);
        assert_eq!(
            roundtrip(Message::ServerJoinAccept { player_id: 3 }),
            Message::ServerJoinAccept { player_id: 3 }
        );
        assert_eq!(
            roundtrip(Message::ServerJoinDeny {
                reason: "game in progress".into()
            }),
            Message::ServerJoinDeny {
                reason: "game in progress".into()
            }
        );
    }

    #[test]
    fn input_roundtrip() {
        let input = Message::ClientInput(InputFrame {
            x: 0.5,
            y: -1.0,
            angle: 0.25,
            buttons: InputButtons::FIRE | InputButtons::CHARGE,
        });
        assert_eq!(roundtrip(input.clone()), input);
    }

    #[test]
    fn lobby_messages_roundtrip() {
        let list = Message::RoomList {
            rooms: vec![RoomInfo {
                room_id: 1,
                port: 50011,
                state: RoomState::Waiting,
                players: 2,
                capacity: 4,
                visibility: RoomVisibility::Private,
                room_type: RoomType::Ranked,
                difficulty: RoomDifficulty::Hard,
                name: "late night run".into(),
            }],
        };
        assert_eq!(roundtrip(list.clone()), list);

        let create = Message::CreateRoom(CreateRoom {
            name: "room".into(),
            capacity: 4,
            visibility: RoomVisibility::Public,
            room_type: RoomType::Quickplay,
            difficulty: RoomDifficulty::Normal,
            password_hash: "abc123".into(),
        });
        assert_eq!(roundtrip(create.clone()), create);
    }

    #[test]
    fn auth_messages_roundtrip() {
        let login = Message::LoginRequest {
            username: "ace".into(),
            password_hash: "deadbeef".into(),
        };
        assert_eq!(roundtrip(login.clone()), login);

        let stats = Message::GetStatsResponse {
            games_played: 12,
            games_won: 5,
            high_score: 99_000,
        };
        assert_eq!(roundtrip(stats.clone()), stats);
    }

    #[test]
    fn level_event_roundtrip() {
        for event in [
            LevelEventData::SetScroll { speed: 42.5 },
            LevelEventData::SetBackground { background_id: 2 },
            LevelEventData::SetMusic { music_id: 7 },
            LevelEventData::SetCameraBounds(CameraBounds {
                min_x: 0.0,
                max_x: 1920.0,
                min_y: 0.0,
                max_y: 1080.0,
            }),
            LevelEventData::GateOpen { gate_id: 3 },
            LevelEventData::GateClose { gate_id: 3 },
        ] {
            assert_eq!(
                roundtrip(Message::LevelEvent(event)),
                Message::LevelEvent(event)
            );
        }
    }

    #[test]
    fn reencode_preserves_payload_size() {
        let original = Message::Chat {
            message: "gg".into(),
        }
        .encode(1, 0);
        let (header, decoded) = Message::decode(&original, PacketDirection::ClientToServer).unwrap();
        let reencoded = decoded.encode(header.sequence_id, header.tick_id);
        assert_eq!(reencoded, original);
    }

    #[test]
    fn trailing_bytes_rejected() {
        // A Ping payload padded with an extra byte: the header is re-framed
        // so everything but the payload parse is valid.
        let mut w = ByteWriter::new();
        w.put_u64(123);
        w.put_u8(0);
        let framed = protocol::frame(
            PacketDirection::ClientToServer,
            MessageType::Ping,
            0,
            0,
            &w.into_vec(),
        );
        assert_eq!(
            Message::decode(&framed, PacketDirection::ClientToServer),
            Err(ParseError::LengthMismatch)
        );
    }

    #[test]
    fn direction_enforced_per_consumer() {
        let snapshot_as_client = Message::Snapshot(SnapshotPacket::new(5))
            .encode_as(PacketDirection::ClientToServer, 0, 5);
        // A server-originated type arriving at the server is refused.
        assert_eq!(
            Message::decode(&snapshot_as_client, PacketDirection::ServerToClient),
            Err(ParseError::WrongDirection)
        );
    }
}
