pub mod components;
pub mod concurrent;
pub mod ecs;
pub mod level;
pub mod net;
pub mod replication;
pub mod room;
pub mod session;
pub mod simulation;

pub use components::{
    Bounty, EntityTag, Health, Hitbox, Interpolation, Invincibility, Lives, PlayerInput,
    Projectile, RenderType, RespawnTimer, Score, Tag, Transform, Velocity,
};
pub use concurrent::WorkQueue;
pub use ecs::{EntityId, Registry};
pub use level::{LevelDirector, LevelScript, SpawnOrder, Wave};
pub use net::{
    CameraBounds, ChunkAssembler, CreateRoom, DEFAULT_LOBBY_PORT, DEFAULT_TICK_RATE, EntitySpawn,
    InputButtons, InputFrame, IpEndpoint, LevelEventData, LevelInit, Message, MessageType,
    NetworkStats, PacketDirection, PacketHeader, ParseError, PlayerEntry, RoomDifficulty,
    RoomInfo, RoomState, RoomType, RoomVisibility, SnapshotEntity, SnapshotPacket, TransportError,
    UdpTransport, UpdateMask,
};
pub use replication::{ReplicationEngine, SyncResult};
pub use room::{DifficultyPreset, Room, RoomCatalog};
pub use session::{ClientSession, DEFAULT_CLIENT_TIMEOUT, JoinOutcome, SessionState, SessionTable};
pub use simulation::{FixedTimestep, System, SystemSchedule};
