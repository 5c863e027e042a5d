pub mod crc;
pub mod endpoint;
pub mod messages;
pub mod protocol;
pub mod snapshot;
pub mod stats;
pub mod transport;
pub mod wire;

pub use endpoint::IpEndpoint;
pub use messages::{
    CameraBounds, CreateRoom, EntitySpawn, InputButtons, InputFrame, LevelEventData, LevelInit,
    Message, PlayerEntry, RoomDifficulty, RoomInfo, RoomState, RoomType, RoomVisibility,
};
pub use protocol::{
    DEFAULT_LOBBY_PORT, DEFAULT_TICK_RATE, HEADER_SIZE, MessageType, PacketDirection,
    PacketHeader, ParseError, SAFE_PAYLOAD,
};
pub use snapshot::{ChunkAssembler, SnapshotEntity, SnapshotPacket, UpdateMask};
pub use stats::NetworkStats;
pub use transport::{TransportError, UdpTransport};
