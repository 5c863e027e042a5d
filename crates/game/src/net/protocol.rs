//! Packet framing: fixed 16-byte header, payload, CRC-32 trailer.
//!
//! All integers are big-endian. The CRC covers every byte from the magic up
//! to but not including the trailer itself.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use super::crc::crc32;

pub const PROTOCOL_MAGIC: [u8; 2] = [0x52, 0x54]; // "RT"
pub const PROTOCOL_VERSION: u8 = 1;

pub const HEADER_SIZE: usize = 16;
pub const CRC_SIZE: usize = 4;

pub const ETHERNET_MTU: usize = 1500;
pub const IPV4_HEADER_SIZE: usize = 20;
pub const UDP_HEADER_SIZE: usize = 8;
pub const MAX_UDP_PAYLOAD: usize = ETHERNET_MTU - IPV4_HEADER_SIZE - UDP_HEADER_SIZE;
/// Largest packet payload that fits one datagram alongside header and CRC.
pub const SAFE_PAYLOAD: usize = MAX_UDP_PAYLOAD - HEADER_SIZE - CRC_SIZE;

/// Snapshot payloads above this size are worth a zlib pass.
pub const COMPRESS_THRESHOLD: usize = 512;

pub const DEFAULT_LOBBY_PORT: u16 = 50010;
pub const DEFAULT_TICK_RATE: u32 = 60;

pub const FLAG_COMPRESSED: u8 = 0b0000_0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketDirection {
    ClientToServer = 0,
    ServerToClient = 1,
}

impl TryFrom<u8> for PacketDirection {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, ParseError> {
        match value {
            0 => Ok(Self::ClientToServer),
            1 => Ok(Self::ServerToClient),
            _ => Err(ParseError::BadEnum("packetType", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ClientHello = 1,
    ServerHello = 2,
    ClientJoinRequest = 3,
    ServerJoinAccept = 4,
    ServerJoinDeny = 5,
    ClientReady = 6,
    Ping = 7,
    Pong = 8,
    ClientInput = 9,
    Snapshot = 10,
    SnapshotChunk = 11,
    EntitySpawn = 12,
    EntityDestroyed = 13,
    LevelInit = 14,
    LevelEvent = 15,
    GameStart = 16,
    GameEnd = 17,
    PlayerDisconnected = 18,
    ClientDisconnect = 19,
    CountdownTick = 20,

    ListRooms = 30,
    RoomList = 31,
    CreateRoom = 32,
    RoomCreated = 33,
    JoinRoom = 34,
    JoinSuccess = 35,
    JoinFailed = 36,
    LeaveRoom = 37,
    KickPlayer = 38,
    PlayerList = 39,
    ForceStart = 40,
    RoomGameStarting = 41,
    PlayerKicked = 42,
    Chat = 43,

    LoginRequest = 50,
    LoginResponse = 51,
    RegisterRequest = 52,
    RegisterResponse = 53,
    ChangePasswordRequest = 54,
    ChangePasswordResponse = 55,
    AuthRequired = 56,
    GetStatsRequest = 57,
    GetStatsResponse = 58,

    ServerBroadcast = 60,
    ServerDisconnect = 61,
}

impl TryFrom<u8> for MessageType {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, ParseError> {
        use MessageType::*;
        Ok(match value {
            1 => ClientHello,
            2 => ServerHello,
            3 => ClientJoinRequest,
            4 => ServerJoinAccept,
            5 => ServerJoinDeny,
            6 => ClientReady,
            7 => Ping,
            8 => Pong,
            9 => ClientInput,
            10 => Snapshot,
            11 => SnapshotChunk,
            12 => EntitySpawn,
            13 => EntityDestroyed,
            14 => LevelInit,
            15 => LevelEvent,
            16 => GameStart,
            17 => GameEnd,
            18 => PlayerDisconnected,
            19 => ClientDisconnect,
            20 => CountdownTick,
            30 => ListRooms,
            31 => RoomList,
            32 => CreateRoom,
            33 => RoomCreated,
            34 => JoinRoom,
            35 => JoinSuccess,
            36 => JoinFailed,
            37 => LeaveRoom,
            38 => KickPlayer,
            39 => PlayerList,
            40 => ForceStart,
            41 => RoomGameStarting,
            42 => PlayerKicked,
            43 => Chat,
            50 => LoginRequest,
            51 => LoginResponse,
            52 => RegisterRequest,
            53 => RegisterResponse,
            54 => ChangePasswordRequest,
            55 => ChangePasswordResponse,
            56 => AuthRequired,
            57 => GetStatsRequest,
            58 => GetStatsResponse,
            60 => ServerBroadcast,
            61 => ServerDisconnect,
            other => return Err(ParseError::UnknownMessageType(other)),
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("buffer shorter than header + crc")]
    TooShort,
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported protocol version {0}")]
    BadVersion(u8),
    #[error("payload size inconsistent with buffer length")]
    LengthMismatch,
    #[error("crc mismatch")]
    CrcMismatch,
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("packet direction contradicts receiver")]
    WrongDirection,
    #[error("field truncated")]
    Truncated,
    #[error("non-finite float on the wire")]
    NonFiniteFloat,
    #[error("invalid utf-8 string")]
    BadString,
    #[error("bad value {1} for {0}")]
    BadEnum(&'static str, u8),
    #[error("payload exceeds safe datagram budget")]
    OversizePayload,
    #[error("decompression failed")]
    Decompress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u8,
    pub direction: PacketDirection,
    pub message_type: MessageType,
    pub sequence_id: u16,
    pub tick_id: u32,
    pub payload_size: u16,
    pub original_size: u16,
    pub flags: u8,
}

impl PacketHeader {
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = PROTOCOL_MAGIC[0];
        out[1] = PROTOCOL_MAGIC[1];
        out[2] = self.version;
        out[3] = self.direction as u8;
        out[4] = self.message_type as u8;
        out[5..7].copy_from_slice(&self.sequence_id.to_be_bytes());
        out[7..11].copy_from_slice(&self.tick_id.to_be_bytes());
        out[11..13].copy_from_slice(&self.payload_size.to_be_bytes());
        out[13..15].copy_from_slice(&self.original_size.to_be_bytes());
        out[15] = self.flags;
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < HEADER_SIZE {
            return Err(ParseError::TooShort);
        }
        if data[0..2] != PROTOCOL_MAGIC {
            return Err(ParseError::BadMagic);
        }
        if data[2] != PROTOCOL_VERSION {
            return Err(ParseError::BadVersion(data[2]));
        }
        Ok(Self {
            version: data[2],
            direction: PacketDirection::try_from(data[3])?,
            message_type: MessageType::try_from(data[4])?,
            sequence_id: u16::from_be_bytes([data[5], data[6]]),
            tick_id: u32::from_be_bytes([data[7], data[8], data[9], data[10]]),
            payload_size: u16::from_be_bytes([data[11], data[12]]),
            original_size: u16::from_be_bytes([data[13], data[14]]),
            flags: data[15],
        })
    }
}

/// Frames `payload` into a complete datagram: header, payload, CRC trailer.
pub fn frame(
    direction: PacketDirection,
    message_type: MessageType,
    sequence_id: u16,
    tick_id: u32,
    payload: &[u8],
) -> Vec<u8> {
    frame_raw(
        direction,
        message_type,
        sequence_id,
        tick_id,
        payload,
        payload.len() as u16,
        0,
    )
}

/// Frames an already-compressed payload, recording the uncompressed size.
pub fn frame_compressed(
    direction: PacketDirection,
    message_type: MessageType,
    sequence_id: u16,
    tick_id: u32,
    payload: &[u8],
    original_size: u16,
) -> Vec<u8> {
    frame_raw(
        direction,
        message_type,
        sequence_id,
        tick_id,
        payload,
        original_size,
        FLAG_COMPRESSED,
    )
}

fn frame_raw(
    direction: PacketDirection,
    message_type: MessageType,
    sequence_id: u16,
    tick_id: u32,
    payload: &[u8],
    original_size: u16,
    flags: u8,
) -> Vec<u8> {
    debug_assert!(payload.len() <= SAFE_PAYLOAD);

    let header = PacketHeader {
        version: PROTOCOL_VERSION,
        direction,
        message_type,
        sequence_id,
        tick_id,
        payload_size: payload.len() as u16,
        original_size,
        flags,
    };

    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    let crc = crc32(&out);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

/// Validates framing and returns the header plus the (decompressed) payload.
///
/// `expected` is the direction the receiver consumes; a packet claiming the
/// other direction is rejected even when its CRC is intact.
pub fn unframe(data: &[u8], expected: PacketDirection) -> Result<(PacketHeader, Vec<u8>), ParseError> {
    if data.len() < HEADER_SIZE + CRC_SIZE {
        return Err(ParseError::TooShort);
    }

    let header = PacketHeader::decode(data)?;
    let payload_size = header.payload_size as usize;

    if payload_size > SAFE_PAYLOAD {
        return Err(ParseError::OversizePayload);
    }
    if data.len() != HEADER_SIZE + payload_size + CRC_SIZE {
        return Err(ParseError::LengthMismatch);
    }

    let crc_offset = HEADER_SIZE + payload_size;
    let transmitted = u32::from_be_bytes([
        data[crc_offset],
        data[crc_offset + 1],
        data[crc_offset + 2],
        data[crc_offset + 3],
    ]);
    if crc32(&data[..crc_offset]) != transmitted {
        return Err(ParseError::CrcMismatch);
    }

    if header.direction != expected {
        return Err(ParseError::WrongDirection);
    }

    let payload = &data[HEADER_SIZE..crc_offset];
    let payload = if header.is_compressed() {
        decompress(payload, header.original_size as usize)?
    } else {
        payload.to_vec()
    };

    Ok((header, payload))
}

pub fn compress(payload: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    // Writing into a Vec cannot fail.
    let _ = encoder.write_all(payload);
    encoder.finish().unwrap_or_default()
}

pub fn decompress(payload: &[u8], original_size: usize) -> Result<Vec<u8>, ParseError> {
    if original_size > u16::MAX as usize {
        return Err(ParseError::Decompress);
    }
    let mut out = Vec::with_capacity(original_size);
    let mut decoder = ZlibDecoder::new(payload).take(original_size as u64 + 1);
    decoder
        .read_to_end(&mut out)
        .map_err(|_| ParseError::Decompress)?;
    if out.len() != original_size {
        return Err(ParseError::Decompress);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let framed = frame(
            PacketDirection::ServerToClient,
            MessageType::Snapshot,
            7,
            1234,
            &[1, 2, 3],
        );
        let (header, payload) = unframe(&framed, PacketDirection::ServerToClient).unwrap();
        assert_eq!(header.message_type, MessageType::Snapshot);
        assert_eq!(header.sequence_id, 7);
        assert_eq!(header.tick_id, 1234);
        assert_eq!(header.payload_size, 3);
        assert_eq!(payload, vec![1, 2, 3]);
    }

    #[test]
    fn rejects_wrong_direction() {
        let framed = frame(
            PacketDirection::ServerToClient,
            MessageType::Snapshot,
            0,
            0,
            &[],
        );
        assert_eq!(
            unframe(&framed, PacketDirection::ClientToServer),
            Err(ParseError::WrongDirection)
        );
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut framed = frame(
            PacketDirection::ClientToServer,
            MessageType::Ping,
            0,
            0,
            &[],
        );
        framed[0] = 0x00;
        assert_eq!(
            unframe(&framed, PacketDirection::ClientToServer),
            Err(ParseError::BadMagic)
        );

        let mut framed = frame(
            PacketDirection::ClientToServer,
            MessageType::Ping,
            0,
            0,
            &[],
        );
        framed[2] = 9;
        assert_eq!(
            unframe(&framed, PacketDirection::ClientToServer),
            Err(ParseError::BadVersion(9))
        );
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut framed = frame(
            PacketDirection::ClientToServer,
            MessageType::Ping,
            0,
            0,
            &[0xAA; 8],
        );
        framed.push(0);
        assert_eq!(
            unframe(&framed, PacketDirection::ClientToServer),
            Err(ParseError::LengthMismatch)
        );
    }

    #[test]
    fn any_flipped_bit_fails_crc() {
        let framed = frame(
            PacketDirection::ServerToClient,
            MessageType::EntityDestroyed,
            3,
            99,
            &[5, 6, 7, 8],
        );
        let crc_offset = framed.len() - CRC_SIZE;
        for byte in 0..crc_offset {
            for bit in 0..8 {
                let mut corrupted = framed.clone();
                corrupted[byte] ^= 1 << bit;
                let result = unframe(&corrupted, PacketDirection::ServerToClient);
                assert!(result.is_err(), "bit {bit} of byte {byte} slipped through");
            }
        }
    }

    #[test]
    fn unknown_message_type_rejected() {
        let mut framed = frame(
            PacketDirection::ClientToServer,
            MessageType::Ping,
            0,
            0,
            &[],
        );
        framed[4] = 250;
        // Re-stamp the CRC so only the enum check can fail.
        let crc_offset = framed.len() - CRC_SIZE;
        let crc = crc32(&framed[..crc_offset]);
        framed[crc_offset..].copy_from_slice(&crc.to_be_bytes());
        assert_eq!(
            unframe(&framed, PacketDirection::ClientToServer),
            Err(ParseError::UnknownMessageType(250))
        );
    }

    #[test]
    fn compressed_payload_roundtrip() {
        let payload: Vec<u8> = std::iter::repeat_n(0xABu8, 900).collect();
        let compressed = compress(&payload);
        assert!(compressed.len() < payload.len());

        let framed = frame_compressed(
            PacketDirection::ServerToClient,
            MessageType::Snapshot,
            0,
            42,
            &compressed,
            payload.len() as u16,
        );
        let (header, decoded) = unframe(&framed, PacketDirection::ServerToClient).unwrap();
        assert!(header.is_compressed());
        assert_eq!(header.original_size as usize, payload.len());
        assert_eq!(decoded, payload);
    }

    #[test]
    fn truncated_compressed_stream_rejected() {
        let payload = vec![7u8; 600];
        let compressed = compress(&payload);
        let framed = frame_compressed(
            PacketDirection::ServerToClient,
            MessageType::Snapshot,
            0,
            0,
            &compressed[..compressed.len() / 2],
            payload.len() as u16,
        );
        assert_eq!(
            unframe(&framed, PacketDirection::ServerToClient),
            Err(ParseError::Decompress)
        );
    }
}
