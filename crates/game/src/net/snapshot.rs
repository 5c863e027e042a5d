//! Mask-driven snapshot entity codec, MTU-aware chunking and per-tick
//! reassembly.
//!
//! Each entity serializes as `entityId(4) | mask(2) | fields…` where the
//! mask bits select fields in a fixed order. Positions and velocities are
//! quantized to `i16` at 10 units per world unit; status effects and lives
//! share one byte as two nibbles; bit 9 stays reserved.

use std::collections::HashMap;

use bitflags::bitflags;

use super::protocol::{
    self, COMPRESS_THRESHOLD, MessageType, PacketDirection, ParseError, SAFE_PAYLOAD,
};
use super::wire::{ByteReader, ByteWriter, dequantize16, pack44, quantize16, unpack44};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UpdateMask: u16 {
        const ENTITY_TYPE = 1 << 0;
        const POS_X = 1 << 1;
        const POS_Y = 1 << 2;
        const VEL_X = 1 << 3;
        const VEL_Y = 1 << 4;
        const HEALTH = 1 << 5;
        const STATUS_LIVES = 1 << 6;
        const ORIENTATION = 1 << 7;
        const DEAD = 1 << 8;
        const SCORE = 1 << 10;
    }
}

impl UpdateMask {
    pub const ALL_FIELDS: UpdateMask = UpdateMask::all();
}

/// One replicated entity as it appears inside a snapshot payload. Fields not
/// selected by `mask` hold their defaults and never reach the wire.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SnapshotEntity {
    pub entity_id: u32,
    pub mask: UpdateMask,
    pub entity_type: u16,
    pub pos_x: f32,
    pub pos_y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub health: i16,
    pub status_effects: u8,
    pub lives: u8,
    pub orientation: f32,
    pub dead: bool,
    pub score: i32,
}

impl SnapshotEntity {
    pub fn new(entity_id: u32) -> Self {
        Self {
            entity_id,
            ..Default::default()
        }
    }

    /// Encoded size in bytes, driven by the mask.
    pub fn encoded_size(&self) -> usize {
        let mut size = 4 + 2;
        if self.mask.contains(UpdateMask::ENTITY_TYPE) {
            size += 2;
        }
        for bit in [
            UpdateMask::POS_X,
            UpdateMask::POS_Y,
            UpdateMask::VEL_X,
            UpdateMask::VEL_Y,
            UpdateMask::HEALTH,
        ] {
            if self.mask.contains(bit) {
                size += 2;
            }
        }
        if self.mask.contains(UpdateMask::STATUS_LIVES) {
            size += 1;
        }
        if self.mask.contains(UpdateMask::ORIENTATION) {
            size += 4;
        }
        if self.mask.contains(UpdateMask::DEAD) {
            size += 1;
        }
        if self.mask.contains(UpdateMask::SCORE) {
            size += 4;
        }
        size
    }

    fn write(&self, w: &mut ByteWriter) {
        w.put_u32(self.entity_id);
        w.put_u16(self.mask.bits());
        if self.mask.contains(UpdateMask::ENTITY_TYPE) {
            w.put_u16(self.entity_type);
        }
        if self.mask.contains(UpdateMask::POS_X) {
            w.put_i16(quantize16(self.pos_x));
        }
        if self.mask.contains(UpdateMask::POS_Y) {
            w.put_i16(quantize16(self.pos_y));
        }
        if self.mask.contains(UpdateMask::VEL_X) {
            w.put_i16(quantize16(self.vel_x));
        }
        if self.mask.contains(UpdateMask::VEL_Y) {
            w.put_i16(quantize16(self.vel_y));
        }
        if self.mask.contains(UpdateMask::HEALTH) {
            w.put_i16(self.health);
        }
        if self.mask.contains(UpdateMask::STATUS_LIVES) {
            w.put_u8(pack44(self.status_effects, self.lives));
        }
        if self.mask.contains(UpdateMask::ORIENTATION) {
            w.put_f32(self.orientation);
        }
        if self.mask.contains(UpdateMask::DEAD) {
            w.put_u8(self.dead as u8);
        }
        if self.mask.contains(UpdateMask::SCORE) {
            w.put_i32(self.score);
        }
    }

    fn read(r: &mut ByteReader<'_>) -> Result<Self, ParseError> {
        let entity_id = r.u32()?;
        let mask = UpdateMask::from_bits_truncate(r.u16()?);
        let mut entity = SnapshotEntity::new(entity_id);
        entity.mask = mask;

        if mask.contains(UpdateMask::ENTITY_TYPE) {
            entity.entity_type = r.u16()?;
        }
        if mask.contains(UpdateMask::POS_X) {
            entity.pos_x = dequantize16(r.i16()?);
        }
        if mask.contains(UpdateMask::POS_Y) {
            entity.pos_y = dequantize16(r.i16()?);
        }
        if mask.contains(UpdateMask::VEL_X) {
            entity.vel_x = dequantize16(r.i16()?);
        }
        if mask.contains(UpdateMask::VEL_Y) {
            entity.vel_y = dequantize16(r.i16()?);
        }
        if mask.contains(UpdateMask::HEALTH) {
            entity.health = r.i16()?;
        }
        if mask.contains(UpdateMask::STATUS_LIVES) {
            let (status, lives) = unpack44(r.u8()?);
            entity.status_effects = status;
            entity.lives = lives;
        }
        if mask.contains(UpdateMask::ORIENTATION) {
            entity.orientation = r.f32()?;
        }
        if mask.contains(UpdateMask::DEAD) {
            entity.dead = r.u8()? != 0;
        }
        if mask.contains(UpdateMask::SCORE) {
            entity.score = r.i32()?;
        }
        Ok(entity)
    }
}

/// A snapshot or snapshot chunk before framing. `chunk_count == 1` frames as
/// a plain `Snapshot`; anything else frames as a `SnapshotChunk`.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPacket {
    pub tick_id: u32,
    pub chunk_index: u8,
    pub chunk_count: u8,
    pub entities: Vec<SnapshotEntity>,
}

impl SnapshotPacket {
    pub fn new(tick_id: u32) -> Self {
        Self {
            tick_id,
            chunk_index: 0,
            chunk_count: 1,
            entities: Vec::new(),
        }
    }

    pub fn is_chunked(&self) -> bool {
        self.chunk_count > 1
    }

    pub(crate) fn write_payload(&self, w: &mut ByteWriter, chunked: bool) {
        if chunked {
            w.put_u8(self.chunk_index);
            w.put_u8(self.chunk_count);
        }
        w.put_u16(self.entities.len().min(u16::MAX as usize) as u16);
        for entity in self.entities.iter().take(u16::MAX as usize) {
            entity.write(w);
        }
    }

    pub(crate) fn read_payload(
        r: &mut ByteReader<'_>,
        chunked: bool,
    ) -> Result<Self, ParseError> {
        let (chunk_index, chunk_count) = if chunked {
            let index = r.u8()?;
            let count = r.u8()?;
            if count == 0 || index >= count {
                return Err(ParseError::BadEnum("chunkIndex", index));
            }
            (index, count)
        } else {
            (0, 1)
        };

        let count = r.u16()? as usize;
        let mut entities = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            entities.push(SnapshotEntity::read(r)?);
        }
        Ok(Self {
            tick_id: 0,
            chunk_index,
            chunk_count,
            entities,
        })
    }

    /// Frames this packet into a complete datagram. `sequence_id` carries
    /// the receiver's highest input sequence (the reconciliation echo), so
    /// one packet body is framed once per destination client.
    pub fn to_datagram(&self, sequence_id: u16) -> Vec<u8> {
        let mut w = ByteWriter::new();
        let chunked = self.is_chunked();
        self.write_payload(&mut w, chunked);
        let payload = w.into_vec();

        let message_type = if chunked {
            MessageType::SnapshotChunk
        } else {
            MessageType::Snapshot
        };

        // Chunks already fit the budget; only whole snapshots compress.
        if !chunked && payload.len() > COMPRESS_THRESHOLD {
            let compressed = protocol::compress(&payload);
            if compressed.len() < payload.len() && compressed.len() <= SAFE_PAYLOAD {
                return protocol::frame_compressed(
                    PacketDirection::ServerToClient,
                    message_type,
                    sequence_id,
                    self.tick_id,
                    &compressed,
                    payload.len() as u16,
                );
            }
        }

        debug_assert!(payload.len() <= SAFE_PAYLOAD);
        protocol::frame(
            PacketDirection::ServerToClient,
            message_type,
            sequence_id,
            self.tick_id,
            &payload,
        )
    }

    /// Splits `entities` into as few packets as fit the safe payload budget.
    pub fn build(tick_id: u32, entities: Vec<SnapshotEntity>) -> Vec<SnapshotPacket> {
        const SINGLE_OVERHEAD: usize = 2;
        const CHUNK_OVERHEAD: usize = 2 + 2;

        let total: usize = entities.iter().map(SnapshotEntity::encoded_size).sum();
        if SINGLE_OVERHEAD + total <= SAFE_PAYLOAD {
            let mut packet = SnapshotPacket::new(tick_id);
            packet.entities = entities;
            return vec![packet];
        }

        let mut groups: Vec<Vec<SnapshotEntity>> = Vec::new();
        let mut current: Vec<SnapshotEntity> = Vec::new();
        let mut current_size = CHUNK_OVERHEAD;
        for entity in entities {
            let size = entity.encoded_size();
            if current_size + size > SAFE_PAYLOAD && !current.is_empty() {
                groups.push(std::mem::take(&mut current));
                current_size = CHUNK_OVERHEAD;
            }
            current_size += size;
            current.push(entity);
        }
        if !current.is_empty() {
            groups.push(current);
        }

        let count = groups.len().min(u8::MAX as usize) as u8;
        groups
            .into_iter()
            .take(count as usize)
            .enumerate()
            .map(|(index, entities)| SnapshotPacket {
                tick_id,
                chunk_index: index as u8,
                chunk_count: count,
                entities,
            })
            .collect()
    }
}

/// Per-tick chunk reassembly. Chunks of the newest tick accumulate until the
/// set is complete; anything older than the last released tick is dropped.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    pending: HashMap<u32, Vec<Option<Vec<SnapshotEntity>>>>,
    last_released: Option<u32>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk; returns the full entity set once every index of the
    /// chunk's tick has arrived.
    pub fn push(&mut self, packet: SnapshotPacket) -> Option<(u32, Vec<SnapshotEntity>)> {
        let tick = packet.tick_id;
        if let Some(last) = self.last_released {
            if tick <= last {
                return None;
            }
        }

        if !packet.is_chunked() {
            self.release(tick);
            return Some((tick, packet.entities));
        }

        let slots = self
            .pending
            .entry(tick)
            .or_insert_with(|| vec![None; packet.chunk_count as usize]);
        if slots.len() != packet.chunk_count as usize {
            // Chunk count disagrees with an earlier chunk of the same tick;
            // start the tick over with the new shape.
            *slots = vec![None; packet.chunk_count as usize];
        }
        slots[packet.chunk_index as usize] = Some(packet.entities);

        if slots.iter().all(Option::is_some) {
            let slots = self.pending.remove(&tick)?;
            self.release(tick);
            let mut entities = Vec::new();
            for slot in slots {
                entities.extend(slot.unwrap_or_default());
            }
            return Some((tick, entities));
        }
        None
    }

    fn release(&mut self, tick: u32) {
        self.last_released = Some(tick);
        self.pending.retain(|&t, _| t > tick);
    }
}
