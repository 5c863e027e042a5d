//! Server-side snapshot diffing.
//!
//! The engine mirrors the last values sent for every replicated entity and
//! emits only changed fields, with a periodic full snapshot to bound
//! divergence under loss. Comparison happens on wire-quantized values so
//! sub-precision jitter never retransmits.

use std::collections::HashMap;

use crate::components::{Health, Invincibility, Lives, RenderType, Score, Transform, Velocity};
use crate::ecs::{EntityId, Registry};
use crate::net::messages::EntitySpawn;
use crate::net::snapshot::{SnapshotEntity, SnapshotPacket, UpdateMask};
use crate::net::wire::{dequantize16, pack44, quantize16};

pub const DEFAULT_FULL_INTERVAL: u32 = 60;

/// Wire-space image of one entity, as last broadcast.
#[derive(Debug, Clone, Copy, PartialEq)]
struct MirrorRecord {
    available: UpdateMask,
    entity_type: u16,
    pos_x: i16,
    pos_y: i16,
    vel_x: i16,
    vel_y: i16,
    health: i16,
    status_lives: u8,
    orientation: f32,
    dead: bool,
    score: i32,
}

#[derive(Debug, Default)]
pub struct SyncResult {
    pub spawns: Vec<EntitySpawn>,
    pub destroys: Vec<EntityId>,
    pub packets: Vec<SnapshotPacket>,
    pub was_full: bool,
}

#[derive(Debug)]
pub struct ReplicationEngine {
    mirror: HashMap<EntityId, MirrorRecord>,
    full_interval: u32,
}

impl Default for ReplicationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_FULL_INTERVAL)
    }
}

impl ReplicationEngine {
    pub fn new(full_interval: u32) -> Self {
        Self {
            mirror: HashMap::new(),
            full_interval: full_interval.max(1),
        }
    }

    pub fn tracked_entities(&self) -> usize {
        self.mirror.len()
    }

    pub fn reset(&mut self) {
        self.mirror.clear();
    }

    /// One replication pass for `tick`. Spawn and destroy events are
    /// independent of the snapshot packets and must broadcast immediately.
    pub fn synchronize(&mut self, registry: &Registry, tick: u32) -> SyncResult {
        let force_full = tick % self.full_interval == 0;

        let mut result = SyncResult {
            was_full: force_full,
            ..Default::default()
        };

        let ids = registry.view::<Transform>();
        let mut seen: HashMap<EntityId, MirrorRecord> = HashMap::with_capacity(ids.len());
        let mut entities = Vec::new();

        for id in ids {
            let Some(record) = capture(registry, id) else {
                continue;
            };

            let mask = match self.mirror.get(&id) {
                None => {
                    result.spawns.push(EntitySpawn {
                        entity_id: id,
                        entity_type: record.entity_type,
                        pos_x: dequantize16(record.pos_x),
                        pos_y: dequantize16(record.pos_y),
                    });
                    record.available
                }
                Some(_) if force_full => record.available,
                Some(prev) => diff(prev, &record),
            };

            if !mask.is_empty() {
                entities.push(to_snapshot_entity(id, &record, mask));
            }
            seen.insert(id, record);
        }

        for (&id, _) in self.mirror.iter() {
            if !seen.contains_key(&id) {
                result.destroys.push(id);
            }
        }

        self.mirror = seen;

        if !entities.is_empty() {
            result.packets = SnapshotPacket::build(tick, entities);
        }
        result
    }
}

fn capture(registry: &Registry, id: EntityId) -> Option<MirrorRecord> {
    let transform = registry.get::<Transform>(id)?;

    let mut available = UpdateMask::POS_X | UpdateMask::POS_Y | UpdateMask::ORIENTATION;
    let mut record = MirrorRecord {
        available: UpdateMask::empty(),
        entity_type: 0,
        pos_x: quantize16(transform.pos.x),
        pos_y: quantize16(transform.pos.y),
        vel_x: 0,
        vel_y: 0,
        health: 0,
        status_lives: 0,
        orientation: transform.rotation,
        dead: false,
        score: 0,
    };

    if let Some(render) = registry.get::<RenderType>(id) {
        available |= UpdateMask::ENTITY_TYPE;
        record.entity_type = render.0;
    }
    if let Some(velocity) = registry.get::<Velocity>(id) {
        available |= UpdateMask::VEL_X | UpdateMask::VEL_Y;
        record.vel_x = quantize16(velocity.0.x);
        record.vel_y = quantize16(velocity.0.y);
    }
    if let Some(health) = registry.get::<Health>(id) {
        available |= UpdateMask::HEALTH | UpdateMask::DEAD;
        record.health = health.current.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        record.dead = health.is_dead();
    }

    let lives = registry.get::<Lives>(id);
    let invincible = registry.has::<Invincibility>(id);
    if lives.is_some() || invincible {
        available |= UpdateMask::STATUS_LIVES;
        let status = invincible as u8;
        record.status_lives = pack44(status, lives.map_or(0, |l| l.current));
    }
    if let Some(score) = registry.get::<Score>(id) {
        available |= UpdateMask::SCORE;
        record.score = score.0;
    }

    record.available = available;
    Some(record)
}

fn diff(prev: &MirrorRecord, cur: &MirrorRecord) -> UpdateMask {
    // Fields that became available count as changed.
    let mut mask = cur.available & !prev.available;

    let mut changed = |bit: UpdateMask, differs: bool| {
        if cur.available.contains(bit) && prev.available.contains(bit) && differs {
            mask |= bit;
        }
    };

    changed(UpdateMask::ENTITY_TYPE, prev.entity_type != cur.entity_type);
    changed(UpdateMask::POS_X, prev.pos_x != cur.pos_x);
    changed(UpdateMask::POS_Y, prev.pos_y != cur.pos_y);
    changed(UpdateMask::VEL_X, prev.vel_x != cur.vel_x);
    changed(UpdateMask::VEL_Y, prev.vel_y != cur.vel_y);
    changed(UpdateMask::HEALTH, prev.health != cur.health);
    changed(
        UpdateMask::STATUS_LIVES,
        prev.status_lives != cur.status_lives,
    );
    changed(
        UpdateMask::ORIENTATION,
        prev.orientation.to_bits() != cur.orientation.to_bits(),
    );
    changed(UpdateMask::DEAD, prev.dead != cur.dead);
    changed(UpdateMask::SCORE, prev.score != cur.score);

    mask
}

fn to_snapshot_entity(id: EntityId, record: &MirrorRecord, mask: UpdateMask) -> SnapshotEntity {
    let (status, lives) = crate::net::wire::unpack44(record.status_lives);
    SnapshotEntity {
        entity_id: id,
        mask,
        entity_type: record.entity_type,
        pos_x: dequantize16(record.pos_x),
        pos_y: dequantize16(record.pos_y),
        vel_x: dequantize16(record.vel_x),
        vel_y: dequantize16(record.vel_y),
        health: record.health,
        status_effects: status,
        lives,
        orientation: record.orientation,
        dead: record.dead,
        score: record.score,
    }
}
