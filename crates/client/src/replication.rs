//! Applies parsed server state to the local entity store.
//!
//! Server entity ids are authoritative; the map here is strictly
//! remote→local. Spatial fields feed interpolation targets instead of
//! teleporting the transform; interpolation advances at render time using
//! the server tick rate to estimate segment duration.

use std::collections::HashMap;

use glam::Vec2;

use riptide::net::protocol::DEFAULT_TICK_RATE;
use riptide::{
    EntityId, EntitySpawn, Health, Interpolation, Lives, Registry, RenderType, Score,
    SnapshotEntity, Transform, UpdateMask, Velocity,
};

pub struct ClientReplication {
    registry: Registry,
    remote_to_local: HashMap<u32, EntityId>,
    snapshot_interval: f32,
}

impl Default for ClientReplication {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_RATE)
    }
}

impl ClientReplication {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            registry: Registry::new(),
            remote_to_local: HashMap::new(),
            snapshot_interval: 1.0 / tick_rate.max(1) as f32,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn local_id(&self, remote: u32) -> Option<EntityId> {
        self.remote_to_local.get(&remote).copied()
    }

    pub fn entity_count(&self) -> usize {
        self.registry.entity_count()
    }

    pub fn apply_spawn(&mut self, spawn: &EntitySpawn) {
        let local = self.ensure_local(spawn.entity_id);
        self.registry
            .emplace(local, Transform::at(spawn.pos_x, spawn.pos_y));
        self.registry.emplace(local, RenderType(spawn.entity_type));
        self.registry.emplace(
            local,
            Interpolation::snapped(Vec2::new(spawn.pos_x, spawn.pos_y)),
        );
    }

    pub fn apply_destroy(&mut self, remote: u32) {
        if let Some(local) = self.remote_to_local.remove(&remote) {
            self.registry.destroy_entity(local);
        }
    }

    pub fn apply_snapshot(&mut self, entities: &[SnapshotEntity]) {
        for entity in entities {
            self.apply_entity(entity);
        }
    }

    fn apply_entity(&mut self, entity: &SnapshotEntity) {
        if entity.mask.contains(UpdateMask::DEAD) && entity.dead {
            self.apply_destroy(entity.entity_id);
            return;
        }

        let known = self.remote_to_local.contains_key(&entity.entity_id);
        let local = self.ensure_local(entity.entity_id);

        if entity.mask.contains(UpdateMask::ENTITY_TYPE) {
            self.registry.emplace(local, RenderType(entity.entity_type));
        }

        self.apply_spatial(local, entity, known);

        if entity
            .mask
            .intersects(UpdateMask::VEL_X | UpdateMask::VEL_Y)
        {
            let mut velocity = self
                .registry
                .get::<Velocity>(local)
                .copied()
                .unwrap_or_default();
            if entity.mask.contains(UpdateMask::VEL_X) {
                velocity.0.x = entity.vel_x;
            }
            if entity.mask.contains(UpdateMask::VEL_Y) {
                velocity.0.y = entity.vel_y;
            }
            self.registry.emplace(local, velocity);
        }

        if entity.mask.contains(UpdateMask::HEALTH) {
            let current = entity.health as i32;
            // Max never shrinks below the best value we have seen.
            let max = self
                .registry
                .get::<Health>(local)
                .map_or(current, |h| h.max.max(current));
            self.registry.emplace(local, Health { current, max });
        }

        if entity.mask.contains(UpdateMask::STATUS_LIVES) {
            self.registry.emplace(
                local,
                Lives {
                    current: entity.lives,
                    max: self
                        .registry
                        .get::<Lives>(local)
                        .map_or(entity.lives, |l| l.max.max(entity.lives)),
                },
            );
        }

        if entity.mask.contains(UpdateMask::SCORE) {
            self.registry.emplace(local, Score(entity.score));
        }
    }

    fn apply_spatial(&mut self, local: EntityId, entity: &SnapshotEntity, known: bool) {
        let has_position = entity
            .mask
            .intersects(UpdateMask::POS_X | UpdateMask::POS_Y);

        if entity.mask.contains(UpdateMask::ORIENTATION) {
            if let Some(transform) = self.registry.get_mut::<Transform>(local) {
                transform.rotation = entity.orientation;
            }
        }

        if !has_position {
            return;
        }

        let current_target = self
            .registry
            .get::<Interpolation>(local)
            .map(|interp| interp.target)
            .unwrap_or_default();
        let target = Vec2::new(
            if entity.mask.contains(UpdateMask::POS_X) {
                entity.pos_x
            } else {
                current_target.x
            },
            if entity.mask.contains(UpdateMask::POS_Y) {
                entity.pos_y
            } else {
                current_target.y
            },
        );

        if known && self.registry.has::<Interpolation>(local) {
            if let Some(interp) = self.registry.get_mut::<Interpolation>(local) {
                interp.retarget(target);
            }
        } else {
            self.registry.emplace(local, Interpolation::snapped(target));
            if let Some(transform) = self.registry.get_mut::<Transform>(local) {
                transform.pos = target;
            }
        }
    }

    /// Render-time smoothing step: advance every interpolation state and
    /// write the sampled position into the transform the renderer reads.
    pub fn advance(&mut self, dt: f32) {
        let duration = self.snapshot_interval;
        for id in self.registry.view::<Interpolation>() {
            let Some(interp) = self.registry.get_mut::<Interpolation>(id) else {
                continue;
            };
            interp.elapsed += dt;
            let pos = interp.sample(duration);
            if let Some(transform) = self.registry.get_mut::<Transform>(id) {
                transform.pos = pos;
            }
        }
        self.registry.reclaim_ids();
    }

    pub fn clear(&mut self) {
        self.registry.clear();
        self.remote_to_local.clear();
    }

    fn ensure_local(&mut self, remote: u32) -> EntityId {
        if let Some(&local) = self.remote_to_local.get(&remote) {
            return local;
        }
        let local = self.registry.create_entity();
        self.registry.emplace(local, Transform::default());
        self.remote_to_local.insert(remote, local);
        local
    }
}
