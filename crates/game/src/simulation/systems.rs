//! The fixed-order simulation stages an instance runs each tick.

use std::collections::HashMap;

use glam::Vec2;

use crate::components::{
    EntityTag, Health, Hitbox, Invincibility, PlayerInput, Projectile, RenderType, RespawnTimer,
    Tag, Transform, Velocity,
};
use crate::ecs::{EntityId, Registry};
use crate::net::messages::{CameraBounds, InputButtons};

use super::System;

pub const PLAYER_SPEED: f32 = 250.0;
pub const PLAYER_FIRE_COOLDOWN: f32 = 0.25;
pub const PLAYER_PROJECTILE_SPEED: f32 = 500.0;
pub const ENEMY_PROJECTILE_SPEED: f32 = 300.0;
pub const PROJECTILE_LIFETIME: f32 = 2.5;
pub const PROJECTILE_RENDER_TYPE: u16 = 2;
pub const ENEMY_PROJECTILE_RENDER_TYPE: u16 = 3;

/// Despawn margin outside the play area for transients.
const OFFSCREEN_MARGIN: f32 = 100.0;

/// Applies buffered `PlayerInput` to ship velocity and spawns player shots.
pub struct PlayerInputSystem {
    speed: f32,
    cooldowns: HashMap<EntityId, f32>,
}

impl PlayerInputSystem {
    pub fn new() -> Self {
        Self {
            speed: PLAYER_SPEED,
            cooldowns: HashMap::new(),
        }
    }
}

impl Default for PlayerInputSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for PlayerInputSystem {
    fn name(&self) -> &'static str {
        "player_input"
    }

    fn update(&mut self, registry: &mut Registry, dt: f32) {
        for cooldown in self.cooldowns.values_mut() {
            *cooldown -= dt;
        }

        for id in registry.view2::<Transform, PlayerInput>() {
            let Some(input) = registry.get::<PlayerInput>(id).copied() else {
                continue;
            };

            let steer = Vec2::new(input.x, input.y).clamp_length_max(1.0);
            registry.emplace(id, Velocity(steer * self.speed));
            if let Some(transform) = registry.get_mut::<Transform>(id) {
                transform.rotation = input.angle;
            }

            let buttons = InputButtons::from_bits_truncate(input.buttons);
            let ready = self.cooldowns.get(&id).copied().unwrap_or(0.0) <= 0.0;
            if buttons.contains(InputButtons::FIRE) && ready {
                self.cooldowns.insert(id, PLAYER_FIRE_COOLDOWN);
                if let Some(pos) = registry.get::<Transform>(id).map(|t| t.pos) {
                    spawn_projectile(
                        registry,
                        pos + Vec2::new(40.0, 0.0),
                        Vec2::new(PLAYER_PROJECTILE_SPEED, 0.0),
                        PROJECTILE_RENDER_TYPE,
                        id,
                        true,
                    );
                }
            }
        }

        self.cooldowns.retain(|&id, _| registry.is_alive(id));
    }
}

pub fn spawn_projectile(
    registry: &mut Registry,
    pos: Vec2,
    vel: Vec2,
    render_type: u16,
    owner: EntityId,
    from_player: bool,
) -> EntityId {
    let id = registry.create_entity();
    registry.emplace(
        id,
        Transform {
            pos,
            rotation: 0.0,
            scale: 1.0,
        },
    );
    registry.emplace(id, Velocity(vel));
    registry.emplace(id, Tag(EntityTag::PROJECTILE));
    registry.emplace(id, RenderType(render_type));
    registry.emplace(id, Hitbox::centered(16.0, 8.0));
    registry.emplace(
        id,
        Projectile {
            lifetime: PROJECTILE_LIFETIME,
            damage: 1,
            owner,
            from_player,
        },
    );
    id
}

/// Integrates velocity into position.
pub struct MovementSystem;

impl System for MovementSystem {
    fn name(&self) -> &'static str {
        "movement"
    }

    fn update(&mut self, registry: &mut Registry, dt: f32) {
        for id in registry.view2::<Transform, Velocity>() {
            let Some(velocity) = registry.get::<Velocity>(id).copied() else {
                continue;
            };
            if let Some(transform) = registry.get_mut::<Transform>(id) {
                transform.pos += velocity.0 * dt;
            }
        }
    }
}

/// Keeps player ships inside the camera bounds.
pub struct BoundarySystem {
    bounds: CameraBounds,
}

impl BoundarySystem {
    pub fn new(bounds: CameraBounds) -> Self {
        Self { bounds }
    }

    pub fn set_bounds(&mut self, bounds: CameraBounds) {
        self.bounds = bounds;
    }
}

impl System for BoundarySystem {
    fn name(&self) -> &'static str {
        "boundary"
    }

    fn update(&mut self, registry: &mut Registry, _dt: f32) {
        for id in registry.view2::<Transform, Tag>() {
            let is_player = registry
                .get::<Tag>(id)
                .is_some_and(|tag| tag.has(EntityTag::PLAYER));
            if !is_player {
                continue;
            }
            if let Some(transform) = registry.get_mut::<Transform>(id) {
                transform.pos.x = transform.pos.x.clamp(self.bounds.min_x, self.bounds.max_x);
                transform.pos.y = transform.pos.y.clamp(self.bounds.min_y, self.bounds.max_y);
            }
        }
    }
}

/// Gives enemies their vertical weave on top of the scripted drift.
pub struct EnemyMovementSystem {
    time: f32,
    amplitude: f32,
    frequency: f32,
}

impl EnemyMovementSystem {
    pub fn new() -> Self {
        Self {
            time: 0.0,
            amplitude: 60.0,
            frequency: 1.5,
        }
    }
}

impl Default for EnemyMovementSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for EnemyMovementSystem {
    fn name(&self) -> &'static str {
        "enemy_movement"
    }

    fn update(&mut self, registry: &mut Registry, dt: f32) {
        self.time += dt;
        for id in registry.view2::<Velocity, Tag>() {
            let is_enemy = registry
                .get::<Tag>(id)
                .is_some_and(|tag| tag.has(EntityTag::ENEMY));
            if !is_enemy {
                continue;
            }
            let phase = self.time * self.frequency + id as f32 * 0.7;
            if let Some(velocity) = registry.get_mut::<Velocity>(id) {
                velocity.0.y = phase.sin() * self.amplitude;
            }
        }
    }
}

/// Periodic enemy fire toward the left edge.
pub struct EnemyShootingSystem {
    interval: f32,
    timer: f32,
}

impl EnemyShootingSystem {
    pub fn new(interval: f32) -> Self {
        Self {
            interval,
            timer: 0.0,
        }
    }
}

impl System for EnemyShootingSystem {
    fn name(&self) -> &'static str {
        "enemy_shooting"
    }

    fn update(&mut self, registry: &mut Registry, dt: f32) {
        self.timer += dt;
        if self.timer < self.interval {
            return;
        }
        self.timer = 0.0;

        for id in registry.view2::<Transform, Tag>() {
            let is_enemy = registry
                .get::<Tag>(id)
                .is_some_and(|tag| tag.has(EntityTag::ENEMY));
            if !is_enemy {
                continue;
            }
            if let Some(pos) = registry.get::<Transform>(id).map(|t| t.pos) {
                spawn_projectile(
                    registry,
                    pos - Vec2::new(40.0, 0.0),
                    Vec2::new(-ENEMY_PROJECTILE_SPEED, 0.0),
                    ENEMY_PROJECTILE_RENDER_TYPE,
                    id,
                    false,
                );
            }
        }
    }
}

/// Counts down respawn timers; expired timers are handled by the instance,
/// which owns the respawn placement and its broadcasts.
pub struct RespawnTimerSystem;

impl System for RespawnTimerSystem {
    fn name(&self) -> &'static str {
        "respawn_timer"
    }

    fn update(&mut self, registry: &mut Registry, dt: f32) {
        for id in registry.view::<RespawnTimer>() {
            if let Some(timer) = registry.get_mut::<RespawnTimer>(id) {
                timer.remaining -= dt;
            }
        }
    }
}

/// Counts down invincibility and removes it once spent.
pub struct InvincibilitySystem;

impl System for InvincibilitySystem {
    fn name(&self) -> &'static str {
        "invincibility"
    }

    fn update(&mut self, registry: &mut Registry, dt: f32) {
        let mut expired = Vec::new();
        for id in registry.view::<Invincibility>() {
            if let Some(invincibility) = registry.get_mut::<Invincibility>(id) {
                invincibility.remaining -= dt;
                invincibility.blink_phase += dt * 10.0;
                if invincibility.remaining <= 0.0 {
                    expired.push(id);
                }
            }
        }
        for id in expired {
            registry.remove::<Invincibility>(id);
        }
    }
}

/// Destroys expired projectiles and off-screen transients. The replication
/// mirror notices the disappearance and broadcasts `EntityDestroyed`.
pub struct CleanupSystem {
    bounds: CameraBounds,
}

impl CleanupSystem {
    pub fn new(bounds: CameraBounds) -> Self {
        Self { bounds }
    }
}

impl System for CleanupSystem {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn update(&mut self, registry: &mut Registry, dt: f32) {
        let mut doomed = Vec::new();

        for id in registry.view::<Projectile>() {
            if let Some(projectile) = registry.get_mut::<Projectile>(id) {
                projectile.lifetime -= dt;
                if projectile.lifetime <= 0.0 {
                    doomed.push(id);
                }
            }
        }

        for id in registry.view2::<Transform, Tag>() {
            let transient = registry
                .get::<Tag>(id)
                .is_some_and(|tag| tag.has(EntityTag::ENEMY) || tag.has(EntityTag::PROJECTILE));
            if !transient {
                continue;
            }
            let Some(pos) = registry.get::<Transform>(id).map(|t| t.pos) else {
                continue;
            };
            if pos.x < self.bounds.min_x - OFFSCREEN_MARGIN
                || pos.x > self.bounds.max_x + OFFSCREEN_MARGIN
            {
                doomed.push(id);
            }
        }

        if !doomed.is_empty() {
            log::debug!("[Sim] cleaning up {} transient entity(ies)", doomed.len());
        }
        for id in doomed {
            registry.destroy_entity(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> CameraBounds {
        CameraBounds {
            min_x: 0.0,
            max_x: 1920.0,
            min_y: 0.0,
            max_y: 1080.0,
        }
    }

    fn spawn_player(registry: &mut Registry, x: f32, y: f32) -> EntityId {
        let id = registry.create_entity();
        registry.emplace(id, Transform::at(x, y));
        registry.emplace(id, Velocity(Vec2::ZERO));
        registry.emplace(id, Tag(EntityTag::PLAYER));
        registry.emplace(id, Health::full(1));
        id
    }

    #[test]
    fn input_drives_velocity_and_fire() {
        let mut registry = Registry::new();
        let id = spawn_player(&mut registry, 100.0, 400.0);
        registry.emplace(
            id,
            PlayerInput {
                x: 1.0,
                y: 0.0,
                angle: 0.0,
                buttons: InputButtons::FIRE.bits(),
                sequence_id: 1,
            },
        );

        let mut system = PlayerInputSystem::new();
        system.update(&mut registry, 1.0 / 60.0);

        assert_eq!(
            registry.get::<Velocity>(id).unwrap().0,
            Vec2::new(PLAYER_SPEED, 0.0)
        );
        assert_eq!(registry.view::<Projectile>().len(), 1);

        // Cooldown gates the second shot.
        system.update(&mut registry, 1.0 / 60.0);
        assert_eq!(registry.view::<Projectile>().len(), 1);
    }

    #[test]
    fn movement_integrates_velocity() {
        let mut registry = Registry::new();
        let id = spawn_player(&mut registry, 0.0, 0.0);
        registry.emplace(id, Velocity(Vec2::new(60.0, -30.0)));

        MovementSystem.update(&mut registry, 0.5);
        let transform = registry.get::<Transform>(id).unwrap();
        assert_eq!(transform.pos, Vec2::new(30.0, -15.0));
    }

    #[test]
    fn boundary_clamps_players_only() {
        let mut registry = Registry::new();
        let player = spawn_player(&mut registry, -50.0, 2000.0);
        let enemy = registry.create_entity();
        registry.emplace(enemy, Transform::at(-50.0, 0.0));
        registry.emplace(enemy, Tag(EntityTag::ENEMY));

        BoundarySystem::new(bounds()).update(&mut registry, 0.0);
        assert_eq!(registry.get::<Transform>(player).unwrap().pos, Vec2::new(0.0, 1080.0));
        assert_eq!(registry.get::<Transform>(enemy).unwrap().pos.x, -50.0);
    }

    #[test]
    fn invincibility_expires() {
        let mut registry = Registry::new();
        let id = spawn_player(&mut registry, 0.0, 0.0);
        registry.emplace(id, Invincibility::new(0.05));

        let mut system = InvincibilitySystem;
        system.update(&mut registry, 0.04);
        assert!(registry.has::<Invincibility>(id));
        system.update(&mut registry, 0.02);
        assert!(!registry.has::<Invincibility>(id));
    }

    #[test]
    fn cleanup_reaps_offscreen_and_expired() {
        let mut registry = Registry::new();
        let offscreen = registry.create_entity();
        registry.emplace(offscreen, Transform::at(2100.0, 100.0));
        registry.emplace(offscreen, Tag(EntityTag::ENEMY));

        let shot = spawn_projectile(
            &mut registry,
            Vec2::new(500.0, 500.0),
            Vec2::ZERO,
            PROJECTILE_RENDER_TYPE,
            0,
            true,
        );

        let mut cleanup = CleanupSystem::new(bounds());
        cleanup.update(&mut registry, PROJECTILE_LIFETIME + 0.1);

        assert!(!registry.is_alive(offscreen));
        assert!(!registry.is_alive(shot));
    }
}
