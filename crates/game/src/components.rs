//! Component catalog. Only a subset replicates (see `replication`); Hitbox
//! and Projectile are simulation-only, Interpolation is client-only.

use bitflags::bitflags;
use glam::Vec2;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntityTag: u8 {
        const PLAYER = 1 << 0;
        const ENEMY = 1 << 1;
        const PROJECTILE = 1 << 2;
        const OBSTACLE = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub pos: Vec2,
    pub rotation: f32,
    pub scale: f32,
}

impl Transform {
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            pos: Vec2::new(x, y),
            rotation: 0.0,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Velocity(pub Vec2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub current: i32,
    pub max: i32,
}

impl Health {
    pub fn full(max: i32) -> Self {
        Self { current: max, max }
    }

    pub fn is_dead(&self) -> bool {
        self.current <= 0
    }

    pub fn apply_damage(&mut self, amount: i32) {
        self.current = (self.current - amount).min(self.max);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tag(pub EntityTag);

impl Tag {
    pub fn has(&self, tag: EntityTag) -> bool {
        self.0.contains(tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lives {
    pub current: u8,
    pub max: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Score(pub i32);

impl Score {
    /// Score never goes down; negative deltas are ignored.
    pub fn add(&mut self, delta: i32) {
        if delta > 0 {
            self.0 = self.0.saturating_add(delta);
        }
    }
}

/// 16-bit key selecting the client-side visual archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderType(pub u16);

/// Score paid out to the killer when this entity dies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounty(pub i32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Invincibility {
    pub remaining: f32,
    pub blink_phase: f32,
}

impl Invincibility {
    pub fn new(seconds: f32) -> Self {
        Self {
            remaining: seconds,
            blink_phase: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RespawnTimer {
    pub remaining: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerInput {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub buttons: u16,
    pub sequence_id: u16,
}

/// Axis-aligned collision box; `offset` shifts the box from the transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hitbox {
    pub w: f32,
    pub h: f32,
    pub offset: Vec2,
}

impl Hitbox {
    pub fn centered(w: f32, h: f32) -> Self {
        Self {
            w,
            h,
            offset: Vec2::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projectile {
    pub lifetime: f32,
    pub damage: i32,
    /// Entity that fired the shot; kills credit its score.
    pub owner: u32,
    pub from_player: bool,
}

/// Client-only render smoothing state; `elapsed` runs from 0 to the
/// estimated snapshot interval.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Interpolation {
    pub previous: Vec2,
    pub target: Vec2,
    pub elapsed: f32,
    pub velocity: Vec2,
}

impl Interpolation {
    pub fn snapped(pos: Vec2) -> Self {
        Self {
            previous: pos,
            target: pos,
            elapsed: 0.0,
            velocity: Vec2::ZERO,
        }
    }

    pub fn retarget(&mut self, pos: Vec2) {
        self.previous = self.target;
        self.target = pos;
        self.elapsed = 0.0;
    }

    pub fn sample(&self, duration: f32) -> Vec2 {
        if duration <= f32::EPSILON {
            return self.target;
        }
        let t = (self.elapsed / duration).clamp(0.0, 1.0);
        self.previous.lerp(self.target, t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_death_threshold() {
        let mut health = Health::full(3);
        health.apply_damage(2);
        assert!(!health.is_dead());
        health.apply_damage(1);
        assert!(health.is_dead());
    }

    #[test]
    fn score_is_monotone() {
        let mut score = Score::default();
        score.add(100);
        score.add(-50);
        assert_eq!(score.0, 100);
    }

    #[test]
    fn interpolation_lerps_between_targets() {
        let mut interp = Interpolation::snapped(Vec2::new(10.0, 0.0));
        interp.retarget(Vec2::new(20.0, 0.0));
        interp.elapsed = 0.5;
        let mid = interp.sample(1.0);
        assert!((mid.x - 15.0).abs() < 1e-4);
    }
}
