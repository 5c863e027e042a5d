pub mod collision;
pub mod systems;

use std::panic::{self, AssertUnwindSafe};

use crate::ecs::Registry;

pub use collision::{Collision, DamageEvent, apply_damage, award_scores, detect_collisions};
pub use systems::{
    BoundarySystem, CleanupSystem, EnemyMovementSystem, EnemyShootingSystem,
    InvincibilitySystem, MovementSystem, PlayerInputSystem, RespawnTimerSystem,
};

/// One simulation stage. Systems run in a fixed order each tick and never
/// reach back into the scheduler.
pub trait System {
    fn name(&self) -> &'static str;
    fn update(&mut self, registry: &mut Registry, dt: f32);
}

/// Ordered system list. A panicking system loses only its own work for the
/// tick; the frame still goes on to replicate.
pub struct SystemSchedule {
    systems: Vec<Box<dyn System + Send>>,
}

impl Default for SystemSchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSchedule {
    pub fn new() -> Self {
        Self {
            systems: Vec::new(),
        }
    }

    pub fn push(&mut self, system: Box<dyn System + Send>) {
        self.systems.push(system);
    }

    pub fn run(&mut self, registry: &mut Registry, dt: f32) {
        for system in &mut self.systems {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                system.update(registry, dt);
            }));
            if outcome.is_err() {
                log::error!("[Sim] system {} panicked; skipping for this tick", system.name());
            }
        }
    }
}

/// Accumulator-driven fixed timestep used by the client-side loop; the
/// server's tick thread sleeps on a monotonic deadline instead.
pub struct FixedTimestep {
    tick_rate: u32,
    dt: f32,
    accumulator: f32,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick_rate,
            dt: 1.0 / tick_rate as f32,
            accumulator: 0.0,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn accumulate(&mut self, delta: f32) {
        // A hitch never produces more than a quarter second of catch-up.
        self.accumulator += delta.min(0.25);
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    pub fn alpha(&self) -> f32 {
        self.accumulator / self.dt
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}
