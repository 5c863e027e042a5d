//! AABB overlap detection and the damage/score routing it feeds.

use glam::Vec2;

use crate::components::{
    Bounty, EntityTag, Health, Hitbox, Invincibility, Projectile, Score, Tag, Transform,
};
use crate::ecs::{EntityId, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collision {
    pub a: EntityId,
    pub b: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageEvent {
    pub target: EntityId,
    pub amount: i32,
    /// Player entity credited with the hit, if any.
    pub credited_to: Option<EntityId>,
}

fn aabb(registry: &Registry, id: EntityId) -> Option<(Vec2, Vec2)> {
    let transform = registry.get::<Transform>(id)?;
    let hitbox = registry.get::<Hitbox>(id)?;
    let center = transform.pos + hitbox.offset;
    let half = Vec2::new(hitbox.w / 2.0, hitbox.h / 2.0);
    Some((center - half, center + half))
}

/// Pairwise overlap among entities carrying `Transform` + `Hitbox`.
pub fn detect_collisions(registry: &Registry) -> Vec<Collision> {
    let ids = registry.view2::<Transform, Hitbox>();
    let boxes: Vec<(EntityId, (Vec2, Vec2))> = ids
        .into_iter()
        .filter_map(|id| aabb(registry, id).map(|b| (id, b)))
        .collect();

    let mut collisions = Vec::new();
    for i in 0..boxes.len() {
        for j in (i + 1)..boxes.len() {
            let (a, (a_min, a_max)) = boxes[i];
            let (b, (b_min, b_max)) = boxes[j];
            let overlap = a_min.x <= b_max.x
                && a_max.x >= b_min.x
                && a_min.y <= b_max.y
                && a_max.y >= b_min.y;
            if overlap {
                collisions.push(Collision { a, b });
            }
        }
    }
    collisions
}

fn tag_of(registry: &Registry, id: EntityId) -> EntityTag {
    registry.get::<Tag>(id).map(|t| t.0).unwrap_or_default()
}

/// Routes collisions into health changes. Projectiles die on impact; the
/// caller reaps `current <= 0` afterwards so the lives policy stays with the
/// instance.
pub fn apply_damage(registry: &mut Registry, collisions: &[Collision]) -> Vec<DamageEvent> {
    let mut events = Vec::new();

    for &Collision { a, b } in collisions {
        if !registry.is_alive(a) || !registry.is_alive(b) {
            continue;
        }

        let tag_a = tag_of(registry, a);
        let tag_b = tag_of(registry, b);

        if tag_a.contains(EntityTag::PROJECTILE) {
            resolve_projectile(registry, a, b, tag_b, &mut events);
        } else if tag_b.contains(EntityTag::PROJECTILE) {
            resolve_projectile(registry, b, a, tag_a, &mut events);
        } else if tag_a.contains(EntityTag::PLAYER) && hurts_player(tag_b) {
            resolve_touch(registry, a, &mut events);
        } else if tag_b.contains(EntityTag::PLAYER) && hurts_player(tag_a) {
            resolve_touch(registry, b, &mut events);
        }
    }

    events
}

fn hurts_player(other: EntityTag) -> bool {
    other.contains(EntityTag::ENEMY) || other.contains(EntityTag::OBSTACLE)
}

fn resolve_projectile(
    registry: &mut Registry,
    projectile_id: EntityId,
    target: EntityId,
    target_tag: EntityTag,
    events: &mut Vec<DamageEvent>,
) {
    let Some(projectile) = registry.get::<Projectile>(projectile_id).copied() else {
        return;
    };

    let hits = if projectile.from_player {
        target_tag.contains(EntityTag::ENEMY) || target_tag.contains(EntityTag::OBSTACLE)
    } else {
        target_tag.contains(EntityTag::PLAYER)
    };
    if !hits {
        return;
    }

    if target_tag.contains(EntityTag::PLAYER) && registry.has::<Invincibility>(target) {
        registry.destroy_entity(projectile_id);
        return;
    }

    if let Some(health) = registry.get_mut::<Health>(target) {
        health.apply_damage(projectile.damage);
        events.push(DamageEvent {
            target,
            amount: projectile.damage,
            credited_to: projectile.from_player.then_some(projectile.owner),
        });
    }
    registry.destroy_entity(projectile_id);
}

fn resolve_touch(registry: &mut Registry, player: EntityId, events: &mut Vec<DamageEvent>) {
    if registry.has::<Invincibility>(player) {
        return;
    }
    if let Some(health) = registry.get_mut::<Health>(player) {
        health.apply_damage(1);
        events.push(DamageEvent {
            target: player,
            amount: 1,
            credited_to: None,
        });
    }
}

/// Pays bounties for kills recorded this tick, scaled by the room's
/// difficulty preset.
pub fn award_scores(registry: &mut Registry, events: &[DamageEvent], score_multiplier: f32) {
    for event in events {
        let Some(killer) = event.credited_to else {
            continue;
        };
        let dead = registry
            .get::<Health>(event.target)
            .is_some_and(Health::is_dead);
        if !dead {
            continue;
        }
        let bounty = registry
            .get::<Bounty>(event.target)
            .map_or(0, |bounty| bounty.0);
        if bounty <= 0 {
            continue;
        }
        if let Some(score) = registry.get_mut::<Score>(killer) {
            score.add((bounty as f32 * score_multiplier) as i32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Lives, RenderType, Velocity};
    use crate::simulation::systems::spawn_projectile;

    fn spawn_player(registry: &mut Registry, x: f32, y: f32) -> EntityId {
        let id = registry.create_entity();
        registry.emplace(id, Transform::at(x, y));
        registry.emplace(id, Velocity(Vec2::ZERO));
        registry.emplace(id, Tag(EntityTag::PLAYER));
        registry.emplace(id, Health::full(3));
        registry.emplace(id, Lives { current: 3, max: 3 });
        registry.emplace(id, Score(0));
        registry.emplace(id, Hitbox::centered(32.0, 16.0));
        registry.emplace(id, RenderType(1));
        id
    }

    fn spawn_enemy(registry: &mut Registry, x: f32, y: f32, health: i32) -> EntityId {
        let id = registry.create_entity();
        registry.emplace(id, Transform::at(x, y));
        registry.emplace(id, Tag(EntityTag::ENEMY));
        registry.emplace(id, Health::full(health));
        registry.emplace(id, Bounty(100));
        registry.emplace(id, Hitbox::centered(32.0, 32.0));
        id
    }

    #[test]
    fn detects_overlapping_boxes() {
        let mut registry = Registry::new();
        let a = spawn_player(&mut registry, 100.0, 100.0);
        let b = spawn_enemy(&mut registry, 110.0, 100.0, 2);
        spawn_enemy(&mut registry, 500.0, 500.0, 2);

        let collisions = detect_collisions(&registry);
        assert_eq!(collisions.len(), 1);
        let pair = collisions[0];
        assert!(pair.a == a && pair.b == b || pair.a == b && pair.b == a);
    }

    #[test]
    fn player_shot_damages_enemy_and_credits_owner() {
        let mut registry = Registry::new();
        let player = spawn_player(&mut registry, 0.0, 0.0);
        let enemy = spawn_enemy(&mut registry, 300.0, 0.0, 1);
        let shot = spawn_projectile(
            &mut registry,
            Vec2::new(300.0, 0.0),
            Vec2::ZERO,
            2,
            player,
            true,
        );

        let collisions = detect_collisions(&registry);
        let events = apply_damage(&mut registry, &collisions);

        assert!(!registry.is_alive(shot));
        assert!(registry.get::<Health>(enemy).unwrap().is_dead());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].credited_to, Some(player));

        award_scores(&mut registry, &events, 2.0);
        assert_eq!(registry.get::<Score>(player).unwrap().0, 200);
    }

    #[test]
    fn invincible_player_takes_no_touch_damage() {
        let mut registry = Registry::new();
        let player = spawn_player(&mut registry, 100.0, 100.0);
        registry.emplace(player, Invincibility::new(3.0));
        spawn_enemy(&mut registry, 105.0, 100.0, 2);

        let collisions = detect_collisions(&registry);
        let events = apply_damage(&mut registry, &collisions);
        assert!(events.is_empty());
        assert_eq!(registry.get::<Health>(player).unwrap().current, 3);
    }

    #[test]
    fn enemy_shot_ignores_enemies() {
        let mut registry = Registry::new();
        let enemy = spawn_enemy(&mut registry, 200.0, 0.0, 2);
        let other = spawn_enemy(&mut registry, 200.0, 10.0, 2);
        spawn_projectile(&mut registry, Vec2::new(200.0, 5.0), Vec2::ZERO, 3, enemy, false);

        let collisions = detect_collisions(&registry);
        let events = apply_damage(&mut registry, &collisions);
        assert!(events.is_empty());
        assert_eq!(registry.get::<Health>(other).unwrap().current, 2);
    }
}
