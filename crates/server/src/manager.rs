//! Room allocation under a cap, with deterministic ports and empty-room GC.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use riptide::{DifficultyPreset, RoomDifficulty};

use crate::config::ServerConfig;
use crate::instance::{InstanceHandle, spawn_instance};

pub struct InstanceManager {
    config: ServerConfig,
    global_running: Arc<AtomicBool>,
    inner: Mutex<ManagerInner>,
}

struct ManagerInner {
    instances: HashMap<u32, InstanceHandle>,
    /// Consecutive cleanup sweeps each room has been observed empty.
    empty_streak: HashMap<u32, u32>,
    next_room_id: u32,
}

impl InstanceManager {
    pub fn new(config: ServerConfig, global_running: Arc<AtomicBool>) -> Self {
        Self {
            config,
            global_running,
            inner: Mutex::new(ManagerInner {
                instances: HashMap::new(),
                empty_streak: HashMap::new(),
                next_room_id: 0,
            }),
        }
    }

    /// `roomId → port` is deterministic: `game_base_port + roomId`.
    pub fn port_for(&self, room_id: u32) -> u16 {
        self.config.game_base_port.wrapping_add(room_id as u16)
    }

    /// Allocates a room and boots its instance. `None` when the cap is hit
    /// or the port cannot be bound.
    pub fn create(&self, difficulty: RoomDifficulty) -> Option<(u32, u16)> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.instances.len() >= self.config.max_instances as usize {
            log::warn!("[Manager] create refused: {} instances running", inner.instances.len());
            return None;
        }

        inner.next_room_id += 1;
        let room_id = inner.next_room_id;
        let port = self.port_for(room_id);

        match spawn_instance(
            room_id,
            port,
            &self.config,
            DifficultyPreset::of(difficulty),
            Arc::clone(&self.global_running),
        ) {
            Ok(handle) => {
                let port = handle.port();
                inner.instances.insert(room_id, handle);
                Some((room_id, port))
            }
            Err(e) => {
                log::error!("[Manager] failed to bind room {room_id} on port {port}: {e}");
                None
            }
        }
    }

    pub fn destroy(&self, room_id: u32, reason: &str) -> bool {
        let handle = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.empty_streak.remove(&room_id);
            inner.instances.remove(&room_id)
        };
        // Joining instance threads happens outside the map lock.
        match handle {
            Some(mut handle) => {
                handle.shutdown(reason);
                log::info!("[Manager] destroyed room {room_id}");
                true
            }
            None => false,
        }
    }

    pub fn has(&self, room_id: u32) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .instances
            .contains_key(&room_id)
    }

    pub fn all(&self) -> Vec<u32> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .instances
            .keys()
            .copied()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .instances
            .len()
    }

    /// Snapshot of `(roomId, port, playerCount, started)` for the catalog.
    pub fn statuses(&self) -> Vec<(u32, u16, usize, bool)> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .instances
            .iter()
            .map(|(&id, handle)| (id, handle.port(), handle.player_count(), handle.is_started()))
            .collect()
    }

    pub fn port_of(&self, room_id: u32) -> Option<u16> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .instances
            .get(&room_id)
            .map(|handle| handle.port())
    }

    pub fn broadcast(&self, message: &str) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for handle in inner.instances.values() {
            handle.broadcast(message.to_string());
        }
    }

    pub fn kick(&self, room_id: u32, player_id: u32) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.instances.get(&room_id) {
            Some(handle) => {
                handle.kick(player_id);
                true
            }
            None => false,
        }
    }

    /// Destroys instances observed empty on two consecutive sweeps; one
    /// sweep of grace covers clients still mid-handshake.
    pub fn cleanup_empty(&self) -> Vec<u32> {
        let doomed: Vec<u32> = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let mut doomed = Vec::new();
            let ids: Vec<u32> = inner.instances.keys().copied().collect();
            for id in ids {
                let empty = inner
                    .instances
                    .get(&id)
                    .is_some_and(|handle| handle.player_count() == 0);
                if empty {
                    let streak = inner.empty_streak.entry(id).or_insert(0);
                    *streak += 1;
                    if *streak >= 2 {
                        doomed.push(id);
                    }
                } else {
                    inner.empty_streak.insert(id, 0);
                }
            }
            doomed
        };

        for &id in &doomed {
            self.destroy(id, "room closed: empty");
        }
        doomed
    }

    pub fn shutdown_all(&self, reason: &str) {
        let ids = self.all();
        for id in ids {
            self.destroy(id, reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(max: u32) -> InstanceManager {
        let config = ServerConfig {
            // Ephemeral base keeps parallel test runs from colliding; the
            // mapping stays base + roomId via the bound handle.
            game_base_port: 0,
            max_instances: max,
            ..Default::default()
        };
        InstanceManager::new(config, Arc::new(AtomicBool::new(true)))
    }

    #[test]
    fn create_assigns_monotone_room_ids() {
        let manager = manager(4);
        let (a, _) = manager.create(RoomDifficulty::Normal).unwrap();
        let (b, _) = manager.create(RoomDifficulty::Normal).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(manager.count(), 2);
        manager.shutdown_all("test over");
    }

    #[test]
    fn cap_refuses_creation() {
        let manager = manager(1);
        assert!(manager.create(RoomDifficulty::Normal).is_some());
        assert!(manager.create(RoomDifficulty::Normal).is_none());
        manager.shutdown_all("test over");
    }

    #[test]
    fn port_mapping_is_deterministic() {
        let config = ServerConfig::default();
        let manager = InstanceManager::new(config.clone(), Arc::new(AtomicBool::new(true)));
        assert_eq!(manager.port_for(3), config.game_base_port + 3);
        assert_eq!(manager.port_for(7), config.game_base_port + 7);
    }

    #[test]
    fn cleanup_law_two_sweeps() {
        let manager = manager(4);
        let (room_id, _) = manager.create(RoomDifficulty::Normal).unwrap();

        // First sweep observes empty, second destroys.
        assert!(manager.cleanup_empty().is_empty());
        assert_eq!(manager.cleanup_empty(), vec![room_id]);
        assert!(!manager.has(room_id));

        // The id never comes back.
        let (next, _) = manager.create(RoomDifficulty::Normal).unwrap();
        assert_ne!(next, room_id);
        manager.shutdown_all("test over");
    }

    #[test]
    fn destroy_unknown_room_is_false() {
        let manager = manager(2);
        assert!(!manager.destroy(99, "nope"));
    }
}
