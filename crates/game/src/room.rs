//! Lobby-side room model. A room exists iff its game instance exists iff its
//! port is bound; the catalog is the lobby's view and is refreshed from the
//! instances on every cleanup pass.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::net::messages::{RoomDifficulty, RoomInfo, RoomState, RoomType, RoomVisibility};

/// Gameplay multipliers selected by the room's difficulty preset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifficultyPreset {
    pub enemy_health: f32,
    pub enemy_speed: f32,
    pub score: f32,
}

impl DifficultyPreset {
    pub fn of(difficulty: RoomDifficulty) -> Self {
        match difficulty {
            RoomDifficulty::Easy => Self {
                enemy_health: 0.75,
                enemy_speed: 0.8,
                score: 0.5,
            },
            RoomDifficulty::Normal => Self {
                enemy_health: 1.0,
                enemy_speed: 1.0,
                score: 1.0,
            },
            RoomDifficulty::Hard => Self {
                enemy_health: 1.5,
                enemy_speed: 1.25,
                score: 2.0,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_id: u32,
    pub port: u16,
    pub capacity: u8,
    pub players: u8,
    pub state: RoomState,
    pub owner: u32,
    pub name: String,
    pub password_hash: Option<String>,
    pub visibility: RoomVisibility,
    pub room_type: RoomType,
    pub difficulty: RoomDifficulty,
}

impl Room {
    pub fn new(room_id: u32, port: u16, capacity: u8) -> Self {
        Self {
            room_id,
            port,
            capacity,
            players: 0,
            state: RoomState::Waiting,
            owner: 0,
            name: format!("Room {room_id}"),
            password_hash: None,
            visibility: RoomVisibility::Public,
            room_type: RoomType::Quickplay,
            difficulty: RoomDifficulty::Normal,
        }
    }

    pub fn is_full(&self) -> bool {
        self.players >= self.capacity
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    /// Password-protected rooms require a matching hash at join time.
    pub fn password_matches(&self, provided: &str) -> bool {
        match &self.password_hash {
            None => true,
            Some(required) => required == provided,
        }
    }

    pub fn preset(&self) -> DifficultyPreset {
        DifficultyPreset::of(self.difficulty)
    }

    pub fn to_info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.room_id,
            port: self.port,
            state: self.state,
            players: self.players,
            capacity: self.capacity,
            visibility: self.visibility,
            room_type: self.room_type,
            difficulty: self.difficulty,
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RoomCatalog {
    rooms: HashMap<u32, Room>,
}

impl RoomCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, room: Room) {
        self.rooms.insert(room.room_id, room);
    }

    pub fn remove(&mut self, room_id: u32) -> Option<Room> {
        self.rooms.remove(&room_id)
    }

    pub fn get(&self, room_id: u32) -> Option<&Room> {
        self.rooms.get(&room_id)
    }

    pub fn get_mut(&mut self, room_id: u32) -> Option<&mut Room> {
        self.rooms.get_mut(&room_id)
    }

    pub fn ids(&self) -> Vec<u32> {
        self.rooms.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Every room, private ones included; the operator view uses this.
    pub fn list_all(&self) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self.rooms.values().map(Room::to_info).collect();
        rooms.sort_by_key(|room| room.room_id);
        rooms
    }

    /// What `ListRooms` answers with: public rooms only.
    pub fn list_public(&self) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self
            .rooms
            .values()
            .filter(|room| room.visibility == RoomVisibility::Public)
            .map(Room::to_info)
            .collect();
        rooms.sort_by_key(|room| room.room_id);
        rooms
    }

    pub fn update_players(&mut self, room_id: u32, players: u8) {
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.players = players;
        }
    }

    pub fn update_state(&mut self, room_id: u32, state: RoomState) {
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.state = state;
        }
    }

    /// Drops catalog rows whose instance no longer exists.
    pub fn retain_existing(&mut self, alive: &[u32]) -> Vec<u32> {
        let mut removed = Vec::new();
        self.rooms.retain(|&id, _| {
            let keep = alive.contains(&id);
            if !keep {
                removed.push(id);
            }
            keep
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_check() {
        let mut room = Room::new(1, 50011, 4);
        assert!(room.password_matches(""));

        room.password_hash = Some("cafe01".into());
        assert!(room.password_matches("cafe01"));
        assert!(!room.password_matches("wrong"));
    }

    #[test]
    fn catalog_lists_public_rooms_sorted() {
        let mut catalog = RoomCatalog::new();
        let mut hidden = Room::new(2, 50012, 4);
        hidden.visibility = RoomVisibility::Private;
        catalog.add(hidden);
        catalog.add(Room::new(3, 50013, 4));
        catalog.add(Room::new(1, 50011, 4));

        let listed = catalog.list_public();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].room_id, 1);
        assert_eq!(listed[1].room_id, 3);
    }

    #[test]
    fn orphan_rows_removed() {
        let mut catalog = RoomCatalog::new();
        catalog.add(Room::new(1, 50011, 4));
        catalog.add(Room::new(2, 50012, 4));

        let removed = catalog.retain_existing(&[2]);
        assert_eq!(removed, vec![1]);
        assert!(catalog.get(1).is_none());
        assert!(catalog.get(2).is_some());
    }

    #[test]
    fn difficulty_presets_scale() {
        let hard = DifficultyPreset::of(RoomDifficulty::Hard);
        let easy = DifficultyPreset::of(RoomDifficulty::Easy);
        assert!(hard.enemy_health > easy.enemy_health);
        assert!(hard.score > easy.score);
    }
}
