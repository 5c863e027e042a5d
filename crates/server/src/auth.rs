//! Account storage behind the lobby's authentication gate.
//!
//! Password hashing itself happens client-side; this layer only compares
//! and stores the opaque hashes it is handed. The trait is the seam a real
//! credential service would slot into.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("unknown user")]
    UnknownUser,
    #[error("wrong password")]
    WrongPassword,
    #[error("user already exists")]
    UserExists,
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PlayerStats {
    pub games_played: u32,
    pub games_won: u32,
    pub high_score: u32,
}

pub trait AuthService: Send + Sync {
    fn login(&self, username: &str, password_hash: &str) -> Result<(), AuthError>;
    fn register(&self, username: &str, password_hash: &str) -> Result<(), AuthError>;
    fn change_password(
        &self,
        username: &str,
        old_hash: &str,
        new_hash: &str,
    ) -> Result<(), AuthError>;
    fn stats(&self, username: &str) -> Result<PlayerStats, AuthError>;
    fn record_result(&self, username: &str, won: bool, score: u32) -> Result<(), AuthError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Store {
    users: HashMap<String, UserRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    password_hash: String,
    #[serde(default)]
    stats: PlayerStats,
}

/// Accounts persisted to one JSON file, written through on every mutation.
pub struct JsonAuthService {
    path: PathBuf,
    store: Mutex<Store>,
}

impl JsonAuthService {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref().to_path_buf();
        let store = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| AuthError::Storage(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Store::default(),
            Err(e) => return Err(AuthError::Storage(e.to_string())),
        };
        Ok(Self {
            path,
            store: Mutex::new(store),
        })
    }

    fn persist(&self, store: &Store) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| AuthError::Storage(e.to_string()))?;
        }
        let json =
            serde_json::to_string_pretty(store).map_err(|e| AuthError::Storage(e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| AuthError::Storage(e.to_string()))
    }
}

impl AuthService for JsonAuthService {
    fn login(&self, username: &str, password_hash: &str) -> Result<(), AuthError> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let user = store.users.get(username).ok_or(AuthError::UnknownUser)?;
        if user.password_hash != password_hash {
            return Err(AuthError::WrongPassword);
        }
        Ok(())
    }

    fn register(&self, username: &str, password_hash: &str) -> Result<(), AuthError> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        if store.users.contains_key(username) {
            return Err(AuthError::UserExists);
        }
        store.users.insert(
            username.to_string(),
            UserRecord {
                password_hash: password_hash.to_string(),
                stats: PlayerStats::default(),
            },
        );
        self.persist(&store)
    }

    fn change_password(
        &self,
        username: &str,
        old_hash: &str,
        new_hash: &str,
    ) -> Result<(), AuthError> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let user = store
            .users
            .get_mut(username)
            .ok_or(AuthError::UnknownUser)?;
        if user.password_hash != old_hash {
            return Err(AuthError::WrongPassword);
        }
        user.password_hash = new_hash.to_string();
        self.persist(&store)
    }

    fn stats(&self, username: &str) -> Result<PlayerStats, AuthError> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store
            .users
            .get(username)
            .map(|user| user.stats)
            .ok_or(AuthError::UnknownUser)
    }

    fn record_result(&self, username: &str, won: bool, score: u32) -> Result<(), AuthError> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let user = store
            .users
            .get_mut(username)
            .ok_or(AuthError::UnknownUser)?;
        user.stats.games_played += 1;
        if won {
            user.stats.games_won += 1;
        }
        user.stats.high_score = user.stats.high_score.max(score);
        self.persist(&store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("riptide-auth-{name}-{}", std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn register_then_login() {
        let path = temp_store("login");
        let auth = JsonAuthService::open(&path).unwrap();

        auth.register("ace", "hash1").unwrap();
        assert_eq!(auth.register("ace", "hash1"), Err(AuthError::UserExists));
        assert_eq!(auth.login("ace", "hash1"), Ok(()));
        assert_eq!(auth.login("ace", "bad"), Err(AuthError::WrongPassword));
        assert_eq!(auth.login("ghost", "hash1"), Err(AuthError::UnknownUser));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn change_password_requires_old_hash() {
        let path = temp_store("change");
        let auth = JsonAuthService::open(&path).unwrap();

        auth.register("ace", "old").unwrap();
        assert_eq!(
            auth.change_password("ace", "wrong", "new"),
            Err(AuthError::WrongPassword)
        );
        auth.change_password("ace", "old", "new").unwrap();
        assert_eq!(auth.login("ace", "new"), Ok(()));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn stats_survive_reopen() {
        let path = temp_store("persist");
        {
            let auth = JsonAuthService::open(&path).unwrap();
            auth.register("ace", "h").unwrap();
            auth.record_result("ace", true, 4200).unwrap();
            auth.record_result("ace", false, 900).unwrap();
        }

        let auth = JsonAuthService::open(&path).unwrap();
        let stats = auth.stats("ace").unwrap();
        assert_eq!(stats.games_played, 2);
        assert_eq!(stats.games_won, 1);
        assert_eq!(stats.high_score, 4200);

        let _ = fs::remove_file(path);
    }
}
