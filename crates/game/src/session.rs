//! Per-endpoint handshake state, keyed by the endpoint's dotted-string form.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ecs::EntityId;
use crate::net::IpEndpoint;

pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Hello,
    Joined,
    Ready,
    Playing,
}

#[derive(Debug, Clone)]
pub struct ClientSession {
    pub endpoint: IpEndpoint,
    pub player_id: u32,
    pub hello: bool,
    pub joined: bool,
    pub ready: bool,
    pub started: bool,
    pub level_sent: bool,
    pub last_seen: Instant,
    pub user: Option<String>,
    pub entity: Option<EntityId>,
    pub last_input_sequence: u16,
}

impl ClientSession {
    fn new(endpoint: IpEndpoint, player_id: u32) -> Self {
        Self {
            endpoint,
            player_id,
            hello: false,
            joined: false,
            ready: false,
            started: false,
            level_sent: false,
            last_seen: Instant::now(),
            user: None,
            entity: None,
            last_input_sequence: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.started {
            SessionState::Playing
        } else if self.ready {
            SessionState::Ready
        } else if self.joined {
            SessionState::Joined
        } else if self.hello {
            SessionState::Hello
        } else {
            SessionState::Connected
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Records an input sequence; the highest value seen is echoed back in
    /// snapshot headers.
    pub fn record_input_sequence(&mut self, sequence: u16) {
        if sequence > self.last_input_sequence {
            self.last_input_sequence = sequence;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Accepted { player_id: u32 },
    Denied { reason: String },
}

#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<String, ClientSession>,
    next_player_id: u32,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            next_player_id: 1,
        }
    }

    /// Fetches or creates the session for `endpoint`. Sessions exist from
    /// the first packet a new endpoint sends, whatever that packet is.
    pub fn ensure(&mut self, endpoint: IpEndpoint) -> &mut ClientSession {
        let key = endpoint.key();
        if !self.sessions.contains_key(&key) {
            let player_id = self.next_player_id;
            self.next_player_id += 1;
            self.sessions
                .insert(key.clone(), ClientSession::new(endpoint, player_id));
        }
        self.sessions.get_mut(&key).expect("session just inserted")
    }

    /// Duplicate hellos keep the one session; the caller replies each time.
    pub fn hello(&mut self, endpoint: IpEndpoint) -> &mut ClientSession {
        let session = self.ensure(endpoint);
        session.hello = true;
        session.touch();
        session
    }

    pub fn join(&mut self, endpoint: IpEndpoint, game_started: bool) -> JoinOutcome {
        if game_started {
            return JoinOutcome::Denied {
                reason: "game in progress".into(),
            };
        }
        let session = self.ensure(endpoint);
        session.joined = true;
        session.touch();
        JoinOutcome::Accepted {
            player_id: session.player_id,
        }
    }

    pub fn ready(&mut self, endpoint: IpEndpoint) -> bool {
        let session = self.ensure(endpoint);
        if session.joined {
            session.ready = true;
        }
        session.touch();
        session.ready
    }

    /// Start gate: every session completed hello, join and ready.
    pub fn all_ready(&self) -> bool {
        !self.sessions.is_empty()
            && self
                .sessions
                .values()
                .all(|s| s.hello && s.joined && s.ready)
    }

    pub fn mark_started(&mut self) {
        for session in self.sessions.values_mut() {
            session.started = true;
        }
    }

    pub fn get(&self, key: &str) -> Option<&ClientSession> {
        self.sessions.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ClientSession> {
        self.sessions.get_mut(key)
    }

    pub fn by_player_id(&self, player_id: u32) -> Option<&ClientSession> {
        self.sessions.values().find(|s| s.player_id == player_id)
    }

    pub fn remove(&mut self, key: &str) -> Option<ClientSession> {
        self.sessions.remove(key)
    }

    pub fn touch(&mut self, key: &str) {
        if let Some(session) = self.sessions.get_mut(key) {
            session.touch();
        }
    }

    /// Keys of sessions silent for longer than `timeout`.
    pub fn timed_out(&self, timeout: Duration) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|(_, s)| s.last_seen.elapsed() > timeout)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn endpoints(&self) -> Vec<IpEndpoint> {
        self.sessions.values().map(|s| s.endpoint).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientSession> {
        self.sessions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientSession> {
        self.sessions.values_mut()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(port: u16) -> IpEndpoint {
        IpEndpoint::localhost(port)
    }

    #[test]
    fn duplicate_hello_keeps_one_session() {
        let mut table = SessionTable::new();
        let first = table.hello(ep(1000)).player_id;
        let second = table.hello(ep(1000)).player_id;
        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn player_ids_are_monotone_per_endpoint() {
        let mut table = SessionTable::new();
        let a = table.hello(ep(1000)).player_id;
        let b = table.hello(ep(1001)).player_id;
        assert!(b > a);
    }

    #[test]
    fn join_denied_while_playing() {
        let mut table = SessionTable::new();
        table.hello(ep(1000));
        assert!(matches!(
            table.join(ep(1000), false),
            JoinOutcome::Accepted { .. }
        ));
        table.ready(ep(1000));
        table.mark_started();

        assert!(matches!(
            table.join(ep(2000), true),
            JoinOutcome::Denied { .. }
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn start_gate_requires_full_handshake() {
        let mut table = SessionTable::new();
        assert!(!table.all_ready());

        table.hello(ep(1000));
        table.join(ep(1000), false);
        assert!(!table.all_ready());
        table.ready(ep(1000));
        assert!(table.all_ready());

        table.hello(ep(1001));
        assert!(!table.all_ready());
    }

    #[test]
    fn ready_requires_join() {
        let mut table = SessionTable::new();
        table.hello(ep(1000));
        assert!(!table.ready(ep(1000)));
    }

    #[test]
    fn input_sequence_echo_is_monotone() {
        let mut table = SessionTable::new();
        let session = table.hello(ep(1000));
        session.record_input_sequence(5);
        session.record_input_sequence(3);
        assert_eq!(session.last_input_sequence, 5);
    }

    #[test]
    fn timeout_sweep_flags_silent_sessions() {
        let mut table = SessionTable::new();
        table.hello(ep(1000));
        assert!(table.timed_out(Duration::from_secs(30)).is_empty());
        assert_eq!(table.timed_out(Duration::ZERO).len(), 1);
    }
}
