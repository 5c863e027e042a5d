//! Request/response RPCs against the lobby port, with per-call deadlines
//! and a small retry budget.

use std::time::{Duration, Instant};

use riptide::{
    CreateRoom, IpEndpoint, Message, MessageType, PacketDirection, RoomInfo, TransportError,
    UdpTransport,
};

const LOOKUP_DEADLINE: Duration = Duration::from_millis(500);
const JOIN_DEADLINE: Duration = Duration::from_secs(5);
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("no reply from lobby after {0} attempts")]
    Timeout(u32),
    #[error("lobby refused: {0}")]
    Refused(String),
    #[error("authentication required")]
    AuthRequired,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct LobbyClient {
    transport: UdpTransport,
    lobby: IpEndpoint,
    seq: u16,
}

impl LobbyClient {
    pub fn connect(lobby: IpEndpoint) -> Result<Self, LobbyError> {
        Ok(Self {
            transport: UdpTransport::open(IpEndpoint::localhost(0))?,
            lobby,
            seq: 0,
        })
    }

    pub fn list_rooms(&mut self) -> Result<Vec<RoomInfo>, LobbyError> {
        match self.request(Message::ListRooms, &[MessageType::RoomList], LOOKUP_DEADLINE)? {
            Message::RoomList { rooms } => Ok(rooms),
            other => Err(unexpected(other)),
        }
    }

    pub fn login(&mut self, username: &str, password_hash: &str) -> Result<(), LobbyError> {
        let request = Message::LoginRequest {
            username: username.into(),
            password_hash: password_hash.into(),
        };
        match self.request(request, &[MessageType::LoginResponse], LOOKUP_DEADLINE)? {
            Message::LoginResponse { success: true, .. } => Ok(()),
            Message::LoginResponse { message, .. } => Err(LobbyError::Refused(message)),
            other => Err(unexpected(other)),
        }
    }

    pub fn register(&mut self, username: &str, password_hash: &str) -> Result<(), LobbyError> {
        let request = Message::RegisterRequest {
            username: username.into(),
            password_hash: password_hash.into(),
        };
        match self.request(request, &[MessageType::RegisterResponse], LOOKUP_DEADLINE)? {
            Message::RegisterResponse { success: true, .. } => Ok(()),
            Message::RegisterResponse { message, .. } => Err(LobbyError::Refused(message)),
            other => Err(unexpected(other)),
        }
    }

    pub fn create_room(&mut self, request: CreateRoom) -> Result<(u32, u16), LobbyError> {
        let reply = self.request(
            Message::CreateRoom(request),
            &[MessageType::RoomCreated, MessageType::JoinFailed],
            JOIN_DEADLINE,
        )?;
        match reply {
            Message::RoomCreated { room_id, port } => Ok((room_id, port)),
            Message::JoinFailed { reason } => Err(LobbyError::Refused(reason)),
            other => Err(unexpected(other)),
        }
    }

    pub fn join_room(
        &mut self,
        room_id: u32,
        password_hash: &str,
    ) -> Result<(u32, u16), LobbyError> {
        let request = Message::JoinRoom {
            room_id,
            password_hash: password_hash.into(),
        };
        let reply = self.request(
            request,
            &[MessageType::JoinSuccess, MessageType::JoinFailed],
            JOIN_DEADLINE,
        )?;
        match reply {
            Message::JoinSuccess { room_id, port } => Ok((room_id, port)),
            Message::JoinFailed { reason } => Err(LobbyError::Refused(reason)),
            other => Err(unexpected(other)),
        }
    }

    /// Sends and waits for one of `expect`, retrying the request on each
    /// deadline miss up to the attempt budget.
    fn request(
        &mut self,
        message: Message,
        expect: &[MessageType],
        deadline: Duration,
    ) -> Result<Message, LobbyError> {
        let mut buf = [0u8; 4096];
        for _ in 0..MAX_ATTEMPTS {
            let bytes = message.encode(self.seq, 0);
            self.seq = self.seq.wrapping_add(1);
            self.transport.send_to(&bytes, self.lobby)?;

            let until = Instant::now() + deadline;
            while Instant::now() < until {
                match self.transport.recv_from(&mut buf) {
                    Ok((size, from)) if from == self.lobby => {
                        let Ok((_, reply)) =
                            Message::decode(&buf[..size], PacketDirection::ServerToClient)
                        else {
                            continue;
                        };
                        if reply.message_type() == MessageType::AuthRequired {
                            return Err(LobbyError::AuthRequired);
                        }
                        if expect.contains(&reply.message_type()) {
                            return Ok(reply);
                        }
                    }
                    Ok(_) => {}
                    Err(e) if e.is_transient() => {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Err(LobbyError::Timeout(MAX_ATTEMPTS))
    }
}

fn unexpected(message: Message) -> LobbyError {
    LobbyError::Refused(format!("unexpected reply {:?}", message.message_type()))
}
