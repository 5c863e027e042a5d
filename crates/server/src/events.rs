use riptide::IpEndpoint;

/// Operator-visible happenings, drained by the TUI overlay or logged when
/// running headless.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    RoomCreated { room_id: u32, port: u16 },
    RoomDestroyed { room_id: u32 },
    ClientJoined { room_id: u32, endpoint: IpEndpoint },
    AuthFailure { endpoint: IpEndpoint },
}
