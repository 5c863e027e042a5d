use std::io;
use std::net::UdpSocket;

use super::endpoint::IpEndpoint;

/// Error taxonomy every socket operation collapses into. Workers retry on
/// `WouldBlock`/`Interrupted` and treat everything else per policy.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("operation would block")]
    WouldBlock,
    #[error("operation interrupted")]
    Interrupted,
    #[error("address already in use")]
    AddressInUse,
    #[error("socket closed")]
    Closed,
    #[error("socket error: {0}")]
    Other(io::Error),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WouldBlock | Self::Interrupted)
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => Self::WouldBlock,
            io::ErrorKind::Interrupted => Self::Interrupted,
            io::ErrorKind::AddrInUse => Self::AddressInUse,
            io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe => Self::Closed,
            _ => Self::Other(err),
        }
    }
}

/// Thin non-blocking datagram socket. One transport per instance; the lobby
/// shares its transport only between its own receive and send paths.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local: IpEndpoint,
}

impl UdpTransport {
    /// Binds `bind` and switches to non-blocking mode. Binding port 0 picks
    /// an ephemeral port, observable through `local_endpoint`.
    pub fn open(bind: IpEndpoint) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(bind.to_socket_addr())?;
        socket.set_nonblocking(true)?;

        let local = IpEndpoint::from_socket_addr(socket.local_addr()?)
            .ok_or(TransportError::Closed)?;

        Ok(Self { socket, local })
    }

    pub fn local_endpoint(&self) -> IpEndpoint {
        self.local
    }

    pub fn send_to(&self, data: &[u8], to: IpEndpoint) -> Result<usize, TransportError> {
        Ok(self.socket.send_to(data, to.to_socket_addr())?)
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, IpEndpoint), TransportError> {
        let (size, addr) = self.socket.recv_from(buf)?;
        let from = IpEndpoint::from_socket_addr(addr).ok_or_else(|| {
            TransportError::Other(io::Error::new(
                io::ErrorKind::InvalidData,
                "non-IPv4 peer address",
            ))
        })?;
        Ok((size, from))
    }

    pub fn try_clone(&self) -> Result<Self, TransportError> {
        Ok(Self {
            socket: self.socket.try_clone()?,
            local: self.local,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_bind_exposes_port() {
        let transport = UdpTransport::open(IpEndpoint::localhost(0)).unwrap();
        assert_ne!(transport.local_endpoint().port, 0);
    }

    #[test]
    fn recv_on_empty_socket_would_block() {
        let transport = UdpTransport::open(IpEndpoint::localhost(0)).unwrap();
        let mut buf = [0u8; 64];
        assert!(matches!(
            transport.recv_from(&mut buf),
            Err(TransportError::WouldBlock)
        ));
    }

    #[test]
    fn loopback_datagram() {
        let a = UdpTransport::open(IpEndpoint::localhost(0)).unwrap();
        let b = UdpTransport::open(IpEndpoint::localhost(0)).unwrap();

        a.send_to(b"ping", b.local_endpoint()).unwrap();

        let mut buf = [0u8; 64];
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(500);
        loop {
            match b.recv_from(&mut buf) {
                Ok((size, from)) => {
                    assert_eq!(&buf[..size], b"ping");
                    assert_eq!(from, a.local_endpoint());
                    break;
                }
                Err(e) if e.is_transient() && std::time::Instant::now() < deadline => {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                Err(e) => panic!("recv failed: {e}"),
            }
        }
    }

    #[test]
    fn double_bind_reports_address_in_use() {
        let first = UdpTransport::open(IpEndpoint::localhost(0)).unwrap();
        let taken = first.local_endpoint();
        assert!(matches!(
            UdpTransport::open(taken),
            Err(TransportError::AddressInUse)
        ));
    }
}
