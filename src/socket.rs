use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::consts::{
    CLIENT_SOCKET_RECV_BUF_SIZE, CLIENT_SOCKET_SEND_BUF_SIZE, CONNECT_TIMEOUT_SECONDS,
};
use crate::transceiver::Transceiver;

#[derive(thiserror::Error, Debug)]
#[error("socket error: {0}")]
pub struct Error(#[from] std::io::Error);

pub type Result<T> = std::result::Result<T, Error>;

/// The client's UDP socket. Reads wait at most the read timeout.
pub struct GameSocket(pub UdpSocket);

impl GameSocket {
    pub fn bind(addr: impl ToSocketAddrs, read_timeout: Duration) -> Result<Self> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no socket addresses found")
        })?;
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        if addr.is_ipv6() {
            socket.set_only_v6(true)?;
        }
        socket.set_send_buffer_size(CLIENT_SOCKET_SEND_BUF_SIZE)?;
        socket.set_recv_buffer_size(CLIENT_SOCKET_RECV_BUF_SIZE)?;
        socket.bind(&addr.into())?;
        socket.set_read_timeout(Some(read_timeout))?;
        Ok(GameSocket(socket.into()))
    }

    /// Binds an ephemeral port of the same family as `server`.
    pub fn for_server(server: SocketAddr, read_timeout: Duration) -> Result<Self> {
        match server {
            SocketAddr::V4(_) => Self::bind((Ipv4Addr::UNSPECIFIED, 0), read_timeout),
            SocketAddr::V6(_) => Self::bind((Ipv6Addr::UNSPECIFIED, 0), read_timeout),
        }
    }
}

/// Connects the login stream. Reads on the returned stream time out after
/// `read_timeout` so callers can observe cancellation.
pub fn connect_tcp(addr: SocketAddr, read_timeout: Duration) -> Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(true)?;
    socket.connect_timeout(&addr.into(), Duration::from_secs(CONNECT_TIMEOUT_SECONDS))?;
    socket.set_read_timeout(Some(read_timeout))?;
    Ok(socket.into())
}

pub fn resolve(host: &str, port: u16) -> io::Result<Option<SocketAddr>> {
    Ok((host, port).to_socket_addrs()?.next())
}

pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

impl Transceiver for GameSocket {
    type IntoError = Error;

    fn addr(&self) -> SocketAddr {
        self.0
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        match self.0.recv_from(buf) {
            Ok((len, addr)) if len > 0 => Ok(Some((len, addr))),
            Ok(_) => Ok(None),
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        match self.0.send_to(buf, addr) {
            Ok(len) => Ok(len),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::from(e)),
        }
    }
}
