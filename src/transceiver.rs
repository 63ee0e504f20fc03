use std::net::SocketAddr;

use crate::error::Error;

/// A datagram endpoint the session reads draw states from and sends input
/// through.
///
/// The session shares one transceiver between its UDP reader and its input
/// sender, so implementations take `&self`.
///
/// See [`GameSocket`](crate::socket::GameSocket) for the implementation
/// used against a real server.
pub trait Transceiver {
    type IntoError: Into<Error>;
    /// Returns the local address of the endpoint.
    fn addr(&self) -> SocketAddr;
    /// Receives a datagram, if one arrives within the endpoint's read
    /// timeout.
    ///
    /// Must return `Ok(None)` rather than block indefinitely, so readers can
    /// observe cancellation.
    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, Self::IntoError>;
    /// Sends a datagram to the specified address.
    fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, Self::IntoError>;
}

#[cfg(test)]
pub(crate) mod memory {
    use std::io;
    use std::net::SocketAddr;
    use std::time::Duration;

    use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

    use super::Transceiver;

    /// One end of an in-memory datagram pipe.
    pub struct MemoryTransceiver {
        addr: SocketAddr,
        peer: SocketAddr,
        tx: Sender<Vec<u8>>,
        rx: Receiver<Vec<u8>>,
        timeout: Duration,
    }

    /// Two connected ends. Whatever one sends, the other receives, whatever
    /// address the sender names.
    pub fn pair(a: SocketAddr, b: SocketAddr) -> (MemoryTransceiver, MemoryTransceiver) {
        let (a_tx, b_rx) = crossbeam_channel::unbounded();
        let (b_tx, a_rx) = crossbeam_channel::unbounded();
        let timeout = Duration::from_millis(20);
        (
            MemoryTransceiver {
                addr: a,
                peer: b,
                tx: a_tx,
                rx: a_rx,
                timeout,
            },
            MemoryTransceiver {
                addr: b,
                peer: a,
                tx: b_tx,
                rx: b_rx,
                timeout,
            },
        )
    }

    impl MemoryTransceiver {
        /// Waits up to `timeout` for the next datagram.
        pub fn recv_within(&self, timeout: Duration) -> Option<Vec<u8>> {
            self.rx.recv_timeout(timeout).ok()
        }
    }

    impl Transceiver for MemoryTransceiver {
        type IntoError = io::Error;

        fn addr(&self) -> SocketAddr {
            self.addr
        }

        fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, io::Error> {
            match self.rx.recv_timeout(self.timeout) {
                Ok(datagram) => {
                    let len = datagram.len().min(buf.len());
                    buf[..len].copy_from_slice(&datagram[..len]);
                    Ok(Some((len, self.peer)))
                }
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    Err(io::Error::new(io::ErrorKind::NotConnected, "peer dropped"))
                }
            }
        }

        fn send(&self, buf: &[u8], _addr: SocketAddr) -> Result<usize, io::Error> {
            self.tx
                .send(buf.to_vec())
                .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "peer dropped"))?;
            Ok(buf.len())
        }
    }

    mod tests {
        use super::*;

        #[test]
        fn ends_see_each_other() {
            let (a, b) = pair(([10, 0, 0, 1], 1).into(), ([10, 0, 0, 2], 2).into());
            a.send(&[1, 2, 3], b.addr()).unwrap();
            let mut buf = [0u8; 8];
            assert_eq!(b.recv(&mut buf).unwrap(), Some((3, a.addr())));
            assert!(a.recv(&mut buf).unwrap().is_none());
            drop(b);
            assert!(a.recv(&mut buf).is_err());
        }
    }
}
