//! Owned socket descriptors.

use super::poller::{poll_socket, Interest, Readiness, Timeout};
use crate::error::Error;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;
use tracing::{trace, warn};

/// Connection status of a [`TransportHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Disconnected,
    Connected,
}

/// An owned TCP socket.
///
/// A handle cannot be copied. Moving it out with [`TransportHandle::take_socket`]
/// leaves an invalid handle behind, and the socket is closed exactly once:
/// by [`TransportHandle::close`], [`TransportHandle::disconnect`] or drop.
#[derive(Debug, Default)]
pub struct TransportHandle {
    socket: Option<Socket>,
    connected: bool,
    recv_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
}

impl TransportHandle {
    /// Obtains an unconnected TCP socket for the given address family.
    pub fn create(domain: Domain) -> Result<Self, Error> {
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(|source| {
            Error::Resource {
                operation: "socket",
                source,
            }
        })?;
        Ok(Self {
            socket: Some(socket),
            ..Self::default()
        })
    }

    /// Creates a socket for `addr` and connects it.
    pub fn connect(addr: SocketAddr) -> Result<Self, Error> {
        let mut handle = Self::create(Domain::for_address(addr))?;
        let socket = handle.socket()?;
        socket
            .connect(&addr.into())
            .map_err(|source| Error::Transport {
                operation: "connect",
                transferred: 0,
                source,
            })?;
        if let Err(err) = socket.set_nodelay(true) {
            warn!(%addr, ?err, "Could not disable Nagle's algorithm");
        }
        handle.connected = true;
        Ok(handle)
    }

    pub(crate) fn accepted(socket: Socket) -> Self {
        if let Err(err) = socket.set_nodelay(true) {
            warn!(?err, "Could not disable Nagle's algorithm");
        }
        Self {
            socket: Some(socket),
            connected: true,
            ..Self::default()
        }
    }

    /// An invalid handle, equivalent to a closed one.
    pub fn invalid() -> Self {
        Self::default()
    }

    /// Moves the socket out, leaving this handle invalid.
    pub fn take_socket(&mut self) -> Self {
        std::mem::take(self)
    }

    pub fn is_valid(&self) -> bool {
        self.socket.is_some()
    }

    pub fn status(&self) -> Status {
        if self.socket.is_some() && self.connected {
            Status::Connected
        } else {
            Status::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status() == Status::Connected
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.socket
            .as_ref()
            .and_then(|socket| socket.peer_addr().ok())
            .and_then(|addr| addr.as_socket())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
            .and_then(|addr| addr.as_socket())
    }

    pub(crate) fn socket(&self) -> Result<&Socket, Error> {
        self.socket.as_ref().ok_or(Error::NotConnected)
    }

    /// Closes the socket. Closing an invalid handle does nothing.
    pub fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            trace!(peer_addr = ?socket.peer_addr().ok().and_then(|a| a.as_socket()), "Closing socket");
        }
        self.connected = false;
        self.recv_timeout = None;
        self.send_timeout = None;
    }

    /// Shuts down one or both directions without closing the socket.
    pub fn shutdown(&self, how: Shutdown) -> Result<(), Error> {
        self.socket()?
            .shutdown(how)
            .map_err(|source| Error::Transport {
                operation: "shutdown",
                transferred: 0,
                source,
            })
    }

    /// Half-closes the send direction, then closes the socket.
    ///
    /// The socket is closed even if the shutdown fails. A peer that already
    /// went away is not an error.
    pub fn disconnect(&mut self) -> Result<(), Error> {
        let Some(socket) = &self.socket else {
            return Ok(());
        };
        let result = socket.shutdown(Shutdown::Write);
        self.close();
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(source) => Err(Error::Transport {
                operation: "shutdown",
                transferred: 0,
                source,
            }),
        }
    }

    /// Bounds every following receive. Zero fails a receive immediately if
    /// no data is waiting.
    pub fn set_recv_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        let socket = self.socket()?;
        // SO_RCVTIMEO cannot express zero, so zero is enforced with a poll
        let native = (!timeout.is_zero()).then_some(timeout);
        socket
            .set_read_timeout(native)
            .map_err(|source| Error::Resource {
                operation: "setsockopt(SO_RCVTIMEO)",
                source,
            })?;
        self.recv_timeout = Some(timeout);
        Ok(())
    }

    /// Bounds every following send. Zero fails a send immediately if the
    /// send buffer is full.
    pub fn set_send_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        let socket = self.socket()?;
        let native = (!timeout.is_zero()).then_some(timeout);
        socket
            .set_write_timeout(native)
            .map_err(|source| Error::Resource {
                operation: "setsockopt(SO_SNDTIMEO)",
                source,
            })?;
        self.send_timeout = Some(timeout);
        Ok(())
    }

    /// Removes the receive timeout; receives block without bound again.
    pub fn clear_recv_timeout(&mut self) -> Result<(), Error> {
        self.socket()?
            .set_read_timeout(None)
            .map_err(|source| Error::Resource {
                operation: "setsockopt(SO_RCVTIMEO)",
                source,
            })?;
        self.recv_timeout = None;
        Ok(())
    }

    /// Removes the send timeout; sends block without bound again.
    pub fn clear_send_timeout(&mut self) -> Result<(), Error> {
        self.socket()?
            .set_write_timeout(None)
            .map_err(|source| Error::Resource {
                operation: "setsockopt(SO_SNDTIMEO)",
                source,
            })?;
        self.send_timeout = None;
        Ok(())
    }

    pub fn recv_timeout(&self) -> Option<Duration> {
        self.recv_timeout
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout
    }

    fn live_socket(&self) -> io::Result<&Socket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

// A zero timeout means "only if ready right now".
fn ready_now(socket: &Socket, interest: Interest) -> io::Result<()> {
    match poll_socket(socket, interest, Timeout::After(Duration::ZERO)) {
        Readiness::Ready => Ok(()),
        Readiness::TimedOut => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        Readiness::Error(err) => Err(err),
    }
}

impl Read for TransportHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let socket = self.live_socket()?;
        if self.recv_timeout == Some(Duration::ZERO) {
            ready_now(socket, Interest::Readable)?;
        }
        let mut socket = socket;
        socket.read(buf)
    }
}

impl Write for TransportHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let socket = self.live_socket()?;
        if self.send_timeout == Some(Duration::ZERO) {
            ready_now(socket, Interest::Writable)?;
        }
        let mut socket = socket;
        socket.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
