//! Plain TCP client and server.
//!
//! Both are thin state machines around [`TransportHandle`]: the client owns
//! one outbound handle, the server owns the listening socket and hands out
//! one handle per accepted client.

use super::poller::{poll_socket, Interest, Readiness, Timeout};
use super::*;
use crate::config::Settings;
use crate::error::Error;
use crate::log::{report, Logger};
use crate::runtime::{Registration, SocketClass};
use ::config::Config;

use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, instrument, trace};

const LISTEN_BACKLOG: i32 = 128;

// Applies the configured default timeouts to a fresh connection.
fn apply_default_timeouts(
    handle: &mut TransportHandle,
    settings: &Settings,
) -> Result<(), Error> {
    if let Some(timeout) = settings.recv_timeout {
        handle.set_recv_timeout(timeout)?;
    }
    if let Some(timeout) = settings.send_timeout {
        handle.set_send_timeout(timeout)?;
    }
    Ok(())
}

// ============================================================================
// TcpClient
// ============================================================================

/// Blocking TCP client owning a single outbound connection.
///
/// Not thread-safe for concurrent use of the same connection; the `&mut self`
/// receivers enforce that.
#[derive(Debug)]
pub struct TcpClient {
    handle: TransportHandle,
    log: Logger,
    settings: Settings,
    _registration: Registration,
}

impl TcpClient {
    /// Creates a disconnected client with default settings.
    pub fn new(log: Logger) -> Self {
        Self::with_settings(log, Settings::default())
    }

    /// Creates a disconnected client.
    pub fn with_settings(log: Logger, settings: Settings) -> Self {
        Self {
            handle: TransportHandle::invalid(),
            log: log.gated(settings.enable_log),
            settings,
            _registration: Registration::new(SocketClass::Plain),
        }
    }

    /// Creates a disconnected client with settings read from configuration.
    pub fn from_config(log: Logger, config: &Config) -> Result<Self, Error> {
        Ok(Self::with_settings(log, Settings::from_config(config)?))
    }

    /// Connects to `host:port`.
    ///
    /// An existing connection is closed first. On failure the client stays
    /// disconnected and the error tells whether resolution, socket creation
    /// or the connect call failed.
    #[instrument(skip(self))]
    pub fn connect(&mut self, host: &str, port: &str) -> Result<SocketAddr, Error> {
        if self.handle.is_connected() {
            if let Err(err) = self.disconnect() {
                debug!(?err, "Error closing previous connection");
            }
            report!(
                self.log,
                warn,
                "[TcpClient] Opening a new connection. The last one was automatically closed."
            );
        }

        let peer_addr = resolve(host, port).inspect_err(|err| {
            report!(self.log, error, "[TcpClient] {err}");
        })?;

        let mut handle = TransportHandle::connect(peer_addr).inspect_err(|err| {
            report!(self.log, error, "[TcpClient] Unable to connect to {peer_addr}: {err}");
        })?;
        apply_default_timeouts(&mut handle, &self.settings)?;

        let local_addr = handle.local_addr();
        info!(?local_addr, %peer_addr, "Connection established");
        self.handle = handle;

        Ok(peer_addr)
    }

    /// Sends all of `data`.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        if !self.handle.is_connected() {
            report!(self.log, error, "[TcpClient] Send failed: not connected to a server.");
            return Err(Error::NotConnected);
        }

        send_all(&mut self.handle, data).map_err(|failed| {
            let err = failed.into_error("send");
            report!(self.log, error, "[TcpClient] {err}");
            err
        })?;
        trace!(len = data.len(), "Sent data");
        Ok(())
    }

    /// Receives into `buf`.
    ///
    /// Returns the byte count; `Ok(0)` means the server closed the
    /// connection.
    #[instrument(skip(self, buf), fields(len = buf.len()))]
    pub fn receive(&mut self, buf: &mut [u8], read_fully: bool) -> Result<usize, Error> {
        if !self.handle.is_connected() {
            report!(self.log, error, "[TcpClient] Receive failed: not connected to a server.");
            return Err(Error::NotConnected);
        }

        let received = receive_into(&mut self.handle, buf, read_fully).map_err(|failed| {
            let err = failed.into_error("receive");
            report!(self.log, error, "[TcpClient] {err}");
            err
        })?;
        trace!(len = received, "Received data");
        Ok(received)
    }

    /// Half-closes the send direction and releases the socket.
    ///
    /// Does nothing if the client is not connected.
    #[instrument(skip(self))]
    pub fn disconnect(&mut self) -> Result<(), Error> {
        if !self.handle.is_valid() {
            return Ok(());
        }
        let peer_addr = self.handle.peer_addr();
        self.handle.disconnect().inspect_err(|err| {
            report!(self.log, warn, "[TcpClient] {err}");
        })?;
        info!(?peer_addr, "Closed connection");
        Ok(())
    }

    /// Bounds every following receive on the current connection.
    pub fn set_rcv_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.handle.set_recv_timeout(timeout).inspect_err(|err| {
            report!(self.log, error, "[TcpClient] {err}");
        })
    }

    pub fn set_rcv_timeout_ms(&mut self, msec: u32) -> Result<(), Error> {
        self.set_rcv_timeout(Duration::from_millis(msec.into()))
    }

    /// Bounds every following send on the current connection.
    pub fn set_snd_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.handle.set_send_timeout(timeout).inspect_err(|err| {
            report!(self.log, error, "[TcpClient] {err}");
        })
    }

    pub fn set_snd_timeout_ms(&mut self, msec: u32) -> Result<(), Error> {
        self.set_snd_timeout(Duration::from_millis(msec.into()))
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.handle.peer_addr()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.handle.local_addr()
    }

    /// The connection handle, e.g. for [`wait_ready`](super::wait_ready).
    pub fn handle(&self) -> &TransportHandle {
        &self.handle
    }

    #[cfg(feature = "tls")]
    pub(crate) fn take_handle(&mut self) -> TransportHandle {
        self.handle.take_socket()
    }

    #[cfg(feature = "tls")]
    pub(crate) fn logger(&self) -> &Logger {
        &self.log
    }

    #[cfg(feature = "tls")]
    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

impl Connection for TcpClient {
    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        TcpClient::send(self, data)
    }

    fn receive(&mut self, buf: &mut [u8], read_fully: bool) -> Result<usize, Error> {
        TcpClient::receive(self, buf, read_fully)
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        TcpClient::disconnect(self)
    }

    fn is_connected(&self) -> bool {
        TcpClient::is_connected(self)
    }
}

// ============================================================================
// TcpServer
// ============================================================================

// Bind address resolved at construction; listening socket created lazily.
#[derive(Debug)]
struct ServerBinding {
    addr: SocketAddr,
    listener: Option<Socket>,
}

/// Blocking TCP server.
///
/// The bind address is resolved at construction. The listening socket is
/// created on the first [`TcpServer::listen`] (or [`TcpServer::bind`]) and
/// reused afterwards. Client handles returned by `listen` are owned by the
/// caller and passed back into the per-client operations.
#[derive(Debug)]
pub struct TcpServer {
    binding: ServerBinding,
    log: Logger,
    settings: Settings,
    _registration: Registration,
}

impl TcpServer {
    /// Creates a server for `host:port` with default settings.
    ///
    /// Fails with [`Error::Resolution`] if the address cannot be resolved.
    pub fn new(log: Logger, host: &str, port: &str) -> Result<Self, Error> {
        Self::with_settings(log, Settings::default(), host, port)
    }

    pub fn with_settings(
        log: Logger,
        settings: Settings,
        host: &str,
        port: &str,
    ) -> Result<Self, Error> {
        let log = log.gated(settings.enable_log);
        let addr = resolve(host, port).inspect_err(|err| {
            report!(log, error, "[TcpServer] {err}");
        })?;

        Ok(Self {
            binding: ServerBinding {
                addr,
                listener: None,
            },
            log,
            settings,
            _registration: Registration::new(SocketClass::Plain),
        })
    }

    /// Creates a server with settings read from configuration.
    pub fn from_config(log: Logger, config: &Config, host: &str, port: &str) -> Result<Self, Error> {
        Self::with_settings(log, Settings::from_config(config)?, host, port)
    }

    /// Binds and listens without waiting for a client.
    ///
    /// Returns the bound address, which is useful when binding to port 0.
    #[instrument(skip(self))]
    pub fn bind(&mut self) -> Result<SocketAddr, Error> {
        self.ensure_listening()?;
        Ok(self.local_addr())
    }

    /// The bound address if listening, otherwise the resolved address.
    pub fn local_addr(&self) -> SocketAddr {
        self.binding
            .listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
            .and_then(|addr| addr.as_socket())
            .unwrap_or(self.binding.addr)
    }

    pub fn is_listening(&self) -> bool {
        self.binding.listener.is_some()
    }

    /// Waits for the next client and returns its handle.
    ///
    /// With a finite `timeout` the listening socket is polled first and
    /// [`Error::AcceptTimedOut`] is returned if nobody connects in time.
    #[instrument(skip(self, timeout))]
    pub fn listen(&mut self, timeout: impl Into<Timeout>) -> Result<TransportHandle, Error> {
        let timeout = timeout.into();
        self.ensure_listening()?;
        let listener = self.binding.listener.as_ref().ok_or(Error::NotConnected)?;

        if let Some(duration) = timeout.duration() {
            match poll_socket(listener, Interest::Readable, timeout) {
                Readiness::Ready => {}
                Readiness::TimedOut => {
                    debug!(?duration, "No incoming connection");
                    return Err(Error::AcceptTimedOut { timeout: duration });
                }
                Readiness::Error(err) => {
                    report!(self.log, error, "[TcpServer] Poll failed: {err}");
                    return Err(Error::Poll(err));
                }
            }
        }

        loop {
            match listener.accept() {
                Ok((socket, _)) => {
                    let mut handle = TransportHandle::accepted(socket);
                    apply_default_timeouts(&mut handle, &self.settings)?;
                    let peer_addr = handle.peer_addr();
                    info!(?peer_addr, "Accepted connection");
                    return Ok(handle);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset
                    ) =>
                {
                    report!(self.log, warn, "[TcpServer] Transient accept error: {err}");
                    return Err(Error::Transport {
                        operation: "accept",
                        transferred: 0,
                        source: err,
                    });
                }
                Err(err) => {
                    report!(self.log, error, "[TcpServer] Accept failed: {err}");
                    self.binding.listener = None;
                    return Err(Error::Transport {
                        operation: "accept",
                        transferred: 0,
                        source: err,
                    });
                }
            }
        }
    }

    /// [`TcpServer::listen`] with the configured `accept_timeout_ms`.
    pub fn listen_default(&mut self) -> Result<TransportHandle, Error> {
        let timeout = Timeout::from(self.settings.accept_timeout);
        self.listen(timeout)
    }

    /// Receives from `client`; `Ok(0)` means the client closed.
    #[instrument(skip(self, client, buf), fields(len = buf.len()))]
    pub fn receive(
        &self,
        client: &mut TransportHandle,
        buf: &mut [u8],
        read_fully: bool,
    ) -> Result<usize, Error> {
        if !client.is_connected() {
            report!(self.log, error, "[TcpServer] Receive failed: client not connected.");
            return Err(Error::NotConnected);
        }

        let received = receive_into(client, buf, read_fully).map_err(|failed| {
            let err = failed.into_error("receive");
            report!(self.log, error, "[TcpServer] {err}");
            err
        })?;
        trace!(len = received, "Received data");
        Ok(received)
    }

    /// Sends all of `data` to `client`.
    #[instrument(skip(self, client, data), fields(len = data.len()))]
    pub fn send(&self, client: &mut TransportHandle, data: &[u8]) -> Result<(), Error> {
        if !client.is_connected() {
            report!(self.log, error, "[TcpServer] Send failed: client not connected.");
            return Err(Error::NotConnected);
        }

        send_all(client, data).map_err(|failed| {
            let err = failed.into_error("send");
            report!(self.log, error, "[TcpServer] {err}");
            err
        })?;
        trace!(len = data.len(), "Sent data");
        Ok(())
    }

    /// Closes `client`. The listening socket stays open.
    #[instrument(skip(self, client))]
    pub fn disconnect(&self, client: &mut TransportHandle) -> Result<(), Error> {
        if !client.is_valid() {
            return Ok(());
        }
        let peer_addr = client.peer_addr();
        client.disconnect().inspect_err(|err| {
            report!(self.log, warn, "[TcpServer] {err}");
        })?;
        info!(?peer_addr, "Closed connection");
        Ok(())
    }

    pub fn set_rcv_timeout(&self, client: &mut TransportHandle, timeout: Duration) -> Result<(), Error> {
        client.set_recv_timeout(timeout).inspect_err(|err| {
            report!(self.log, error, "[TcpServer] {err}");
        })
    }

    pub fn set_rcv_timeout_ms(&self, client: &mut TransportHandle, msec: u32) -> Result<(), Error> {
        self.set_rcv_timeout(client, Duration::from_millis(msec.into()))
    }

    pub fn set_snd_timeout(&self, client: &mut TransportHandle, timeout: Duration) -> Result<(), Error> {
        client.set_send_timeout(timeout).inspect_err(|err| {
            report!(self.log, error, "[TcpServer] {err}");
        })
    }

    pub fn set_snd_timeout_ms(&self, client: &mut TransportHandle, msec: u32) -> Result<(), Error> {
        self.set_snd_timeout(client, Duration::from_millis(msec.into()))
    }

    #[cfg(feature = "tls")]
    pub(crate) fn logger(&self) -> &Logger {
        &self.log
    }

    #[cfg(feature = "tls")]
    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    // Creates, binds and listens once. Any failure drops the new socket.
    fn ensure_listening(&mut self) -> Result<(), Error> {
        if self.binding.listener.is_some() {
            return Ok(());
        }

        let addr = self.binding.addr;
        let resource = |operation: &'static str| {
            move |source: std::io::Error| Error::Resource { operation, source }
        };
        let result = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(resource("socket"))
            .and_then(|socket| {
                socket
                    .set_reuse_address(true)
                    .map_err(resource("setsockopt(SO_REUSEADDR)"))?;
                socket.bind(&addr.into()).map_err(resource("bind"))?;
                socket.listen(LISTEN_BACKLOG).map_err(resource("listen"))?;
                Ok(socket)
            });

        match result {
            Ok(listener) => {
                let local_addr = listener.local_addr().ok().and_then(|a| a.as_socket());
                info!(?local_addr, "Listening for connections");
                self.binding.listener = Some(listener);
                Ok(())
            }
            Err(err) => {
                report!(self.log, error, "[TcpServer] {err}");
                Err(err)
            }
        }
    }
}
