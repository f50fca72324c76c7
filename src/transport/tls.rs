//! TLS over blocking TCP, built on rustls.
//!
//! A [`TlsSession`] binds a TLS context and a rustls connection to a
//! [`TransportHandle`]. [`TlsClient`] and [`TlsServer`] compose the plain TCP
//! types with one session per connection.

use super::tls_config::{TlsContext, TlsProtocol};
use super::*;
use crate::config::Settings;
use crate::error::{Error, TlsErrorKind};
use crate::log::{report, Logger};
use crate::runtime::{Registration, SocketClass};
use ::config::Config;

use rustls::pki_types::ServerName;
use rustls::{ClientConnection, ServerConnection};
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

// Internal enum for TLS connection type
enum TlsConnection {
    Server(ServerConnection),
    Client(ClientConnection),
}

impl TlsConnection {
    fn read_tls(&mut self, rd: &mut dyn Read) -> io::Result<usize> {
        match self {
            TlsConnection::Server(conn) => conn.read_tls(rd),
            TlsConnection::Client(conn) => conn.read_tls(rd),
        }
    }

    fn write_tls(&mut self, wr: &mut dyn Write) -> io::Result<usize> {
        match self {
            TlsConnection::Server(conn) => conn.write_tls(wr),
            TlsConnection::Client(conn) => conn.write_tls(wr),
        }
    }

    fn process_new_packets(&mut self) -> Result<rustls::IoState, rustls::Error> {
        match self {
            TlsConnection::Server(conn) => conn.process_new_packets(),
            TlsConnection::Client(conn) => conn.process_new_packets(),
        }
    }

    fn wants_read(&self) -> bool {
        match self {
            TlsConnection::Server(conn) => conn.wants_read(),
            TlsConnection::Client(conn) => conn.wants_read(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            TlsConnection::Server(conn) => conn.wants_write(),
            TlsConnection::Client(conn) => conn.wants_write(),
        }
    }

    fn is_handshaking(&self) -> bool {
        match self {
            TlsConnection::Server(conn) => conn.is_handshaking(),
            TlsConnection::Client(conn) => conn.is_handshaking(),
        }
    }

    fn writer(&mut self) -> rustls::Writer<'_> {
        match self {
            TlsConnection::Server(conn) => conn.writer(),
            TlsConnection::Client(conn) => conn.writer(),
        }
    }

    fn reader(&mut self) -> rustls::Reader<'_> {
        match self {
            TlsConnection::Server(conn) => conn.reader(),
            TlsConnection::Client(conn) => conn.reader(),
        }
    }

    fn send_close_notify(&mut self) {
        match self {
            TlsConnection::Server(conn) => conn.send_close_notify(),
            TlsConnection::Client(conn) => conn.send_close_notify(),
        }
    }

    fn cipher_suite(&self) -> Option<rustls::CipherSuite> {
        let suite = match self {
            TlsConnection::Server(conn) => conn.negotiated_cipher_suite(),
            TlsConnection::Client(conn) => conn.negotiated_cipher_suite(),
        };
        suite.map(|suite| suite.suite())
    }

    fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        match self {
            TlsConnection::Server(conn) => conn.protocol_version(),
            TlsConnection::Client(conn) => conn.protocol_version(),
        }
    }

    // Writes out everything rustls has queued.
    fn flush_tls(&mut self, io: &mut TransportHandle) -> io::Result<()> {
        while self.wants_write() {
            match self.write_tls(io) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

fn classify(err: &io::Error, reading: bool) -> TlsErrorKind {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut if reading => TlsErrorKind::WantRead,
        ErrorKind::WouldBlock | ErrorKind::TimedOut => TlsErrorKind::WantWrite,
        ErrorKind::UnexpectedEof => TlsErrorKind::ZeroReturn,
        ErrorKind::InvalidData => TlsErrorKind::Protocol,
        _ => TlsErrorKind::Syscall,
    }
}

// Blocking handshake. Stops at the first failure; the caller closes the session.
fn drive_handshake(
    conn: &mut TlsConnection,
    io: &mut TransportHandle,
) -> Result<(), (TlsErrorKind, String)> {
    let io_failure = |err: io::Error, reading: bool| (classify(&err, reading), err.to_string());

    while conn.is_handshaking() {
        conn.flush_tls(io).map_err(|err| io_failure(err, false))?;
        if !conn.is_handshaking() {
            break;
        }
        if !conn.wants_read() {
            return Err((TlsErrorKind::Protocol, "handshake stalled".to_string()));
        }

        match conn.read_tls(io) {
            Ok(0) => {
                return Err((
                    TlsErrorKind::ZeroReturn,
                    "peer closed the connection during the handshake".to_string(),
                ))
            }
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_failure(err, true)),
        }

        if let Err(err) = conn.process_new_packets() {
            // Let the peer see the alert
            let _ = conn.flush_tls(io);
            return Err((TlsErrorKind::Protocol, err.to_string()));
        }
    }

    // Final flight, e.g. the client Finished or session tickets
    conn.flush_tls(io).map_err(|err| io_failure(err, false))
}

// Byte-stream view of an established session, for the shared transfer loops.
struct TlsStream<'a> {
    conn: &'a mut TlsConnection,
    io: &'a mut TransportHandle,
}

impl Read for TlsStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                // Transport closed without close_notify
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(0),
                Err(err) => return Err(err),
            }

            self.conn.flush_tls(self.io)?;
            self.conn.read_tls(self.io)?;
            if let Err(err) = self.conn.process_new_packets() {
                let _ = self.conn.flush_tls(self.io);
                return Err(io::Error::new(ErrorKind::InvalidData, err));
            }
        }
    }
}

impl Write for TlsStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Whatever earlier writes left queued goes out first
        self.conn.flush_tls(self.io)?;
        let written = self.conn.writer().write(buf)?;
        match self.conn.flush_tls(self.io) {
            Ok(()) => Ok(written),
            // rustls owns these bytes now; the error comes back on the next write or flush
            Err(err) if written > 0 => {
                trace!(written, ?err, "Plaintext queued behind a stalled transport");
                Ok(written)
            }
            Err(err) => Err(err),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.conn.flush_tls(self.io)
    }
}

// ============================================================================
// TlsSession
// ============================================================================

/// Which side of the handshake a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsRole {
    Client,
    Server,
}

/// Lifecycle of a [`TlsSession`].
///
/// `Bound` → `ContextReady` ([`TlsSession::setup_context`]) → `Secure`
/// ([`TlsSession::handshake`]) → `Closed` ([`TlsSession::shutdown`]). A failed
/// handshake goes straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Bound,
    ContextReady,
    Secure,
    Closed,
}

/// A TLS context and session bound to one connection.
///
/// Teardown always runs in the same order: close notification, session,
/// context, then the transport.
pub struct TlsSession {
    role: TlsRole,
    state: SessionState,
    handle: TransportHandle,
    context: Option<TlsContext>,
    conn: Option<TlsConnection>,
    server_name: Option<String>,
    // Transfers interrupted by WantWrite/WantRead, resumed by the next call of
    // the same length
    send_progress: Option<Transfer>,
    recv_progress: Option<Transfer>,
    log: Logger,
}

// The stored transfer if it matches `len`, otherwise a fresh one.
fn resume_or_start(progress: &mut Option<Transfer>, len: usize) -> Transfer {
    progress
        .take()
        .filter(|transfer| transfer.len() == len)
        .unwrap_or_else(|| Transfer::new(len))
}

impl TlsSession {
    /// Binds a new session to a connected handle.
    pub fn new(role: TlsRole, handle: TransportHandle, log: Logger) -> Self {
        Self {
            role,
            state: SessionState::Bound,
            handle,
            context: None,
            conn: None,
            server_name: None,
            send_progress: None,
            recv_progress: None,
            log,
        }
    }

    pub fn role(&self) -> TlsRole {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Name sent as SNI and checked against the server certificate.
    pub fn set_server_name(&mut self, name: impl Into<String>) {
        self.server_name = Some(name.into());
    }

    /// Creates the TLS context for `protocol`. Replaces an earlier context.
    #[instrument(skip(self))]
    pub fn setup_context(&mut self, protocol: TlsProtocol) -> Result<(), Error> {
        if matches!(self.state, SessionState::Secure | SessionState::Closed) {
            report!(self.log, error, "[TlsSession] Context setup on a {:?} session.", self.state);
            return Err(Error::NotConnected);
        }
        let context = TlsContext::new(protocol).inspect_err(|err| {
            report!(self.log, error, "[TlsSession] {err}");
        })?;
        self.context = Some(context);
        self.state = SessionState::ContextReady;
        Ok(())
    }

    pub fn load_certificate(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        self.with_context(|context| context.load_certificate(path))
    }

    pub fn load_private_key(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        self.with_context(|context| context.load_private_key(path))
    }

    pub fn load_trusted_ca(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        self.with_context(|context| context.load_trusted_ca(path))
    }

    /// Loads every entry set in `material`.
    pub fn load_material(&mut self, material: &TlsMaterial) -> Result<(), Error> {
        self.with_context(|context| context.load_material(material))
    }

    fn with_context<F>(&mut self, load: F) -> Result<(), Error>
    where
        F: FnOnce(&mut TlsContext) -> Result<(), Error>,
    {
        let result = match (&mut self.context, self.state) {
            (Some(context), SessionState::ContextReady) => load(context),
            _ => Err(Error::TlsContextMissing),
        };
        result.inspect_err(|err| {
            report!(self.log, error, "[TlsSession] {err}");
        })
    }

    /// Runs the handshake over the bound handle.
    ///
    /// On failure the session is shut down and its handle closed.
    #[instrument(skip(self), fields(role = ?self.role))]
    pub fn handshake(&mut self) -> Result<(), Error> {
        let result = self.try_handshake();
        if let Err(err) = &result {
            report!(self.log, error, "[TlsSession] {err}");
            self.close();
        }
        result
    }

    fn try_handshake(&mut self) -> Result<(), Error> {
        let context = match (&self.context, self.state) {
            (Some(context), SessionState::ContextReady) => context,
            _ => return Err(Error::TlsContextMissing),
        };
        if !self.handle.is_connected() {
            return Err(Error::NotConnected);
        }

        let mut conn = match self.role {
            TlsRole::Client => {
                let name = self.server_name.clone().unwrap_or_default();
                let server_name = ServerName::try_from(name.clone())
                    .map_err(|_| Error::TlsInvalidServerName(name))?;
                let conn = ClientConnection::new(context.client_config()?, server_name)
                    .map_err(|e| Error::TlsClientConfigBuild(e.to_string()))?;
                TlsConnection::Client(conn)
            }
            TlsRole::Server => {
                let conn = ServerConnection::new(context.server_config()?)
                    .map_err(|e| Error::TlsServerConfigBuild(e.to_string()))?;
                TlsConnection::Server(conn)
            }
        };

        drive_handshake(&mut conn, &mut self.handle)
            .map_err(|(kind, detail)| Error::TlsHandshake { kind, detail })?;

        let peer_addr = self.handle.peer_addr();
        let protocol = context.protocol();
        self.conn = Some(conn);
        self.state = SessionState::Secure;

        info!(
            ?peer_addr,
            %protocol,
            version = ?self.protocol_version(),
            cipher = ?self.cipher_suite(),
            "TLS handshake completed"
        );
        if let Some(cipher) = self.cipher_suite() {
            self.log
                .line(&format!("[TlsSession] TLS connection established using {cipher}."));
        }
        Ok(())
    }

    /// Negotiated cipher suite name, once the session is secure.
    pub fn cipher_suite(&self) -> Option<String> {
        self.conn
            .as_ref()
            .and_then(TlsConnection::cipher_suite)
            .map(|suite| format!("{suite:?}"))
    }

    /// Negotiated protocol version, once the session is secure.
    pub fn protocol_version(&self) -> Option<String> {
        self.conn
            .as_ref()
            .and_then(TlsConnection::protocol_version)
            .map(|version| format!("{version:?}"))
    }

    fn stream(&mut self) -> Result<TlsStream<'_>, Error> {
        match (&mut self.conn, self.state) {
            (Some(conn), SessionState::Secure) if self.handle.is_connected() => Ok(TlsStream {
                conn,
                io: &mut self.handle,
            }),
            _ => Err(Error::NotConnected),
        }
    }

    /// Sends all of `data` over the encrypted channel.
    ///
    /// After a `WantWrite` failure, calling `send` again with the same data
    /// continues after the bytes already counted in `transferred`.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        let transfer = resume_or_start(&mut self.send_progress, data.len());
        let result = self.stream().and_then(|mut stream| {
            send_from(&mut stream, data, transfer).map_err(|failed| Error::TlsIo {
                operation: "send",
                kind: classify(&failed.source, false),
                transferred: failed.transferred,
                detail: failed.source.to_string(),
            })
        });
        match &result {
            Ok(()) => trace!(len = data.len(), "Sent data"),
            Err(err) => {
                if let Error::TlsIo {
                    kind: TlsErrorKind::WantWrite,
                    transferred,
                    ..
                } = err
                {
                    self.send_progress = Some(Transfer::resume(data.len(), *transferred));
                }
                report!(self.log, error, "[TlsSession] Send failed: {err}");
            }
        }
        result
    }

    /// Receives decrypted bytes into `buf`. `Ok(0)` means the peer closed.
    ///
    /// After a `WantRead` failure of a `read_fully` receive, calling `receive`
    /// again with the same buffer keeps the bytes already stored and returns
    /// the total.
    #[instrument(skip(self, buf), fields(len = buf.len()))]
    pub fn receive(&mut self, buf: &mut [u8], read_fully: bool) -> Result<usize, Error> {
        let transfer = resume_or_start(&mut self.recv_progress, buf.len());
        let len = buf.len();
        let result = self.stream().and_then(|mut stream| {
            receive_from(&mut stream, buf, read_fully, transfer).map_err(|failed| Error::TlsIo {
                operation: "receive",
                kind: classify(&failed.source, true),
                transferred: failed.transferred,
                detail: failed.source.to_string(),
            })
        });
        match &result {
            Ok(received) => trace!(len = received, "Received data"),
            Err(err) => {
                if let Error::TlsIo {
                    kind: TlsErrorKind::WantRead,
                    transferred,
                    ..
                } = err
                {
                    self.recv_progress = Some(Transfer::resume(len, *transferred));
                }
                report!(self.log, error, "[TlsSession] Receive failed: {err}");
            }
        }
        result
    }

    /// Decrypted bytes already buffered, readable without touching the socket.
    pub fn pending_bytes(&mut self) -> Result<usize, Error> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(0);
        };
        conn.process_new_packets()
            .map(|state| state.plaintext_bytes_to_read())
            .map_err(|err| Error::TlsIo {
                operation: "pending",
                kind: TlsErrorKind::Protocol,
                transferred: 0,
                detail: err.to_string(),
            })
    }

    pub fn has_pending(&mut self) -> bool {
        self.pending_bytes().is_ok_and(|pending| pending > 0)
    }

    /// Sends close_notify, then frees the session and the context.
    ///
    /// The handle stays open. Calling it again does nothing.
    #[instrument(skip(self))]
    pub fn shutdown(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if self.state == SessionState::Secure && self.handle.is_connected() {
                conn.send_close_notify();
                if let Err(err) = conn.flush_tls(&mut self.handle) {
                    debug!(?err, "Could not deliver close_notify");
                }
            }
            drop(conn);
        }
        self.context = None;
        self.send_progress = None;
        self.recv_progress = None;
        self.state = SessionState::Closed;
    }

    // TLS teardown followed by the transport.
    fn close(&mut self) {
        self.shutdown();
        if let Err(err) = self.handle.disconnect() {
            debug!(?err, "Error closing transport");
        }
    }

    /// TLS shutdown, then transport disconnect. Idempotent.
    #[instrument(skip(self))]
    pub fn disconnect(&mut self) -> Result<(), Error> {
        if self.state == SessionState::Closed && !self.handle.is_valid() {
            return Ok(());
        }
        let peer_addr = self.handle.peer_addr();
        self.shutdown();
        self.handle.disconnect().inspect_err(|err| {
            report!(self.log, warn, "[TlsSession] {err}");
        })?;
        info!(?peer_addr, "Closed TLS connection");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Secure && self.handle.is_connected()
    }

    pub fn set_rcv_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.handle.set_recv_timeout(timeout)
    }

    pub fn set_rcv_timeout_ms(&mut self, msec: u32) -> Result<(), Error> {
        self.set_rcv_timeout(Duration::from_millis(msec.into()))
    }

    pub fn set_snd_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.handle.set_send_timeout(timeout)
    }

    pub fn set_snd_timeout_ms(&mut self, msec: u32) -> Result<(), Error> {
        self.set_snd_timeout(Duration::from_millis(msec.into()))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.handle.peer_addr()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.handle.local_addr()
    }

    /// The underlying handle, e.g. for [`wait_ready`](super::wait_ready).
    ///
    /// Readiness of the socket says nothing about data already decrypted;
    /// check [`TlsSession::has_pending`] first.
    pub fn handle(&self) -> &TransportHandle {
        &self.handle
    }
}

impl Drop for TlsSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSession")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("handle", &self.handle)
            .field("context", &self.context)
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl Connection for TlsSession {
    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        TlsSession::send(self, data)
    }

    fn receive(&mut self, buf: &mut [u8], read_fully: bool) -> Result<usize, Error> {
        TlsSession::receive(self, buf, read_fully)
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        TlsSession::disconnect(self)
    }

    fn is_connected(&self) -> bool {
        TlsSession::is_connected(self)
    }
}

// ============================================================================
// TlsClient
// ============================================================================

/// Blocking TLS client.
///
/// Connects over TCP, then sets up a fresh context from its [`Settings`],
/// loads the configured material and runs the handshake.
#[derive(Debug)]
pub struct TlsClient {
    tcp: TcpClient,
    session: Option<TlsSession>,
    server_name: Option<String>,
    _registration: Registration,
}

impl TlsClient {
    pub fn new(log: Logger) -> Self {
        Self::with_settings(log, Settings::default())
    }

    pub fn with_settings(log: Logger, settings: Settings) -> Self {
        let server_name = settings.tls_server_name.clone();
        Self {
            tcp: TcpClient::with_settings(log, settings),
            session: None,
            server_name,
            _registration: Registration::new(SocketClass::Secure),
        }
    }

    /// Creates a client with settings read from configuration.
    pub fn from_config(log: Logger, config: &Config) -> Result<Self, Error> {
        Ok(Self::with_settings(log, Settings::from_config(config)?))
    }

    /// Like [`TlsClient::from_config`], reading keys under `name` first.
    pub fn from_config_named(log: Logger, config: &Config, name: &str) -> Result<Self, Error> {
        Ok(Self::with_settings(log, Settings::from_config_named(config, name)?))
    }

    /// Overrides the SNI name, which defaults to the host passed to connect.
    pub fn set_server_name(&mut self, name: impl Into<String>) {
        self.server_name = Some(name.into());
    }

    /// Connects to `host:port` and completes the TLS handshake.
    ///
    /// An existing connection is closed first. Any failing stage leaves the
    /// client disconnected.
    #[instrument(skip(self))]
    pub fn connect(&mut self, host: &str, port: &str) -> Result<SocketAddr, Error> {
        if self.session.is_some() {
            if let Err(err) = self.disconnect() {
                debug!(?err, "Error closing previous connection");
            }
            report!(
                self.tcp.logger(),
                warn,
                "[TlsClient] Opening a new connection. The last one was automatically closed."
            );
        }

        let peer_addr = self.tcp.connect(host, port)?;
        let handle = self.tcp.take_handle();
        let settings = self.tcp.settings();

        let mut session = TlsSession::new(TlsRole::Client, handle, self.tcp.logger().clone());
        session.set_server_name(self.server_name.as_deref().unwrap_or(host));
        session.setup_context(settings.tls_protocol)?;
        session.load_material(&settings.tls_material)?;
        session.handshake()?;

        self.session = Some(session);
        Ok(peer_addr)
    }

    pub fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        match self.session.as_mut() {
            Some(session) => session.send(data),
            None => Err(self.not_connected("Send")),
        }
    }

    /// Receives decrypted bytes. `Ok(0)` means the server closed.
    pub fn receive(&mut self, buf: &mut [u8], read_fully: bool) -> Result<usize, Error> {
        match self.session.as_mut() {
            Some(session) => session.receive(buf, read_fully),
            None => Err(self.not_connected("Receive")),
        }
    }

    /// TLS shutdown, then transport disconnect. Does nothing if not connected.
    pub fn disconnect(&mut self) -> Result<(), Error> {
        match self.session.take() {
            Some(mut session) => session.disconnect(),
            None => Ok(()),
        }
    }

    pub fn has_pending(&mut self) -> bool {
        self.session.as_mut().is_some_and(TlsSession::has_pending)
    }

    pub fn pending_bytes(&mut self) -> Result<usize, Error> {
        self.session
            .as_mut()
            .map_or(Ok(0), TlsSession::pending_bytes)
    }

    pub fn set_rcv_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.session_mut()?.set_rcv_timeout(timeout)
    }

    pub fn set_rcv_timeout_ms(&mut self, msec: u32) -> Result<(), Error> {
        self.session_mut()?.set_rcv_timeout_ms(msec)
    }

    pub fn set_snd_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.session_mut()?.set_snd_timeout(timeout)
    }

    pub fn set_snd_timeout_ms(&mut self, msec: u32) -> Result<(), Error> {
        self.session_mut()?.set_snd_timeout_ms(msec)
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(TlsSession::is_connected)
    }

    pub fn cipher_suite(&self) -> Option<String> {
        self.session.as_ref().and_then(TlsSession::cipher_suite)
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.session.as_ref().and_then(TlsSession::protocol_version)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.session.as_ref().and_then(TlsSession::peer_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session.as_ref().and_then(TlsSession::local_addr)
    }

    pub fn session(&self) -> Option<&TlsSession> {
        self.session.as_ref()
    }

    fn session_mut(&mut self) -> Result<&mut TlsSession, Error> {
        self.session.as_mut().ok_or(Error::NotConnected)
    }

    fn not_connected(&self, operation: &str) -> Error {
        report!(
            self.tcp.logger(),
            error,
            "[TlsClient] {operation} failed: not connected to a server."
        );
        Error::NotConnected
    }
}

impl Drop for TlsClient {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

impl Connection for TlsClient {
    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        TlsClient::send(self, data)
    }

    fn receive(&mut self, buf: &mut [u8], read_fully: bool) -> Result<usize, Error> {
        TlsClient::receive(self, buf, read_fully)
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        TlsClient::disconnect(self)
    }

    fn is_connected(&self) -> bool {
        TlsClient::is_connected(self)
    }
}

// ============================================================================
// TlsServer
// ============================================================================

/// Blocking TLS server.
///
/// Each accepted client gets its own context and session, returned by
/// [`TlsServer::listen`] and owned by the caller.
#[derive(Debug)]
pub struct TlsServer {
    tcp: TcpServer,
    _registration: Registration,
}

impl TlsServer {
    pub fn new(log: Logger, host: &str, port: &str) -> Result<Self, Error> {
        Self::with_settings(log, Settings::default(), host, port)
    }

    pub fn with_settings(
        log: Logger,
        settings: Settings,
        host: &str,
        port: &str,
    ) -> Result<Self, Error> {
        Ok(Self {
            tcp: TcpServer::with_settings(log, settings, host, port)?,
            _registration: Registration::new(SocketClass::Secure),
        })
    }

    pub fn from_config(log: Logger, config: &Config, host: &str, port: &str) -> Result<Self, Error> {
        Self::with_settings(log, Settings::from_config(config)?, host, port)
    }

    /// Like [`TlsServer::from_config`], reading keys under `name` first.
    pub fn from_config_named(
        log: Logger,
        config: &Config,
        name: &str,
        host: &str,
        port: &str,
    ) -> Result<Self, Error> {
        Self::with_settings(log, Settings::from_config_named(config, name)?, host, port)
    }

    /// Binds and listens without waiting for a client.
    pub fn bind(&mut self) -> Result<SocketAddr, Error> {
        self.tcp.bind()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.tcp.local_addr()
    }

    /// Accepts the next client and completes the server-side handshake.
    ///
    /// Fails with [`Error::TlsServerConfigMissing`] before accepting anything
    /// if no certificate and private key are configured.
    #[instrument(skip(self, timeout))]
    pub fn listen(&mut self, timeout: impl Into<Timeout>) -> Result<TlsSession, Error> {
        if !self.tcp.settings().tls_material.has_identity() {
            let err = Error::TlsServerConfigMissing;
            report!(self.tcp.logger(), error, "[TlsServer] {err}");
            return Err(err);
        }

        let handle = self.tcp.listen(timeout)?;
        let settings = self.tcp.settings();

        let mut session = TlsSession::new(TlsRole::Server, handle, self.tcp.logger().clone());
        session.setup_context(settings.tls_protocol)?;
        session.load_material(&settings.tls_material)?;
        session.handshake()?;
        Ok(session)
    }

    /// [`TlsServer::listen`] with the configured `accept_timeout_ms`.
    pub fn listen_default(&mut self) -> Result<TlsSession, Error> {
        let timeout = Timeout::from(self.tcp.settings().accept_timeout);
        self.listen(timeout)
    }

    pub fn receive(
        &self,
        session: &mut TlsSession,
        buf: &mut [u8],
        read_fully: bool,
    ) -> Result<usize, Error> {
        session.receive(buf, read_fully)
    }

    pub fn send(&self, session: &mut TlsSession, data: &[u8]) -> Result<(), Error> {
        session.send(data)
    }

    /// TLS shutdown, then transport disconnect for one client.
    pub fn disconnect(&self, session: &mut TlsSession) -> Result<(), Error> {
        session.disconnect()
    }

    pub fn has_pending(&self, session: &mut TlsSession) -> bool {
        session.has_pending()
    }

    pub fn pending_bytes(&self, session: &mut TlsSession) -> Result<usize, Error> {
        session.pending_bytes()
    }

    pub fn set_rcv_timeout(&self, session: &mut TlsSession, timeout: Duration) -> Result<(), Error> {
        session.set_rcv_timeout(timeout).inspect_err(|err| {
            warn!(?err, "Could not set receive timeout");
        })
    }

    pub fn set_rcv_timeout_ms(&self, session: &mut TlsSession, msec: u32) -> Result<(), Error> {
        self.set_rcv_timeout(session, Duration::from_millis(msec.into()))
    }

    pub fn set_snd_timeout(&self, session: &mut TlsSession, timeout: Duration) -> Result<(), Error> {
        session.set_snd_timeout(timeout).inspect_err(|err| {
            warn!(?err, "Could not set send timeout");
        })
    }

    pub fn set_snd_timeout_ms(&self, session: &mut TlsSession, msec: u32) -> Result<(), Error> {
        self.set_snd_timeout(session, Duration::from_millis(msec.into()))
    }
}
