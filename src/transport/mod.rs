//! Transport layer: owned sockets, readiness polling, and plain/TLS
//! clients and servers.
//!
//! Every operation is blocking. A server serves one client handle per call;
//! run accepted clients on their own threads if they must progress
//! concurrently.

mod handle;
mod poller;
mod tcp;
#[cfg(feature = "tls")]
mod tls;
#[cfg(feature = "tls")]
mod tls_config;

pub use handle::{Status, TransportHandle};
pub use poller::{wait_ready, Interest, Readiness, Timeout};
pub use tcp::{TcpClient, TcpServer};
#[cfg(feature = "tls")]
pub use tls::{SessionState, TlsClient, TlsRole, TlsServer, TlsSession};
#[cfg(feature = "tls")]
pub use tls_config::{TlsMaterial, TlsProtocol};
#[cfg(feature = "tls")]
pub(crate) use tls_config::install_crypto_provider;

use crate::error::Error;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};

/// Byte-stream operations shared by plain and TLS connections.
pub trait Connection {
    /// Sends the whole buffer or fails.
    fn send(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Receives into `buf`.
    ///
    /// With `read_fully` the call keeps reading until `buf` is full, the peer
    /// closes, or an error occurs. Otherwise it returns after the first
    /// successful read. `Ok(0)` means the peer closed the connection.
    fn receive(&mut self, buf: &mut [u8], read_fully: bool) -> Result<usize, Error>;

    /// Closes the connection. Calling it again is a no-op.
    fn disconnect(&mut self) -> Result<(), Error>;

    fn is_connected(&self) -> bool;
}

// ============================================================================
// Full-transfer loops
// ============================================================================

// A transfer that stopped early. `transferred` bytes made it through.
#[derive(Debug)]
pub(crate) struct PartialTransfer {
    pub(crate) transferred: usize,
    pub(crate) source: io::Error,
}

impl PartialTransfer {
    pub(crate) fn into_error(self, operation: &'static str) -> Error {
        Error::Transport {
            operation,
            transferred: self.transferred,
            source: self.source,
        }
    }
}

// Progress of one send or receive. Kept across short reads/writes so that a
// retried primitive always resumes at the same offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transfer {
    offset: usize,
    len: usize,
}

impl Transfer {
    pub(crate) fn new(len: usize) -> Self {
        Self { offset: 0, len }
    }

    /// A transfer of `len` bytes that already moved `offset` of them.
    #[cfg(feature = "tls")]
    pub(crate) fn resume(len: usize, offset: usize) -> Self {
        Self {
            offset: offset.min(len),
            len,
        }
    }

    #[cfg(feature = "tls")]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn is_done(&self) -> bool {
        self.offset >= self.len
    }

    fn advance(&mut self, count: usize) {
        self.offset += count;
    }

    fn fail(&self, source: io::Error) -> PartialTransfer {
        PartialTransfer {
            transferred: self.offset,
            source,
        }
    }
}

/// Writes all of `data`, retrying short writes.
pub(crate) fn send_all<W: Write>(writer: &mut W, data: &[u8]) -> Result<(), PartialTransfer> {
    send_from(writer, data, Transfer::new(data.len()))
}

/// Writes `data` from where `transfer` stopped, then flushes the writer.
///
/// Bytes a buffering writer accepted count as transferred even if the final
/// flush fails.
pub(crate) fn send_from<W: Write>(
    writer: &mut W,
    data: &[u8],
    mut transfer: Transfer,
) -> Result<(), PartialTransfer> {
    while !transfer.is_done() {
        match writer.write(&data[transfer.offset..]) {
            Ok(0) => return Err(transfer.fail(io::Error::from(ErrorKind::WriteZero))),
            Ok(sz) => transfer.advance(sz),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(transfer.fail(err)),
        }
    }
    loop {
        match writer.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(transfer.fail(err)),
        }
    }
}

/// Reads into `buf`; see [`Connection::receive`] for the stopping rules.
pub(crate) fn receive_into<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    read_fully: bool,
) -> Result<usize, PartialTransfer> {
    receive_from(reader, buf, read_fully, Transfer::new(buf.len()))
}

/// Like [`receive_into`], with `buf[..offset]` already filled by an earlier
/// attempt. Returns the total filled.
pub(crate) fn receive_from<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    read_fully: bool,
    mut transfer: Transfer,
) -> Result<usize, PartialTransfer> {
    while !transfer.is_done() {
        match reader.read(&mut buf[transfer.offset..]) {
            // Peer closed
            Ok(0) => break,
            Ok(sz) => {
                transfer.advance(sz);
                if !read_fully {
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(transfer.fail(err)),
        }
    }
    Ok(transfer.offset)
}

// ============================================================================
// Address resolution
// ============================================================================

/// Resolves `host`/`port`, preferring IPv4 results.
pub(crate) fn resolve(host: &str, port: &str) -> Result<SocketAddr, Error> {
    let resolution = |source: io::Error| Error::Resolution {
        host: host.to_string(),
        port: port.to_string(),
        source,
    };

    let port_number: u16 = port.trim().parse().map_err(|_| {
        resolution(io::Error::new(
            ErrorKind::InvalidInput,
            "port must be a number between 0 and 65535",
        ))
    })?;
    let addrs: Vec<SocketAddr> = (host, port_number)
        .to_socket_addrs()
        .map_err(resolution)?
        .collect();

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            resolution(io::Error::new(
                ErrorKind::NotFound,
                "address resolution returned no results",
            ))
        })
}
