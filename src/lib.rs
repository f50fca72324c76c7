//! Socketry - portable blocking TCP and TLS sockets for Rust
//!
//! Socketry wraps the platform socket API in a small set of owned, blocking
//! types: [`TcpClient`] and [`TcpServer`] for plain TCP, [`TlsClient`],
//! [`TlsServer`] and [`TlsSession`] for TLS on top of rustls. Every send
//! writes the whole buffer, receives can wait for a full buffer, and every
//! failure comes back as a typed [`Error`].
//!
//! Servers hand out one connection per `listen` call. Serve concurrent clients
//! by moving each accepted connection onto its own thread.
//!
//! Diagnostics are emitted with `tracing`; a [`Logger`] additionally forwards
//! them to a plain callback.

// Internal-only modules
pub(crate) mod config;
pub(crate) mod error;
pub(crate) mod log;
pub(crate) mod runtime;
pub(crate) mod transport;

// These are the intended public API
pub use crate::config::Settings;
pub use error::{Error, ErrorKind, TlsErrorKind};
pub use log::{LogFn, Logger};
pub use runtime::{runtime, secure_socket_count, socket_count, Runtime};
pub use transport::{
    wait_ready, Connection, Interest, Readiness, Status, TcpClient, TcpServer, Timeout,
    TransportHandle,
};

// TLS support (optional feature, enabled by default)
#[cfg(feature = "tls")]
pub use transport::{
    SessionState, TlsClient, TlsMaterial, TlsProtocol, TlsRole, TlsServer, TlsSession,
};

// Socket domains for TransportHandle::create
pub use socket2::Domain;

/// Convenient re-exports of commonly used types.
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::error::{Error, ErrorKind, TlsErrorKind};
    pub use crate::log::Logger;
    pub use crate::transport::{
        wait_ready, Connection, Interest, Readiness, TcpClient, TcpServer, Timeout,
        TransportHandle,
    };

    // TLS support (optional feature, enabled by default)
    #[cfg(feature = "tls")]
    pub use crate::transport::{TlsClient, TlsMaterial, TlsProtocol, TlsServer, TlsSession};
}
