use std::time::Duration;
use thiserror::Error;

/// The error type for socketry operations.
///
/// Errors are grouped by the layer that produced them. Use [`Error::kind()`]
/// to branch on the broad cause (resolution, resource, transport, TLS setup,
/// TLS handshake) without matching every variant.
///
/// No operation retries on its own. Reconnect or backoff policies belong to
/// the caller.
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // I/O and Networking Errors
    // ============================================================================
    /// The host/port pair could not be resolved to a socket address.
    #[error("Could not resolve {host}:{port}: {source}")]
    Resolution {
        host: String,
        port: String,
        source: std::io::Error,
    },

    /// The OS refused a descriptor, a socket option, or a bind/listen call.
    #[error("{operation} failed: {source}")]
    Resource {
        operation: &'static str,
        source: std::io::Error,
    },

    /// A connect/accept/send/recv syscall failed.
    ///
    /// `transferred` counts the bytes moved before the failure. For sends
    /// those bytes may already be on the wire.
    #[error("{operation} failed after {transferred} bytes: {source}")]
    Transport {
        operation: &'static str,
        transferred: usize,
        source: std::io::Error,
    },

    /// The object has no live connection. Returned before any I/O happens.
    #[error("Not connected")]
    NotConnected,

    /// No client connected within the requested wait.
    #[error("No incoming connection within {timeout:?}")]
    AcceptTimedOut { timeout: Duration },

    /// The readiness poller itself failed.
    #[error("Poll error: {0}")]
    Poll(std::io::Error),

    // ============================================================================
    // TLS Errors
    // ============================================================================
    /// Failed to load TLS certificate file from disk.
    #[error("Failed to load certificate from {path}: {source}")]
    TlsCertificateLoad {
        path: String,
        source: std::io::Error,
    },

    /// Failed to load TLS private key file from disk.
    #[error("Failed to load private key from {path}: {source}")]
    TlsKeyLoad {
        path: String,
        source: std::io::Error,
    },

    /// Certificate file format is invalid or unsupported.
    #[error("Invalid certificate format: {0}")]
    TlsInvalidCertificate(String),

    /// Private key file format is invalid or unsupported.
    #[error("Invalid private key format: {0}")]
    TlsInvalidKey(String),

    /// Server name for TLS SNI is invalid.
    #[error("Invalid server name '{0}'")]
    TlsInvalidServerName(String),

    /// A TLS operation was attempted before `setup_context()`.
    #[error("TLS context not set up")]
    TlsContextMissing,

    /// The crypto provider cannot serve the requested protocol policy.
    #[error("Failed to create TLS context: {0}")]
    TlsContext(String),

    /// Server role without a certificate and private key.
    ///
    /// Set both `tls_cert` and `tls_key` (or call the matching setters) before
    /// calling `listen()`.
    #[error("TLS server certificate and private key are required")]
    TlsServerConfigMissing,

    /// Failed to build TLS server configuration from the loaded material.
    #[error("Failed to build TLS server config: {0}")]
    TlsServerConfigBuild(String),

    /// Failed to build TLS client configuration from the loaded material.
    #[error("Failed to build TLS client config: {0}")]
    TlsClientConfigBuild(String),

    /// The TLS handshake was rejected or aborted by either peer.
    #[error("TLS handshake failed ({kind}): {detail}")]
    TlsHandshake { kind: TlsErrorKind, detail: String },

    /// An encrypted send or receive failed.
    #[error("TLS {operation} failed after {transferred} bytes ({kind}): {detail}")]
    TlsIo {
        operation: &'static str,
        kind: TlsErrorKind,
        transferred: usize,
        detail: String,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    /// Configuration file parsing or key lookup failed.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Invalid value for the `tls_protocol` configuration key.
    #[error("Invalid TLS protocol '{got}', expected one of: {}", .valid.join(", "))]
    InvalidTlsProtocol { got: String, valid: Vec<String> },
}

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Address or port could not be resolved.
    Resolution,
    /// Descriptor allocation, socket option, bind or listen failure.
    Resource,
    /// Connect/accept/send/recv failure, including "not connected".
    Transport,
    /// Missing or invalid TLS material, or TLS context failure.
    TlsConfig,
    /// TLS handshake rejected or aborted.
    TlsHandshake,
    /// Encrypted send/receive failure.
    TlsIo,
    /// Configuration lookup failure.
    Config,
}

impl Error {
    /// Returns the broad cause of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Resolution { .. } => ErrorKind::Resolution,
            Error::Resource { .. } => ErrorKind::Resource,
            Error::Transport { .. }
            | Error::NotConnected
            | Error::AcceptTimedOut { .. }
            | Error::Poll(_) => ErrorKind::Transport,
            Error::TlsCertificateLoad { .. }
            | Error::TlsKeyLoad { .. }
            | Error::TlsInvalidCertificate(_)
            | Error::TlsInvalidKey(_)
            | Error::TlsInvalidServerName(_)
            | Error::TlsContextMissing
            | Error::TlsContext(_)
            | Error::TlsServerConfigMissing
            | Error::TlsServerConfigBuild(_)
            | Error::TlsClientConfigBuild(_)
            | Error::InvalidTlsProtocol { .. } => ErrorKind::TlsConfig,
            Error::TlsHandshake { .. } => ErrorKind::TlsHandshake,
            Error::TlsIo { .. } => ErrorKind::TlsIo,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Returns true if the failure was a timeout on a blocking operation.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::AcceptTimedOut { .. } => true,
            Error::Transport { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
            Error::TlsIo { kind, .. } | Error::TlsHandshake { kind, .. } => {
                matches!(kind, TlsErrorKind::WantRead | TlsErrorKind::WantWrite)
            }
            _ => false,
        }
    }
}

/// Classification of TLS-level failures.
///
/// `WantRead` and `WantWrite` mean the operation could not complete before the
/// transport gave up (usually a configured timeout). Only the exact same call
/// with the same arguments may be re-issued after them; a session send or
/// receive then continues where the failed call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsErrorKind {
    /// More data had to be read from the peer.
    WantRead,
    /// More data had to be written to the peer.
    WantWrite,
    /// The peer closed the TLS connection.
    ZeroReturn,
    /// The TLS library rejected the peer's data, usually a protocol error.
    Protocol,
    /// An I/O error occurred on the underlying transport.
    Syscall,
}

impl TlsErrorKind {
    /// Human-readable description of this classification.
    pub fn description(&self) -> &'static str {
        match self {
            TlsErrorKind::WantRead => {
                "The read operation did not complete; \
                 the same TLS I/O function should be called again later."
            }
            TlsErrorKind::WantWrite => {
                "The write operation did not complete; \
                 the same TLS I/O function should be called again later."
            }
            TlsErrorKind::ZeroReturn => "The TLS connection has been closed.",
            TlsErrorKind::Protocol => {
                "A failure in the TLS library occurred, usually a protocol error."
            }
            TlsErrorKind::Syscall => "Some I/O error occurred on the underlying socket.",
        }
    }
}

impl std::fmt::Display for TlsErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TlsErrorKind::WantRead => "want read",
            TlsErrorKind::WantWrite => "want write",
            TlsErrorKind::ZeroReturn => "zero return",
            TlsErrorKind::Protocol => "protocol",
            TlsErrorKind::Syscall => "syscall",
        };
        f.write_str(name)
    }
}
