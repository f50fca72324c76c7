use crate::error::Error;
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig, SupportedProtocolVersion};
use rustls_pemfile::{certs, private_key};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// Protocol policy
// ============================================================================

/// Which TLS versions a context may negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsProtocol {
    /// TLS 1.2 and TLS 1.3, whichever the peer prefers.
    #[default]
    Tls,
    /// TLS 1.2 only.
    Tls12,
    /// TLS 1.3 only.
    Tls13,
}

impl TlsProtocol {
    const NAMES: [&'static str; 3] = ["tls", "tls12", "tls13"];

    pub fn as_str(&self) -> &'static str {
        match self {
            TlsProtocol::Tls => "tls",
            TlsProtocol::Tls12 => "tls12",
            TlsProtocol::Tls13 => "tls13",
        }
    }

    fn versions(&self) -> &'static [&'static SupportedProtocolVersion] {
        static MODERN: [&SupportedProtocolVersion; 2] =
            [&rustls::version::TLS13, &rustls::version::TLS12];
        static ONLY_TLS12: [&SupportedProtocolVersion; 1] = [&rustls::version::TLS12];
        static ONLY_TLS13: [&SupportedProtocolVersion; 1] = [&rustls::version::TLS13];

        match self {
            TlsProtocol::Tls => &MODERN,
            TlsProtocol::Tls12 => &ONLY_TLS12,
            TlsProtocol::Tls13 => &ONLY_TLS13,
        }
    }
}

impl FromStr for TlsProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tls" => Ok(TlsProtocol::Tls),
            "tls12" => Ok(TlsProtocol::Tls12),
            "tls13" => Ok(TlsProtocol::Tls13),
            _ => Err(Error::InvalidTlsProtocol {
                got: s.to_string(),
                valid: Self::NAMES.iter().map(|name| name.to_string()).collect(),
            }),
        }
    }
}

impl fmt::Display for TlsProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Material paths
// ============================================================================

/// Paths to PEM certificate material.
///
/// Setting an empty path leaves the entry unset. Files are only read when a
/// context loads them, right before the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    ca_file: Option<PathBuf>,
}

fn non_empty(path: PathBuf) -> Option<PathBuf> {
    (!path.as_os_str().is_empty()).then_some(path)
}

impl TlsMaterial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cert_file(&mut self, path: impl Into<PathBuf>) {
        self.cert_file = non_empty(path.into());
    }

    pub fn set_key_file(&mut self, path: impl Into<PathBuf>) {
        self.key_file = non_empty(path.into());
    }

    pub fn set_ca_file(&mut self, path: impl Into<PathBuf>) {
        self.ca_file = non_empty(path.into());
    }

    pub fn with_cert_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.set_cert_file(path);
        self
    }

    pub fn with_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.set_key_file(path);
        self
    }

    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.set_ca_file(path);
        self
    }

    pub fn cert_file(&self) -> Option<&Path> {
        self.cert_file.as_deref()
    }

    pub fn key_file(&self) -> Option<&Path> {
        self.key_file.as_deref()
    }

    pub fn ca_file(&self) -> Option<&Path> {
        self.ca_file.as_deref()
    }

    /// True when both a certificate and a private key are set.
    pub fn has_identity(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }
}

// ============================================================================
// PEM loading
// ============================================================================

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let file = File::open(path).map_err(|e| Error::TlsCertificateLoad {
        path: path.display().to_string(),
        source: e,
    })?;
    let chain: Vec<CertificateDer<'static>> = certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::TlsInvalidCertificate(format!("Failed to parse certificates: {e}")))?;

    if chain.is_empty() {
        return Err(Error::TlsInvalidCertificate(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(chain)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, Error> {
    let file = File::open(path).map_err(|e| Error::TlsKeyLoad {
        path: path.display().to_string(),
        source: e,
    })?;
    private_key(&mut BufReader::new(file))
        .map_err(|e| Error::TlsInvalidKey(format!("Failed to parse private key: {e}")))?
        .ok_or_else(|| {
            Error::TlsInvalidKey(format!("No private key found in {}", path.display()))
        })
}

// ============================================================================
// Crypto provider
// ============================================================================

/// Installs the ring provider as the process default unless one is set.
pub(crate) fn install_crypto_provider() {
    if CryptoProvider::get_default().is_none()
        && ring::default_provider().install_default().is_err()
    {
        // Another thread won the race; its provider is used.
        debug!("Crypto provider already installed");
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(ring::default_provider()))
}

// ============================================================================
// Context
// ============================================================================

/// Per-connection TLS context: protocol policy and loaded material.
pub(crate) struct TlsContext {
    protocol: TlsProtocol,
    provider: Arc<CryptoProvider>,
    cert_chain: Vec<CertificateDer<'static>>,
    key: Option<PrivateKeyDer<'static>>,
    roots: Option<RootCertStore>,
}

impl TlsContext {
    /// Fails if the crypto provider has no cipher suite for `protocol`.
    pub(crate) fn new(protocol: TlsProtocol) -> Result<Self, Error> {
        let provider = crypto_provider();
        ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(protocol.versions())
            .map_err(|e| Error::TlsContext(format!("{protocol}: {e}")))?;

        Ok(Self {
            protocol,
            provider,
            cert_chain: Vec::new(),
            key: None,
            roots: None,
        })
    }

    pub(crate) fn protocol(&self) -> TlsProtocol {
        self.protocol
    }

    pub(crate) fn load_certificate(&mut self, path: &Path) -> Result<(), Error> {
        self.cert_chain = load_certs(path)?;
        debug!(path = %path.display(), len = self.cert_chain.len(), "Loaded certificate chain");
        Ok(())
    }

    pub(crate) fn load_private_key(&mut self, path: &Path) -> Result<(), Error> {
        self.key = Some(load_key(path)?);
        debug!(path = %path.display(), "Loaded private key");
        Ok(())
    }

    pub(crate) fn load_trusted_ca(&mut self, path: &Path) -> Result<(), Error> {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(path)? {
            roots
                .add(cert)
                .map_err(|e| Error::TlsInvalidCertificate(e.to_string()))?;
        }
        debug!(path = %path.display(), len = roots.len(), "Loaded trusted CAs");
        self.roots = Some(roots);
        Ok(())
    }

    /// Loads whichever entries of `material` are set.
    pub(crate) fn load_material(&mut self, material: &TlsMaterial) -> Result<(), Error> {
        if let Some(path) = material.cert_file() {
            self.load_certificate(path)?;
        }
        if let Some(path) = material.key_file() {
            self.load_private_key(path)?;
        }
        if let Some(path) = material.ca_file() {
            self.load_trusted_ca(path)?;
        }
        Ok(())
    }

    pub(crate) fn client_config(&self) -> Result<Arc<ClientConfig>, Error> {
        let roots = match &self.roots {
            Some(roots) => roots.clone(),
            None => {
                warn!("No trusted CA loaded; the server certificate cannot be verified");
                RootCertStore::empty()
            }
        };

        let builder = ClientConfig::builder_with_provider(self.provider.clone())
            .with_protocol_versions(self.protocol.versions())
            .map_err(|e| Error::TlsClientConfigBuild(e.to_string()))?
            .with_root_certificates(roots);

        let config = match (self.cert_chain.is_empty(), &self.key) {
            (true, None) => builder.with_no_client_auth(),
            (false, Some(key)) => builder
                .with_client_auth_cert(self.cert_chain.clone(), key.clone_key())
                .map_err(|e| Error::TlsClientConfigBuild(e.to_string()))?,
            _ => {
                return Err(Error::TlsClientConfigBuild(
                    "client certificate and private key must be set together".to_string(),
                ))
            }
        };

        Ok(Arc::new(config))
    }

    pub(crate) fn server_config(&self) -> Result<Arc<ServerConfig>, Error> {
        let Some(key) = self.key.as_ref().filter(|_| !self.cert_chain.is_empty()) else {
            return Err(Error::TlsServerConfigMissing);
        };

        let builder = ServerConfig::builder_with_provider(self.provider.clone())
            .with_protocol_versions(self.protocol.versions())
            .map_err(|e| Error::TlsServerConfigBuild(e.to_string()))?;

        // A trusted CA turns on optional client certificate verification
        let builder = match &self.roots {
            Some(roots) => {
                let verifier = WebPkiClientVerifier::builder_with_provider(
                    Arc::new(roots.clone()),
                    self.provider.clone(),
                )
                .allow_unauthenticated()
                .build()
                .map_err(|e| Error::TlsServerConfigBuild(e.to_string()))?;
                builder.with_client_cert_verifier(verifier)
            }
            None => builder.with_no_client_auth(),
        };

        let config = builder
            .with_single_cert(self.cert_chain.clone(), key.clone_key())
            .map_err(|e| Error::TlsServerConfigBuild(e.to_string()))?;

        Ok(Arc::new(config))
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("protocol", &self.protocol)
            .field("certificates", &self.cert_chain.len())
            .field("private_key", &self.key.is_some())
            .field("trusted_cas", &self.roots.as_ref().map(RootCertStore::len))
            .finish()
    }
}
