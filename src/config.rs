//! Settings for sockets, optionally read from a [`config::Config`].

use crate::error::Error;
use ::config::Config;
use std::time::Duration;

#[cfg(feature = "tls")]
use crate::transport::{TlsMaterial, TlsProtocol};

pub(crate) fn get_namespaced_value<T, F>(
    config: &Config,
    name: &str,
    key: &str,
    getter: F,
) -> Result<T, config::ConfigError>
where
    F: Fn(&Config, &str) -> Result<T, config::ConfigError>,
{
    if name.is_empty() {
        getter(config, key)
    } else {
        getter(config, &format!("{name}.{key}")).or_else(|_| getter(config, key))
    }
}

pub(crate) fn get_namespaced_u64(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<u64, config::ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<u64>(key))
}

pub(crate) fn get_namespaced_bool(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<bool, config::ConfigError> {
    get_namespaced_value(config, name, key, Config::get_bool)
}

#[cfg(feature = "tls")]
pub(crate) fn get_namespaced_string(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<String, config::ConfigError> {
    get_namespaced_value(config, name, key, Config::get_string)
}

// Missing keys fall back to the default; anything else is a real error.
fn optional<T>(result: Result<T, config::ConfigError>) -> Result<Option<T>, Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Behaviour shared by every socket object.
///
/// # Configuration Keys
///
/// - `enable_log`: forward diagnostic lines to the log callback (default `true`)
/// - `recv_timeout_ms`, `send_timeout_ms`: applied to every new connection
/// - `accept_timeout_ms`: default wait for [`TcpServer::listen_default`](crate::TcpServer::listen_default)
/// - `tls_protocol`: `"tls"`, `"tls12"` or `"tls13"` (default `"tls"`)
/// - `tls_cert`, `tls_key`, `tls_ca_cert`: PEM file paths
/// - `tls_server_name`: SNI name used by TLS clients
///
/// # Example
///
/// ```toml
/// enable_log = true
/// recv_timeout_ms = 5000
///
/// [secure_server]
/// tls_cert = "/path/to/cert.pem"
/// tls_key = "/path/to/key.pem"
/// ```
#[derive(Debug, Clone)]
pub struct Settings {
    pub enable_log: bool,
    pub recv_timeout: Option<Duration>,
    pub send_timeout: Option<Duration>,
    pub accept_timeout: Option<Duration>,
    #[cfg(feature = "tls")]
    pub tls_protocol: TlsProtocol,
    #[cfg(feature = "tls")]
    pub tls_material: TlsMaterial,
    #[cfg(feature = "tls")]
    pub tls_server_name: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_log: true,
            recv_timeout: None,
            send_timeout: None,
            accept_timeout: None,
            #[cfg(feature = "tls")]
            tls_protocol: TlsProtocol::default(),
            #[cfg(feature = "tls")]
            tls_material: TlsMaterial::default(),
            #[cfg(feature = "tls")]
            tls_server_name: None,
        }
    }
}

impl Settings {
    /// Settings with log forwarding switched off.
    pub fn quiet() -> Self {
        Self {
            enable_log: false,
            ..Self::default()
        }
    }

    /// Reads settings from configuration.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Self::from_config_named(config, "")
    }

    /// Reads settings with configuration namespacing.
    ///
    /// Lookup follows this priority:
    /// 1. `{name}.{key}` (e.g., `secure_server.tls_cert`)
    /// 2. `{key}` (e.g., `tls_cert`)
    /// 3. Hard-coded default
    pub fn from_config_named(config: &Config, name: &str) -> Result<Self, Error> {
        let mut settings = Self::default();

        if let Some(enable_log) = optional(get_namespaced_bool(config, name, "enable_log"))? {
            settings.enable_log = enable_log;
        }
        settings.recv_timeout = optional(get_namespaced_u64(config, name, "recv_timeout_ms"))?
            .map(Duration::from_millis);
        settings.send_timeout = optional(get_namespaced_u64(config, name, "send_timeout_ms"))?
            .map(Duration::from_millis);
        settings.accept_timeout =
            optional(get_namespaced_u64(config, name, "accept_timeout_ms"))?
                .map(Duration::from_millis);

        #[cfg(feature = "tls")]
        {
            if let Some(protocol) = optional(get_namespaced_string(config, name, "tls_protocol"))? {
                settings.tls_protocol = protocol.parse()?;
            }
            let material = &mut settings.tls_material;
            if let Some(path) = optional(get_namespaced_string(config, name, "tls_cert"))? {
                material.set_cert_file(path);
            }
            if let Some(path) = optional(get_namespaced_string(config, name, "tls_key"))? {
                material.set_key_file(path);
            }
            if let Some(path) = optional(get_namespaced_string(config, name, "tls_ca_cert"))? {
                material.set_ca_file(path);
            }
            settings.tls_server_name =
                optional(get_namespaced_string(config, name, "tls_server_name"))?
                    .filter(|name| !name.is_empty());
        }

        Ok(settings)
    }
}
