//! Settings, configuration lookup and error classification.

use socketry::prelude::*;
use std::path::Path;
use std::time::Duration;

#[test]
fn defaults_without_configuration() {
    let settings = Settings::default();
    assert!(settings.enable_log);
    assert_eq!(settings.recv_timeout, None);
    assert_eq!(settings.send_timeout, None);
    assert_eq!(settings.accept_timeout, None);
    assert_eq!(settings.tls_protocol, TlsProtocol::Tls);
    assert_eq!(settings.tls_material, TlsMaterial::default());
    assert_eq!(settings.tls_server_name, None);

    assert!(!Settings::quiet().enable_log);

    let empty = config::Config::builder().build().unwrap();
    let from_empty = Settings::from_config(&empty).unwrap();
    assert!(from_empty.enable_log);
    assert_eq!(from_empty.recv_timeout, None);
}

#[test]
fn reads_all_keys() {
    let config = config::Config::builder()
        .set_default("enable_log", false)
        .unwrap()
        .set_default("recv_timeout_ms", 250)
        .unwrap()
        .set_default("send_timeout_ms", 500)
        .unwrap()
        .set_default("accept_timeout_ms", 0)
        .unwrap()
        .set_default("tls_protocol", "tls13")
        .unwrap()
        .set_default("tls_cert", "/etc/certs/server.pem")
        .unwrap()
        .set_default("tls_key", "/etc/certs/server.key")
        .unwrap()
        .set_default("tls_ca_cert", "")
        .unwrap()
        .set_default("tls_server_name", "example.com")
        .unwrap()
        .build()
        .unwrap();

    let settings = Settings::from_config(&config).unwrap();
    assert!(!settings.enable_log);
    assert_eq!(settings.recv_timeout, Some(Duration::from_millis(250)));
    assert_eq!(settings.send_timeout, Some(Duration::from_millis(500)));
    assert_eq!(settings.accept_timeout, Some(Duration::ZERO));
    assert_eq!(settings.tls_protocol, TlsProtocol::Tls13);
    assert_eq!(
        settings.tls_material.cert_file(),
        Some(Path::new("/etc/certs/server.pem"))
    );
    assert_eq!(
        settings.tls_material.key_file(),
        Some(Path::new("/etc/certs/server.key"))
    );
    // Empty path means unset
    assert_eq!(settings.tls_material.ca_file(), None);
    assert!(settings.tls_material.has_identity());
    assert_eq!(settings.tls_server_name.as_deref(), Some("example.com"));
}

#[test]
fn namespaced_keys_take_priority() {
    let config = config::Config::builder()
        .set_default("recv_timeout_ms", 100)
        .unwrap()
        .set_default("edge.recv_timeout_ms", 900)
        .unwrap()
        .set_default("tls_protocol", "tls12")
        .unwrap()
        .build()
        .unwrap();

    let edge = Settings::from_config_named(&config, "edge").unwrap();
    assert_eq!(edge.recv_timeout, Some(Duration::from_millis(900)));
    // Falls back to the global key
    assert_eq!(edge.tls_protocol, TlsProtocol::Tls12);

    let other = Settings::from_config_named(&config, "other").unwrap();
    assert_eq!(other.recv_timeout, Some(Duration::from_millis(100)));
}

#[test]
fn invalid_tls_protocol_is_rejected() {
    let config = config::Config::builder()
        .set_default("tls_protocol", "sslv3")
        .unwrap()
        .build()
        .unwrap();

    let err = Settings::from_config(&config).unwrap_err();
    match &err {
        Error::InvalidTlsProtocol { got, valid } => {
            assert_eq!(got, "sslv3");
            assert_eq!(valid, &["tls", "tls12", "tls13"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::TlsConfig);
}

#[test]
fn mistyped_value_is_a_config_error() {
    let config = config::Config::builder()
        .set_default("recv_timeout_ms", "soon")
        .unwrap()
        .build()
        .unwrap();

    let err = Settings::from_config(&config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn tls_protocol_parsing() {
    assert_eq!("tls".parse::<TlsProtocol>().unwrap(), TlsProtocol::Tls);
    assert_eq!("TLS12".parse::<TlsProtocol>().unwrap(), TlsProtocol::Tls12);
    assert_eq!(" tls13 ".parse::<TlsProtocol>().unwrap(), TlsProtocol::Tls13);
    assert!("tls10".parse::<TlsProtocol>().is_err());
    assert_eq!(TlsProtocol::Tls12.to_string(), "tls12");
}

#[test]
fn tls_material_treats_empty_paths_as_unset() {
    let mut material = TlsMaterial::new().with_cert_file("cert.pem").with_key_file("");
    assert_eq!(material.cert_file(), Some(Path::new("cert.pem")));
    assert_eq!(material.key_file(), None);
    assert!(!material.has_identity());

    material.set_key_file("key.pem");
    assert!(material.has_identity());
    material.set_cert_file("");
    assert!(!material.has_identity());
}

#[test]
fn tls_error_descriptions() {
    let kinds = [
        TlsErrorKind::WantRead,
        TlsErrorKind::WantWrite,
        TlsErrorKind::ZeroReturn,
        TlsErrorKind::Protocol,
        TlsErrorKind::Syscall,
    ];
    for kind in kinds {
        assert!(!kind.description().is_empty());
        assert!(!kind.to_string().is_empty());
    }
    assert_eq!(
        TlsErrorKind::ZeroReturn.description(),
        "The TLS connection has been closed."
    );

    let err = Error::TlsHandshake {
        kind: TlsErrorKind::WantRead,
        detail: "timed out".to_string(),
    };
    assert!(err.is_timeout());
    assert_eq!(err.kind(), ErrorKind::TlsHandshake);
    assert!(!Error::NotConnected.is_timeout());
}
