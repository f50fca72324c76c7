//! Loopback tests for the plain TCP client and server.
//!
//! Use TEST_LOG environment variable to control tracing verbosity (like -v, -vv, -vvv):
//!
//! ```bash
//! TEST_LOG=2 cargo test --test tcp_client_server -- --nocapture
//! ```

use socketry::prelude::*;
use std::net::SocketAddr;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

static INIT: Once = Once::new();

/// Initialize tracing based on TEST_LOG environment variable
///
/// - TEST_LOG=1: Info level
/// - TEST_LOG=2: Debug level
/// - TEST_LOG=3: Trace level
fn init_tracing() {
    INIT.call_once(|| {
        if let Ok(level_str) = std::env::var("TEST_LOG") {
            let verbosity = level_str.parse::<u8>().unwrap_or(0);

            if verbosity > 0 {
                let level = match verbosity {
                    1 => "info",
                    2 => "debug",
                    _ => "trace", // 3 or more
                };

                let filter = format!("socketry={}", level);
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                    .with_target(true)
                    .with_test_writer()
                    .try_init();
            }
        }
    });
}

// ============================================================================
// Helper Functions
// ============================================================================

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn bound_server() -> (TcpServer, SocketAddr) {
    let mut server = TcpServer::new(Logger::none(), "127.0.0.1", "0").expect("Failed to create server");
    let addr = server.bind().expect("Failed to bind");
    (server, addr)
}

fn connected_client(addr: SocketAddr) -> TcpClient {
    let mut client = TcpClient::new(Logger::none());
    client
        .connect("127.0.0.1", &addr.port().to_string())
        .expect("Failed to connect");
    client
}

fn capture_logger() -> (Logger, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    let logger = Logger::new(move |line| sink.lock().unwrap().push(line.to_string()));
    (logger, lines)
}

// ============================================================================
// Transfers
// ============================================================================

#[test]
fn tcp_exact_transfer_small_to_large() {
    init_tracing();
    const SIZES: [usize; 6] = [1, 17, 4096, 65_537, 1024 * 1024, 10 * 1024 * 1024 + 3];

    let (mut server, addr) = bound_server();
    let server_thread = thread::spawn(move || {
        let mut conn = server.listen(Timeout::INFINITE).expect("Failed to accept");
        for len in SIZES {
            let mut buf = vec![0u8; len];
            let received = server.receive(&mut conn, &mut buf, true).expect("Server receive failed");
            assert_eq!(received, len);
            assert!(buf == pattern(len), "Server got corrupted payload of {len} bytes");
            server.send(&mut conn, &buf).expect("Server send failed");
        }
        server.disconnect(&mut conn).expect("Server disconnect failed");
    });

    let mut client = connected_client(addr);
    for len in SIZES {
        let data = pattern(len);
        client.send(&data).expect("Client send failed");

        let mut echo = vec![0u8; len];
        let received = client.receive(&mut echo, true).expect("Client receive failed");
        assert_eq!(received, len);
        assert!(echo == data, "Client got corrupted echo of {len} bytes");
    }

    server_thread.join().unwrap();
}

#[test]
fn tcp_receive_without_read_fully_returns_first_chunk() {
    init_tracing();
    let (mut server, addr) = bound_server();
    let server_thread = thread::spawn(move || {
        let mut conn = server.listen(Timeout::INFINITE).unwrap();
        server.send(&mut conn, b"hello").unwrap();
        // Keep the connection open until the client is done
        let mut buf = [0u8; 1];
        server.receive(&mut conn, &mut buf, true).unwrap()
    });

    let mut client = connected_client(addr);
    let mut buf = [0u8; 64];
    let received = client.receive(&mut buf, false).unwrap();
    assert!(received > 0 && received <= 5);
    assert_eq!(&buf[..received], &b"hello"[..received]);

    client.disconnect().unwrap();
    assert_eq!(server_thread.join().unwrap(), 0);
}

#[test]
fn tcp_works_through_connection_trait() {
    init_tracing();

    fn roundtrip(conn: &mut impl Connection, msg: &[u8]) -> Vec<u8> {
        conn.send(msg).unwrap();
        let mut buf = vec![0u8; msg.len()];
        let n = conn.receive(&mut buf, true).unwrap();
        buf.truncate(n);
        buf
    }

    let (mut server, addr) = bound_server();
    let server_thread = thread::spawn(move || {
        let mut conn = server.listen(Timeout::INFINITE).unwrap();
        let mut buf = [0u8; 4];
        server.receive(&mut conn, &mut buf, true).unwrap();
        server.send(&mut conn, &buf).unwrap();
    });

    let mut client = connected_client(addr);
    assert!(client.is_connected());
    assert_eq!(roundtrip(&mut client, b"ping"), b"ping");
    Connection::disconnect(&mut client).unwrap();
    assert!(!client.is_connected());

    server_thread.join().unwrap();
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[test]
fn tcp_disconnect_is_idempotent() {
    init_tracing();
    let mut never_connected = TcpClient::new(Logger::none());
    assert!(never_connected.disconnect().is_ok());
    assert!(never_connected.disconnect().is_ok());

    let (mut server, addr) = bound_server();
    let server_thread = thread::spawn(move || {
        let mut conn = server.listen(Timeout::INFINITE).unwrap();
        let mut buf = [0u8; 1];
        let received = server.receive(&mut conn, &mut buf, true).unwrap();
        assert!(server.disconnect(&mut conn).is_ok());
        assert!(server.disconnect(&mut conn).is_ok());
        received
    });

    let mut client = connected_client(addr);
    assert!(client.disconnect().is_ok());
    assert!(client.disconnect().is_ok());
    assert!(!client.is_connected());
    assert_eq!(client.peer_addr(), None);

    assert_eq!(server_thread.join().unwrap(), 0);
}

#[test]
fn tcp_operations_fail_fast_when_not_connected() {
    init_tracing();
    let (log, lines) = capture_logger();
    let mut client = TcpClient::new(log);

    let err = client.send(b"data").unwrap_err();
    assert!(matches!(err, Error::NotConnected));
    assert_eq!(err.kind(), ErrorKind::Transport);

    let mut buf = [0u8; 8];
    let err = client.receive(&mut buf, false).unwrap_err();
    assert!(matches!(err, Error::NotConnected));

    let lines = lines.lock().unwrap();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|line| line.contains("not connected")));
}

#[test]
fn tcp_log_forwarding_follows_settings() {
    init_tracing();
    let (log, lines) = capture_logger();
    let mut client = TcpClient::with_settings(log, Settings::quiet());

    assert!(client.send(b"data").is_err());
    assert!(lines.lock().unwrap().is_empty());
}

#[test]
fn tcp_peer_close_is_distinct_from_errors() {
    init_tracing();
    let (mut server, addr) = bound_server();
    let server_thread = thread::spawn(move || {
        let mut conn = server.listen(Timeout::INFINITE).unwrap();
        server.disconnect(&mut conn).unwrap();
    });

    let mut client = connected_client(addr);
    server_thread.join().unwrap();

    // Peer closed
    let mut buf = [0u8; 16];
    assert_eq!(client.receive(&mut buf, true).unwrap(), 0);

    // Not connected
    client.disconnect().unwrap();
    let err = client.receive(&mut buf, true).unwrap_err();
    assert!(matches!(err, Error::NotConnected));
}

#[test]
fn tcp_connect_while_connected_closes_previous_connection() {
    init_tracing();
    let (log, lines) = capture_logger();
    let (mut server, addr) = bound_server();
    let server_thread = thread::spawn(move || {
        let mut first = server.listen(Timeout::INFINITE).unwrap();
        let mut second = server.listen(Timeout::INFINITE).unwrap();

        let mut buf = [0u8; 8];
        let first_received = server.receive(&mut first, &mut buf, true).unwrap();
        let second_received = server.receive(&mut second, &mut buf[..2], true).unwrap();
        (first_received, second_received, buf)
    });

    let port = addr.port().to_string();
    let mut client = TcpClient::new(log);
    client.connect("127.0.0.1", &port).unwrap();
    let first_local = client.local_addr();
    client.connect("127.0.0.1", &port).unwrap();
    assert_ne!(client.local_addr(), first_local);
    client.send(b"ok").unwrap();

    let (first_received, second_received, buf) = server_thread.join().unwrap();
    assert_eq!(first_received, 0);
    assert_eq!(second_received, 2);
    assert_eq!(&buf[..2], b"ok");

    let lines = lines.lock().unwrap();
    assert!(lines.iter().any(|line| line.contains("automatically closed")));
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn tcp_resolution_errors() {
    init_tracing();
    let mut client = TcpClient::new(Logger::none());
    let err = client.connect("127.0.0.1", "not-a-port").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolution);
    assert!(!client.is_connected());

    let err = TcpServer::new(Logger::none(), "127.0.0.1", "70000").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolution);
}

#[test]
fn tcp_connect_refused_is_a_transport_error() {
    init_tracing();
    let port = {
        let (_server, addr) = bound_server();
        addr.port()
    };

    let mut client = TcpClient::new(Logger::none());
    let err = client.connect("127.0.0.1", &port.to_string()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(!client.is_connected());
}

#[test]
fn tcp_listen_times_out_without_client() {
    init_tracing();
    let (mut server, _addr) = bound_server();

    let start = Instant::now();
    let err = server.listen(Duration::from_millis(150)).unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, Error::AcceptTimedOut { .. }));
    assert!(err.is_timeout());
    assert!(elapsed >= Duration::from_millis(140), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5));
    assert!(server.is_listening());
}

#[test]
fn tcp_listen_default_uses_accept_timeout_setting() {
    init_tracing();
    let settings = Settings {
        accept_timeout: Some(Duration::from_millis(50)),
        ..Settings::default()
    };
    let mut server = TcpServer::with_settings(Logger::none(), settings, "127.0.0.1", "0").unwrap();

    let err = server.listen_default().unwrap_err();
    assert!(matches!(err, Error::AcceptTimedOut { .. }));
}

#[test]
fn tcp_listen_accepts_unbounded_duration() {
    init_tracing();
    let (mut server, addr) = bound_server();
    let server_thread = thread::spawn(move || server.listen(Duration::MAX).map(|_| ()));

    let mut client = connected_client(addr);
    server_thread.join().unwrap().unwrap();
    client.disconnect().unwrap();
}

#[test]
fn tcp_bind_to_address_in_use_is_a_resource_error() {
    init_tracing();
    let (_first, addr) = bound_server();

    let mut second =
        TcpServer::new(Logger::none(), "127.0.0.1", &addr.port().to_string()).unwrap();
    let err = second.bind().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource, "unexpected error: {err}");
    assert!(!second.is_listening());
}

#[test]
fn tcp_receive_timeout_elapses() {
    init_tracing();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let (mut server, addr) = bound_server();
    let server_thread = thread::spawn(move || {
        let mut conn = server.listen(Timeout::INFINITE).unwrap();
        // Send a little, then go quiet
        server.send(&mut conn, b"abc").unwrap();
        done_rx.recv().unwrap();
        server.disconnect(&mut conn).unwrap();
    });

    let mut client = connected_client(addr);
    client.set_rcv_timeout_ms(200).unwrap();

    let mut buf = [0u8; 10];
    let start = Instant::now();
    let err = client.receive(&mut buf, true).unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_timeout(), "unexpected error: {err}");
    match err {
        Error::Transport { transferred, .. } => assert_eq!(transferred, 3),
        other => panic!("unexpected error: {other}"),
    }
    assert!(elapsed >= Duration::from_millis(150), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5));

    done_tx.send(()).unwrap();
    server_thread.join().unwrap();
}

#[test]
fn tcp_send_timeout_reports_bytes_delivered() {
    init_tracing();
    // Far more than the socket buffers of both peers hold
    const LEN: usize = 64 * 1024 * 1024;
    let (read_tx, read_rx) = mpsc::channel::<()>();
    let (mut server, addr) = bound_server();
    let server_thread = thread::spawn(move || {
        let mut conn = server.listen(Timeout::INFINITE).unwrap();
        read_rx.recv().unwrap();
        let mut received = Vec::new();
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            match server.receive(&mut conn, &mut chunk, false).unwrap() {
                0 => break,
                n => received.extend_from_slice(&chunk[..n]),
            }
        }
        received
    });

    let mut client = connected_client(addr);
    client.set_snd_timeout_ms(200).unwrap();

    let data = pattern(LEN);
    let start = Instant::now();
    let err = client.send(&data).unwrap_err();
    assert!(start.elapsed() >= Duration::from_millis(150));
    assert!(err.is_timeout(), "unexpected error: {err}");
    let transferred = match err {
        Error::Transport { transferred, .. } => transferred,
        other => panic!("unexpected error: {other}"),
    };
    assert!(transferred > 0 && transferred < LEN, "transferred {transferred}");

    client.disconnect().unwrap();
    read_tx.send(()).unwrap();

    let received = server_thread.join().unwrap();
    assert_eq!(received.len(), transferred);
    assert!(received[..] == data[..transferred]);
}

#[test]
fn tcp_zero_receive_timeout_fails_immediately() {
    init_tracing();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let (mut server, addr) = bound_server();
    let server_thread = thread::spawn(move || {
        let _conn = server.listen(Timeout::INFINITE).unwrap();
        done_rx.recv().unwrap();
    });

    let mut client = connected_client(addr);
    client.set_rcv_timeout(Duration::ZERO).unwrap();

    let mut buf = [0u8; 4];
    let start = Instant::now();
    let err = client.receive(&mut buf, false).unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err}");
    assert!(start.elapsed() < Duration::from_secs(1));

    done_tx.send(()).unwrap();
    server_thread.join().unwrap();
}

#[test]
fn tcp_settings_timeouts_apply_to_new_connections() {
    init_tracing();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let settings = Settings {
        recv_timeout: Some(Duration::from_millis(100)),
        ..Settings::default()
    };
    let mut server =
        TcpServer::with_settings(Logger::none(), settings.clone(), "127.0.0.1", "0").unwrap();
    let addr = server.bind().unwrap();

    let server_thread = thread::spawn(move || {
        let mut conn = server.listen(Timeout::INFINITE).unwrap();
        assert_eq!(conn.recv_timeout(), Some(Duration::from_millis(100)));
        let mut buf = [0u8; 1];
        let err = server.receive(&mut conn, &mut buf, true).unwrap_err();
        assert!(err.is_timeout());
        done_rx.recv().unwrap();
    });

    let mut client = TcpClient::with_settings(Logger::none(), settings);
    client.connect("127.0.0.1", &addr.port().to_string()).unwrap();
    assert_eq!(client.handle().recv_timeout(), Some(Duration::from_millis(100)));

    let mut buf = [0u8; 1];
    assert!(client.receive(&mut buf, true).unwrap_err().is_timeout());

    done_tx.send(()).unwrap();
    server_thread.join().unwrap();
}

#[test]
fn tcp_server_serves_sequential_clients() {
    init_tracing();
    let (mut server, addr) = bound_server();
    let server_thread = thread::spawn(move || {
        let mut total = 0;
        for _ in 0..3 {
            let mut conn = server.listen(Duration::from_secs(10)).unwrap();
            let mut buf = [0u8; 4];
            total += server.receive(&mut conn, &mut buf, true).unwrap();
            server.disconnect(&mut conn).unwrap();
        }
        total
    });

    for _ in 0..3 {
        let mut client = connected_client(addr);
        client.send(b"four").unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(client.receive(&mut buf, true).unwrap(), 0);
    }

    assert_eq!(server_thread.join().unwrap(), 12);
}
