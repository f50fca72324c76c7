//! Process-wide socket counters.
//!
//! Kept as the only test in this binary so that no other test creates sockets
//! while the counts are checked.

use socketry::prelude::*;
use socketry::{runtime, secure_socket_count, socket_count};
use std::thread;

#[test]
fn socket_counters_follow_object_lifetimes() {
    assert_eq!(socket_count(), 0);
    assert_eq!(secure_socket_count(), 0);

    let mut server = TcpServer::new(Logger::none(), "127.0.0.1", "0").unwrap();
    let addr = server.bind().unwrap();
    assert_eq!(socket_count(), 1);

    let server_thread = thread::spawn(move || {
        for _ in 0..2 {
            let mut conn = server.listen(Timeout::INFINITE).unwrap();
            let mut buf = [0u8; 1];
            server.receive(&mut conn, &mut buf, true).unwrap();
        }
    });

    {
        let port = addr.port().to_string();
        let mut client = TcpClient::new(Logger::none());
        assert_eq!(socket_count(), 2);

        // Reconnecting reuses the same object
        client.connect("127.0.0.1", &port).unwrap();
        client.connect("127.0.0.1", &port).unwrap();
        assert_eq!(runtime().socket_count(), 2);
    }
    server_thread.join().unwrap();
    assert_eq!(socket_count(), 0);

    {
        let tls_client = TlsClient::new(Logger::none());
        let tls_server = TlsServer::new(Logger::none(), "127.0.0.1", "0").unwrap();
        assert_eq!(secure_socket_count(), 2);
        assert_eq!(socket_count(), 2);
        drop(tls_client);
        assert_eq!(secure_socket_count(), 1);
        drop(tls_server);
    }
    assert_eq!(socket_count(), 0);
    assert_eq!(secure_socket_count(), 0);

    // Counters start over after dropping to zero
    let client = TcpClient::new(Logger::none());
    assert_eq!(socket_count(), 1);
    drop(client);
    assert_eq!(socket_count(), 0);
}
