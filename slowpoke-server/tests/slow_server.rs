//! End-to-end tests against a running demo server.

use slowpoke_core::Behavior;
use slowpoke_server::{DemoServer, ServerConfig, SlowServer};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::{Duration, Instant};

fn fetch(addr: SocketAddr, path: &str) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    write!(stream, "GET {path} HTTP/1.0\r\nHost: test\r\n\r\n").unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    response
}

fn body(response: &[u8]) -> &[u8] {
    let start = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
        .unwrap();
    &response[start..]
}

fn write_file(root: &Path, name: &str, len: usize) -> Vec<u8> {
    let content: Vec<u8> = (0..len).map(|i| b'a' + (i % 26) as u8).collect();
    std::fs::write(root.join(name), &content).unwrap();
    content
}

#[test]
fn slow_server_chunks_responses() {
    let dir = tempfile::tempdir().unwrap();
    let content = write_file(dir.path(), "data.txt", 200);

    let delay = Duration::from_millis(30);
    let server = SlowServer::builder()
        .host("127.0.0.1")
        .port(0)
        .root(dir.path())
        .delay(delay)
        .chunk_len(NonZeroUsize::new(100).unwrap())
        .start()
        .unwrap();

    let start = Instant::now();
    let response = fetch(server.addr(), "/data.txt");
    let elapsed = start.elapsed();

    assert!(response.starts_with(b"HTTP/1.0 200 OK"));
    assert_eq!(body(&response), content.as_slice());
    // The header and the body take two chunks each.
    assert!(elapsed >= delay * 4, "{elapsed:?}");
}

#[test]
fn controller_changes_apply_to_next_connection() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "data.txt", 64);

    let server = SlowServer::builder()
        .host("127.0.0.1")
        .port(0)
        .root(dir.path())
        .delay(Duration::from_secs(30))
        .start()
        .unwrap();
    server.controller().set_delay(Duration::ZERO);

    let start = Instant::now();
    let response = fetch(server.addr(), "/data.txt");
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(body(&response).len(), 64);
}

#[test]
fn closing_server_sends_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "index.html", 10);
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        root: dir.path().to_path_buf(),
        read_timeout_secs: 5,
    };
    let handle = DemoServer::bind(&config, Behavior::CloseUponAcceptance)
        .unwrap()
        .spawn()
        .unwrap();

    let mut stream = TcpStream::connect(handle.addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut buf = [0u8; 64];
    // A reset is as good as EOF for a client that got nothing.
    let n = stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0);

    handle.stop().unwrap();
}

#[test]
fn missing_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let server = SlowServer::builder()
        .host("127.0.0.1")
        .port(0)
        .root(dir.path())
        .delay(Duration::ZERO)
        .start()
        .unwrap();

    let response = fetch(server.addr(), "/missing.txt");
    assert!(response.starts_with(b"HTTP/1.0 404 Not Found"));
}
