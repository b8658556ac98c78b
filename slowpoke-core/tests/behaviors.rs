//! Behaviors over real loopback TCP connections.

use slowpoke_core::{
    close_upon_acceptance, delay_before_sending, delay_before_sending_once,
    delay_before_sending_upon_acceptance, ensure_patchable, Endpoint, Operation, PatchableEndpoint,
};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::num::NonZeroUsize;
use std::thread;
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(50);

fn len(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

/// A connected pair: the server side patched for sending, the client side plain.
fn patched_pair() -> (Box<dyn Endpoint>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    (ensure_patchable(Box::new(server), &Operation::SENDING), client)
}

fn read_exactly(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).unwrap();
    buf
}

#[test]
fn send_all_arrives_complete_and_in_order() {
    let (mut server, mut client) = patched_pair();
    delay_before_sending(server.as_mut(), TICK, len(4)).unwrap();
    let payload: Vec<u8> = (0u8..10).collect();

    let start = Instant::now();
    server.send_all(&payload).unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= TICK * 3, "three chunks, three delays: {elapsed:?}");
    assert_eq!(read_exactly(&mut client, payload.len()), payload);
}

#[test]
fn partial_send_is_a_prefix() {
    let (mut server, mut client) = patched_pair();
    delay_before_sending(server.as_mut(), Duration::ZERO, len(3)).unwrap();

    let sent = server.send(b"hello world").unwrap();
    assert!(sent <= 3);
    assert_eq!(read_exactly(&mut client, sent), &b"hello world"[..sent]);
}

#[test]
fn delay_once_then_fast() {
    let (mut server, mut client) = patched_pair();
    let controller = delay_before_sending_once(server.as_mut(), TICK).unwrap();

    let start = Instant::now();
    server.send_all(b"one").unwrap();
    assert!(start.elapsed() >= TICK);

    let start = Instant::now();
    server.send_all(b"two").unwrap();
    assert!(start.elapsed() < TICK);

    controller.reset();
    let start = Instant::now();
    server.send_all(b"three").unwrap();
    assert!(start.elapsed() >= TICK);

    assert_eq!(read_exactly(&mut client, 11), b"onetwothree");
}

#[test]
fn closed_upon_acceptance_client_sees_eof() {
    let mut listener = PatchableEndpoint::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    close_upon_acceptance(&mut listener).unwrap();

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut buf = [0u8; 16];
        // A reset is as good as EOF for a client that got nothing.
        stream.read(&mut buf).unwrap_or(0)
    });

    let (conn, peer) = listener.accept().unwrap();
    assert_eq!(conn.peer_addr().unwrap(), peer);
    assert_eq!(client.join().unwrap(), 0);
}

#[test]
fn accepted_connections_are_slowed() {
    let mut listener = PatchableEndpoint::bind("127.0.0.1:0").unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let controller = delay_before_sending_upon_acceptance(&mut listener, TICK, len(2)).unwrap();

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"hi").unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).unwrap();
        received
    });

    let (mut conn, _) = listener.accept().unwrap();
    assert!(conn.is_replaceable(Operation::SendAll));
    let mut greeting = [0u8; 2];
    let mut read = 0;
    while read < greeting.len() {
        read += conn.recv(&mut greeting[read..]).unwrap();
    }
    assert_eq!(&greeting, b"hi");

    let start = Instant::now();
    conn.send_all(b"abcdef").unwrap();
    assert!(start.elapsed() >= TICK * 3);
    drop(conn);

    assert_eq!(client.join().unwrap(), b"abcdef");
    assert_eq!(controller.chunk_len(), len(2));
}
