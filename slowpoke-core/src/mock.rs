//! Mock endpoint for testing.
//!
//! Records what reaches the "wire" and lets tests queue connections and
//! inbound bytes or force failures, without touching real sockets.

use crate::endpoint::Endpoint;
use std::collections::VecDeque;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Mock endpoint for testing.
///
/// Clones share state, so a test can keep one handle for inspection while
/// another is moved into a [`PatchableEndpoint`](crate::PatchableEndpoint).
/// Like a native socket, its operations are not replaceable in place.
#[derive(Debug, Default)]
pub struct MockEndpoint {
    inner: Arc<Mutex<MockEndpointInner>>,
}

#[derive(Default)]
struct MockEndpointInner {
    sent_payloads: Vec<Vec<u8>>,
    send_calls: usize,
    send_all_calls: usize,
    max_send: Option<usize>,
    pending_connections: VecDeque<(MockEndpoint, SocketAddr)>,
    receive_queue: VecDeque<Vec<u8>>,
    fail_next_send: Option<io::ErrorKind>,
    timeout: Option<Duration>,
    nonblocking: bool,
    shut_down: Option<Shutdown>,
}

impl std::fmt::Debug for MockEndpointInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockEndpointInner")
            .field("sent_payloads", &self.sent_payloads.len())
            .field("send_calls", &self.send_calls)
            .field("send_all_calls", &self.send_all_calls)
            .field("pending_connections", &self.pending_connections.len())
            .finish_non_exhaustive()
    }
}

impl MockEndpoint {
    /// Create a new mock endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockEndpointInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept at most `max` bytes per `send()` call, like a full socket buffer.
    pub fn limit_send(&self, max: usize) {
        self.lock().max_send = Some(max);
    }

    /// Queue a connection to be returned by the next `accept()` call.
    pub fn queue_connection(&self, conn: MockEndpoint, peer: SocketAddr) {
        self.lock().pending_connections.push_back((conn, peer));
    }

    /// Queue bytes to be returned by a later `recv()` call.
    pub fn queue_inbound(&self, data: Vec<u8>) {
        self.lock().receive_queue.push_back(data);
    }

    /// Cause the next `send()` or `send_all()` to fail with `kind`.
    pub fn fail_next_send(&self, kind: io::ErrorKind) {
        self.lock().fail_next_send = Some(kind);
    }

    /// Every payload that reached the wire, one entry per real send.
    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.lock().sent_payloads.clone()
    }

    /// All bytes that reached the wire, concatenated.
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.lock().sent_payloads.concat()
    }

    /// Number of real `send()` calls.
    pub fn send_calls(&self) -> usize {
        self.lock().send_calls
    }

    /// Number of real `send_all()` calls.
    pub fn send_all_calls(&self) -> usize {
        self.lock().send_all_calls
    }

    /// How the endpoint was shut down, if it was.
    pub fn shut_down(&self) -> Option<Shutdown> {
        self.lock().shut_down
    }

    /// Whether non-blocking mode is on.
    pub fn is_nonblocking(&self) -> bool {
        self.lock().nonblocking
    }

    fn check_send(inner: &mut MockEndpointInner) -> io::Result<()> {
        if let Some(kind) = inner.fail_next_send.take() {
            return Err(io::Error::new(kind, "mock send failure"));
        }
        if inner.shut_down.is_some() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock endpoint shut down"));
        }
        Ok(())
    }
}

impl Clone for MockEndpoint {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Endpoint for MockEndpoint {
    fn accept(&mut self) -> io::Result<(Box<dyn Endpoint>, SocketAddr)> {
        let mut inner = self.lock();
        match inner.pending_connections.pop_front() {
            Some((conn, peer)) => Ok((Box::new(conn), peer)),
            None if inner.nonblocking => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "no pending connection",
            )),
            None => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "no pending connection",
            )),
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut inner = self.lock();
        inner.send_calls += 1;
        Self::check_send(&mut inner)?;

        let n = inner.max_send.map_or(data.len(), |max| max.min(data.len()));
        inner.sent_payloads.push(data[..n].to_vec());
        Ok(n)
    }

    fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut inner = self.lock();
        inner.send_all_calls += 1;
        Self::check_send(&mut inner)?;

        inner.sent_payloads.push(data.to_vec());
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.lock();
        let Some(mut data) = inner.receive_queue.pop_front() else {
            return Ok(0);
        };

        let n = buf.len().min(data.len());
        buf[..n].copy_from_slice(&data[..n]);
        if n < data.len() {
            let rest = data.split_off(n);
            inner.receive_queue.push_front(rest);
        }
        Ok(n)
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        self.lock().shut_down = Some(how);
        Ok(())
    }

    fn timeout(&self) -> io::Result<Option<Duration>> {
        Ok(self.lock().timeout)
    }

    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.lock().timeout = timeout;
        Ok(())
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.lock().nonblocking = nonblocking;
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
    }
}
