//! Endpoint abstraction for slowpoke.
//!
//! Every stream-like endpoint that behaviors can be installed on implements
//! [`Endpoint`]: plain TCP sockets, the [`PatchableEndpoint`] that wraps them,
//! and any third-party wrapper (TLS, in-memory mocks, ...).
//!
//! # Design
//!
//! The trait is synchronous and mirrors the BSD socket calls it stands in for:
//! - `accept()` waits for an incoming connection
//! - `send()` sends up to `data.len()` bytes and reports how many went out
//! - `send_all()` loops until every byte has been sent
//! - `recv()` reads whatever is available
//!
//! Interception support is part of the same interface. An endpoint either
//! exposes a replaceable [`OperationTable`] via [`Endpoint::operations_mut`],
//! or it does not and must be passed through
//! [`ensure_patchable`](crate::ensure_patchable) first.
//!
//! [`PatchableEndpoint`]: crate::PatchableEndpoint

use crate::intercept::OperationTable;
use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

/// An operation that can be intercepted on an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Wait for an incoming connection.
    Accept,
    /// Send up to N bytes.
    Send,
    /// Send an exact byte sequence.
    SendAll,
}

impl Operation {
    /// The sending operations (`send` and `send_all`).
    pub const SENDING: [Operation; 2] = [Operation::Send, Operation::SendAll];

    /// Every interceptable operation.
    pub const ALL: [Operation; 3] = [Operation::Accept, Operation::Send, Operation::SendAll];

    /// Name used in errors and log output.
    pub fn name(self) -> &'static str {
        match self {
            Operation::Accept => "accept",
            Operation::Send => "send",
            Operation::SendAll => "send_all",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One end of a bidirectional byte stream.
///
/// Implementations handle the underlying connection mechanism. Only
/// `accept`, `send` and `send_all` take part in interception; the remaining
/// methods are plain delegation points used by callers and hooks.
pub trait Endpoint: Send {
    /// Wait for an incoming connection and return it with the peer address.
    fn accept(&mut self) -> io::Result<(Box<dyn Endpoint>, SocketAddr)>;

    /// Send up to `data.len()` bytes, returning how many were sent.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Send all of `data`, looping until done or failed.
    fn send_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Receive bytes into `buf`. `Ok(0)` means end of stream.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Shut down one or both halves of the connection.
    fn shutdown(&self, how: Shutdown) -> io::Result<()>;

    /// Current blocking timeout; `None` blocks forever.
    fn timeout(&self) -> io::Result<Option<Duration>>;

    /// Set the blocking timeout for reads and writes.
    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Switch the underlying handle between blocking and non-blocking mode.
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Local address of the endpoint.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Remote address of a connected endpoint.
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Whether `op` can be replaced in place on this endpoint.
    fn is_replaceable(&self, op: Operation) -> bool {
        let _ = op;
        false
    }

    /// Whether this endpoint may be moved into a
    /// [`PatchableEndpoint`](crate::PatchableEndpoint).
    ///
    /// Wrappers that own protocol state on top of the raw handle (TLS
    /// sessions, for instance) return `false` and are left untouched by
    /// [`ensure_patchable`](crate::ensure_patchable).
    fn permits_substitution(&self) -> bool {
        true
    }

    /// Replaceable operation table, if this endpoint has one.
    fn operations_mut(&mut self) -> Option<&mut OperationTable> {
        None
    }
}

pub(crate) fn unsupported(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, what.to_string())
}

impl Endpoint for TcpListener {
    fn accept(&mut self) -> io::Result<(Box<dyn Endpoint>, SocketAddr)> {
        let (stream, addr) = TcpListener::accept(self)?;
        Ok((Box::new(stream), addr))
    }

    fn send(&mut self, _data: &[u8]) -> io::Result<usize> {
        Err(unsupported("send on a listening endpoint"))
    }

    fn send_all(&mut self, _data: &[u8]) -> io::Result<()> {
        Err(unsupported("send_all on a listening endpoint"))
    }

    fn recv(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(unsupported("recv on a listening endpoint"))
    }

    fn shutdown(&self, _how: Shutdown) -> io::Result<()> {
        Err(unsupported("shutdown on a listening endpoint"))
    }

    fn timeout(&self) -> io::Result<Option<Duration>> {
        Ok(None)
    }

    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match timeout {
            None => Ok(()),
            Some(_) => Err(unsupported("timeouts on a listening endpoint")),
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpListener::set_nonblocking(self, nonblocking)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Err(io::Error::new(
            io::ErrorKind::NotConnected,
            "listening endpoint has no peer",
        ))
    }
}

impl Endpoint for TcpStream {
    fn accept(&mut self) -> io::Result<(Box<dyn Endpoint>, SocketAddr)> {
        Err(unsupported("accept on a connected endpoint"))
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        io::Write::write(self, data)
    }

    fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(self, data)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(self, buf)
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        TcpStream::shutdown(self, how)
    }

    fn timeout(&self) -> io::Result<Option<Duration>> {
        self.read_timeout()
    }

    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

/// Stand-in for a connection that has been shut down and closed.
///
/// The OS handle is already released; every I/O call fails with
/// `NotConnected`. Only the peer address survives.
#[derive(Debug, Clone, Copy)]
pub struct ClosedEndpoint {
    peer: SocketAddr,
}

impl ClosedEndpoint {
    /// Create a closed endpoint that was connected to `peer`.
    pub fn new(peer: SocketAddr) -> Self {
        Self { peer }
    }

    fn closed() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "endpoint is closed")
    }
}

impl Endpoint for ClosedEndpoint {
    fn accept(&mut self) -> io::Result<(Box<dyn Endpoint>, SocketAddr)> {
        Err(Self::closed())
    }

    fn send(&mut self, _data: &[u8]) -> io::Result<usize> {
        Err(Self::closed())
    }

    fn send_all(&mut self, _data: &[u8]) -> io::Result<()> {
        Err(Self::closed())
    }

    fn recv(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(Self::closed())
    }

    fn shutdown(&self, _how: Shutdown) -> io::Result<()> {
        Err(Self::closed())
    }

    fn timeout(&self) -> io::Result<Option<Duration>> {
        Err(Self::closed())
    }

    fn set_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Err(Self::closed())
    }

    fn set_nonblocking(&self, _nonblocking: bool) -> io::Result<()> {
        Err(Self::closed())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Err(Self::closed())
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer)
    }

    fn permits_substitution(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn operation_names() {
        assert_eq!(Operation::Accept.to_string(), "accept");
        assert_eq!(Operation::Send.to_string(), "send");
        assert_eq!(Operation::SendAll.to_string(), "send_all");
    }

    #[test]
    fn sending_covers_both_send_operations() {
        assert!(Operation::SENDING.contains(&Operation::Send));
        assert!(Operation::SENDING.contains(&Operation::SendAll));
        assert!(!Operation::SENDING.contains(&Operation::Accept));
    }

    #[test]
    fn native_endpoints_are_not_replaceable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        for op in Operation::ALL {
            assert!(!Endpoint::is_replaceable(&listener, op));
        }
        assert!(Endpoint::permits_substitution(&listener));
    }

    #[test]
    fn listener_accepts_through_trait() {
        let mut listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = TcpListener::local_addr(&listener).unwrap();
        let client = TcpStream::connect(addr).unwrap();

        let (conn, peer) = Endpoint::accept(&mut listener).unwrap();
        assert_eq!(peer, client.local_addr().unwrap());
        assert_eq!(conn.peer_addr().unwrap(), peer);
    }

    #[test]
    fn stream_sends_through_trait() {
        let (mut client, mut server) = loopback_pair();

        Endpoint::send_all(&mut client, b"hello").unwrap();

        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn stream_timeout_roundtrip() {
        let (client, _server) = loopback_pair();
        Endpoint::set_timeout(&client, Some(Duration::from_millis(250))).unwrap();
        assert_eq!(
            Endpoint::timeout(&client).unwrap(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn listener_rejects_stream_operations() {
        let mut listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let err = Endpoint::send(&mut listener, b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn closed_endpoint_fails_io_but_keeps_peer() {
        let peer: SocketAddr = "127.0.0.1:4242".parse().unwrap();
        let mut closed = ClosedEndpoint::new(peer);

        assert_eq!(closed.peer_addr().unwrap(), peer);
        let err = closed.send(b"data").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(!closed.permits_substitution());
    }
}
