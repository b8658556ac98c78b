//! Patchability adapter.
//!
//! Native endpoints have fixed operations. [`ensure_patchable`] moves such an
//! endpoint into a [`PatchableEndpoint`], which owns the same OS handle and
//! exposes `accept`, `send` and `send_all` through a replaceable
//! [`OperationTable`].

use crate::endpoint::{Endpoint, Operation};
use crate::intercept::{expect_outcome, unexpected_outcome, Args, OperationId, OperationTable, Outcome};
use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// An endpoint whose sending and accepting operations can be intercepted.
///
/// Everything other than `accept`, `send` and `send_all` is forwarded to the
/// wrapped endpoint untouched, so blocking mode and timeouts are whatever the
/// wrapped endpoint had.
pub struct PatchableEndpoint {
    inner: Box<dyn Endpoint>,
    table: OperationTable,
}

impl PatchableEndpoint {
    /// Take ownership of `endpoint` and expose replaceable operations over it.
    pub fn create_from(endpoint: impl Endpoint + 'static) -> Self {
        Self::from_boxed(Box::new(endpoint))
    }

    fn from_boxed(inner: Box<dyn Endpoint>) -> Self {
        Self {
            inner,
            table: OperationTable::delegating(),
        }
    }

    /// Bind a listening endpoint.
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self::create_from(listener))
    }

    /// Connect to a remote listener.
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Ok(Self::create_from(stream))
    }

    /// Identity of the current implementation of `operation`.
    pub fn operation_id(&self, operation: Operation) -> OperationId {
        self.table.id(operation)
    }

    /// Number of interceptions stacked on `operation`.
    pub fn operation_depth(&self, operation: Operation) -> usize {
        self.table.depth(operation)
    }

    /// Give back the wrapped endpoint, discarding every installed hook.
    pub fn into_inner(self) -> Box<dyn Endpoint> {
        self.inner
    }
}

impl Endpoint for PatchableEndpoint {
    fn accept(&mut self) -> io::Result<(Box<dyn Endpoint>, SocketAddr)> {
        match self
            .table
            .call(Operation::Accept, self.inner.as_mut(), Args::Accept)?
        {
            Outcome::Accepted(conn, addr) => Ok((conn, addr)),
            other => Err(unexpected_outcome(Operation::Accept, &other)),
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        match self
            .table
            .call(Operation::Send, self.inner.as_mut(), Args::Send(data))?
        {
            Outcome::Sent(n) => Ok(n),
            other => Err(unexpected_outcome(Operation::Send, &other)),
        }
    }

    fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
        let outcome = self
            .table
            .call(Operation::SendAll, self.inner.as_mut(), Args::SendAll(data))?;
        expect_outcome(Operation::SendAll, &outcome)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.recv(buf)
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        self.inner.shutdown(how)
    }

    fn timeout(&self) -> io::Result<Option<Duration>> {
        self.inner.timeout()
    }

    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.set_timeout(timeout)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.inner.set_nonblocking(nonblocking)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    fn is_replaceable(&self, _op: Operation) -> bool {
        true
    }

    fn operations_mut(&mut self) -> Option<&mut OperationTable> {
        Some(&mut self.table)
    }
}

impl fmt::Debug for PatchableEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchableEndpoint")
            .field("local_addr", &self.inner.local_addr().ok())
            .field("table", &self.table)
            .finish()
    }
}

/// Return an endpoint on which every operation in `operations` can be
/// intercepted.
///
/// - If all of them are already replaceable, `endpoint` comes back unchanged.
/// - If `endpoint` refuses substitution (see
///   [`Endpoint::permits_substitution`]), it also comes back unchanged and
///   later hook installation on it fails with
///   [`InterceptError::NotPatchable`](crate::InterceptError::NotPatchable).
/// - Otherwise it is moved into a new [`PatchableEndpoint`].
///
/// Not atomic: nothing else may use `endpoint` while this runs, which the
/// move already guarantees.
pub fn ensure_patchable(endpoint: Box<dyn Endpoint>, operations: &[Operation]) -> Box<dyn Endpoint> {
    if operations.iter().all(|op| endpoint.is_replaceable(*op)) {
        return endpoint;
    }
    if !endpoint.permits_substitution() {
        tracing::debug!("Endpoint refuses substitution, leaving operations fixed");
        return endpoint;
    }

    tracing::debug!(
        "Substituting patchable endpoint for {:?}",
        endpoint.local_addr().ok()
    );
    Box::new(PatchableEndpoint::from_boxed(endpoint))
}

/// [`ensure_patchable`] over every interceptable operation.
pub fn ensure_patchable_all(endpoint: Box<dyn Endpoint>) -> Box<dyn Endpoint> {
    ensure_patchable(endpoint, &Operation::ALL)
}
