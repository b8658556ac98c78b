//! Behaviors applied to connections as they are accepted.

use crate::endpoint::{ClosedEndpoint, Endpoint, Operation};
use crate::error::InterceptError;
use crate::intercept::{install_accept_hook, unexpected_outcome, Hook, Outcome};
use std::net::Shutdown;

/// Shut down and close every connection as soon as it is accepted.
///
/// The caller's `accept()` still succeeds and reports the peer address, but
/// the endpoint it receives is a [`ClosedEndpoint`]. The peer sees end of
/// stream on its first read.
///
/// # Errors
///
/// Returns [`InterceptError::NotPatchable`] if `accept` on `endpoint` cannot
/// be intercepted.
pub fn close_upon_acceptance(endpoint: &mut dyn Endpoint) -> Result<(), InterceptError> {
    let hook = Hook::new().after(|_, outcome, _| match outcome {
        Outcome::Accepted(conn, addr) => {
            conn.shutdown(Shutdown::Both)?;
            drop(conn);
            tracing::trace!("Closed connection from {} upon acceptance", addr);
            Ok(Outcome::Accepted(Box::new(ClosedEndpoint::new(addr)), addr))
        }
        other => Err(unexpected_outcome(Operation::Accept, &other)),
    });
    install_accept_hook(endpoint, hook)
}
