//! Interception of endpoint operations.
//!
//! A [`Hook`] pairs an optional `before` function with an optional `after`
//! function. Installing it on an operation wraps whatever implementation the
//! operation currently has, so hooks stack: the most recently installed
//! wrapper runs first and the original implementation runs exactly once per
//! call, at the bottom of the stack.
//!
//! Dispatch for one call through a single wrapper:
//!
//! 1. `before(endpoint, &args)` runs if set and yields a [`Before`].
//! 2. If the hook replaces arguments, the previous implementation is called
//!    with the arguments carried by `Before::Replace`; otherwise with the
//!    original arguments.
//! 3. `after(endpoint, outcome, &before)` runs if set and its result is
//!    returned in place of the previous implementation's outcome.
//!
//! Interception only works on endpoints exposing an [`OperationTable`]. Use
//! [`ensure_patchable`](crate::ensure_patchable) to obtain one.

use crate::endpoint::{Endpoint, Operation};
use crate::error::{InterceptError, ShapeError};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Arguments of one intercepted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Args<'a> {
    /// `accept()` takes no arguments.
    Accept,
    /// Payload passed to `send()`.
    Send(&'a [u8]),
    /// Payload passed to `send_all()`.
    SendAll(&'a [u8]),
}

impl<'a> Args<'a> {
    /// The operation these arguments belong to.
    pub fn operation(&self) -> Operation {
        match self {
            Args::Accept => Operation::Accept,
            Args::Send(_) => Operation::Send,
            Args::SendAll(_) => Operation::SendAll,
        }
    }

    /// Payload of a sending call.
    pub fn payload(&self) -> Option<&'a [u8]> {
        match *self {
            Args::Accept => None,
            Args::Send(data) | Args::SendAll(data) => Some(data),
        }
    }

    /// The same call with its payload swapped for `data`.
    ///
    /// `Accept` has no payload and is returned unchanged.
    pub fn with_payload(self, data: &'a [u8]) -> Args<'a> {
        match self {
            Args::Accept => Args::Accept,
            Args::Send(_) => Args::Send(data),
            Args::SendAll(_) => Args::SendAll(data),
        }
    }
}

/// Result of one intercepted call.
pub enum Outcome {
    /// A new connection and its peer address.
    Accepted(Box<dyn Endpoint>, SocketAddr),
    /// Number of bytes a `send()` actually sent.
    Sent(usize),
    /// `send_all()` completed.
    SentAll,
}

impl Outcome {
    /// The operation that produced this outcome.
    pub fn operation(&self) -> Operation {
        match self {
            Outcome::Accepted(..) => Operation::Accept,
            Outcome::Sent(_) => Operation::Send,
            Outcome::SentAll => Operation::SendAll,
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Accepted(_, addr) => f.debug_tuple("Accepted").field(addr).finish(),
            Outcome::Sent(n) => f.debug_tuple("Sent").field(n).finish(),
            Outcome::SentAll => f.write_str("SentAll"),
        }
    }
}

/// What a `before` function decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Before<'a> {
    /// Continue with the original arguments.
    Proceed,
    /// Call the wrapped implementation with these arguments instead.
    Replace(Args<'a>),
}

/// An operation implementation, as stored in an [`OperationTable`].
pub type Implementation =
    Box<dyn for<'a> FnMut(&mut dyn Endpoint, Args<'a>) -> io::Result<Outcome> + Send>;

type BeforeFn =
    Arc<dyn for<'a> Fn(&mut dyn Endpoint, &Args<'a>) -> io::Result<Before<'a>> + Send + Sync>;

type AfterFn =
    Arc<dyn for<'a> Fn(&mut dyn Endpoint, Outcome, &Before<'a>) -> io::Result<Outcome> + Send + Sync>;

/// A `before`/`after` pair to splice around an operation.
///
/// Both functions receive the endpoint that carries out the operation. On a
/// [`PatchableEndpoint`](crate::PatchableEndpoint) that is the wrapped
/// endpoint, not the wrapper: calls made through it bypass every installed
/// hook and it reports its own (usually fixed) operations.
///
/// Cloning is cheap and shares the functions, which is how one pair gets
/// installed on both sending operations.
#[derive(Clone, Default)]
pub struct Hook {
    before: Option<BeforeFn>,
    replaces_args: bool,
    after: Option<AfterFn>,
}

impl Hook {
    /// A hook pair with neither function set. Installing it still wraps the
    /// operation (its [`OperationId`] changes) but behavior is unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `before` function.
    pub fn before<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&mut dyn Endpoint, &Args<'a>) -> io::Result<Before<'a>> + Send + Sync + 'static,
    {
        self.before = Some(Arc::new(f));
        self
    }

    /// Set a `before` function that only observes the call.
    pub fn observe<F>(self, f: F) -> Self
    where
        F: Fn(&mut dyn Endpoint, &Args<'_>) -> io::Result<()> + Send + Sync + 'static,
    {
        self.before(move |endpoint, args| {
            f(endpoint, args)?;
            Ok(Before::Proceed)
        })
    }

    /// Set a `before` function whose return value replaces the call's
    /// arguments.
    pub fn rewrite<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&mut dyn Endpoint, &Args<'a>) -> io::Result<Args<'a>> + Send + Sync + 'static,
    {
        self.before(move |endpoint, args| f(endpoint, args).map(Before::Replace))
            .replacing_args(true)
    }

    /// Whether the `before` function's result replaces the call's arguments.
    pub fn replacing_args(mut self, replaces: bool) -> Self {
        self.replaces_args = replaces;
        self
    }

    /// Set the `after` function.
    pub fn after<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&mut dyn Endpoint, Outcome, &Before<'a>) -> io::Result<Outcome>
            + Send
            + Sync
            + 'static,
    {
        self.after = Some(Arc::new(f));
        self
    }

    /// Whether a `before` function is set.
    pub fn has_before(&self) -> bool {
        self.before.is_some()
    }

    /// Whether an `after` function is set.
    pub fn has_after(&self) -> bool {
        self.after.is_some()
    }

    /// Whether arguments get replaced.
    pub fn replaces_args(&self) -> bool {
        self.replaces_args
    }

    fn wrap(self, operation: Operation, mut real: Implementation) -> Implementation {
        let Hook {
            before,
            replaces_args,
            after,
        } = self;

        Box::new(
            move |endpoint: &mut dyn Endpoint, args: Args<'_>| -> io::Result<Outcome> {
                let decided = match &before {
                    Some(f) => f(&mut *endpoint, &args)?,
                    None => Before::Proceed,
                };

                let outcome = if replaces_args {
                    match decided {
                        Before::Replace(replacement) => {
                            if replacement.operation() != operation {
                                return Err(ShapeError::ArgsMismatch {
                                    expected: operation,
                                    found: replacement.operation(),
                                }
                                .into());
                            }
                            real(&mut *endpoint, replacement)?
                        }
                        Before::Proceed => {
                            return Err(ShapeError::MissingReplacement { operation }.into())
                        }
                    }
                } else {
                    real(&mut *endpoint, args)?
                };

                match &after {
                    Some(f) => f(endpoint, outcome, &decided),
                    None => Ok(outcome),
                }
            },
        )
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("before", &self.has_before())
            .field("replaces_args", &self.replaces_args)
            .field("after", &self.has_after())
            .finish()
    }
}

/// Identity of an operation's current implementation.
///
/// Every interception assigns a fresh id, so comparing ids before and after
/// tells whether an operation has been wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(u64);

impl OperationId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct Slot {
    id: OperationId,
    depth: usize,
    implementation: Implementation,
}

impl Slot {
    fn new(implementation: Implementation) -> Self {
        Self {
            id: OperationId::next(),
            depth: 0,
            implementation,
        }
    }
}

/// Replaceable implementations of `accept`, `send` and `send_all`.
pub struct OperationTable {
    accept: Slot,
    send: Slot,
    send_all: Slot,
}

impl OperationTable {
    /// Build a table from explicit implementations.
    pub fn new(accept: Implementation, send: Implementation, send_all: Implementation) -> Self {
        Self {
            accept: Slot::new(accept),
            send: Slot::new(send),
            send_all: Slot::new(send_all),
        }
    }

    /// A table whose implementations call straight through to the endpoint
    /// they are invoked with.
    pub fn delegating() -> Self {
        Self::new(
            Box::new(
                |endpoint: &mut dyn Endpoint, args: Args<'_>| -> io::Result<Outcome> {
                    match args {
                        Args::Accept => {
                            let (conn, addr) = endpoint.accept()?;
                            Ok(Outcome::Accepted(conn, addr))
                        }
                        other => Err(mismatched_args(Operation::Accept, &other)),
                    }
                },
            ),
            Box::new(
                |endpoint: &mut dyn Endpoint, args: Args<'_>| -> io::Result<Outcome> {
                    match args {
                        Args::Send(data) => endpoint.send(data).map(Outcome::Sent),
                        other => Err(mismatched_args(Operation::Send, &other)),
                    }
                },
            ),
            Box::new(
                |endpoint: &mut dyn Endpoint, args: Args<'_>| -> io::Result<Outcome> {
                    match args {
                        Args::SendAll(data) => endpoint.send_all(data).map(|()| Outcome::SentAll),
                        other => Err(mismatched_args(Operation::SendAll, &other)),
                    }
                },
            ),
        )
    }

    fn slot(&self, operation: Operation) -> &Slot {
        match operation {
            Operation::Accept => &self.accept,
            Operation::Send => &self.send,
            Operation::SendAll => &self.send_all,
        }
    }

    fn slot_mut(&mut self, operation: Operation) -> &mut Slot {
        match operation {
            Operation::Accept => &mut self.accept,
            Operation::Send => &mut self.send,
            Operation::SendAll => &mut self.send_all,
        }
    }

    /// Identity of the current implementation of `operation`.
    pub fn id(&self, operation: Operation) -> OperationId {
        self.slot(operation).id
    }

    /// How many interceptions are stacked on `operation`.
    pub fn depth(&self, operation: Operation) -> usize {
        self.slot(operation).depth
    }

    /// Replace `operation` with an implementation built from the current one.
    pub fn replace_with<F>(&mut self, operation: Operation, f: F)
    where
        F: FnOnce(Implementation) -> Implementation,
    {
        let slot = self.slot_mut(operation);
        let current = std::mem::replace(&mut slot.implementation, in_transition(operation));
        slot.implementation = f(current);
        slot.id = OperationId::next();
        slot.depth += 1;
    }

    /// Invoke the current implementation of `operation`.
    pub fn call(
        &mut self,
        operation: Operation,
        endpoint: &mut dyn Endpoint,
        args: Args<'_>,
    ) -> io::Result<Outcome> {
        if args.operation() != operation {
            return Err(mismatched_args(operation, &args));
        }
        (self.slot_mut(operation).implementation)(endpoint, args)
    }
}

impl fmt::Debug for OperationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationTable")
            .field("accept_depth", &self.accept.depth)
            .field("send_depth", &self.send.depth)
            .field("send_all_depth", &self.send_all.depth)
            .finish_non_exhaustive()
    }
}

fn mismatched_args(expected: Operation, args: &Args<'_>) -> io::Error {
    ShapeError::ArgsMismatch {
        expected,
        found: args.operation(),
    }
    .into()
}

/// Placeholder held by a slot only while its implementation is being rebuilt.
fn in_transition(operation: Operation) -> Implementation {
    Box::new(move |_: &mut dyn Endpoint, _: Args<'_>| -> io::Result<Outcome> {
        Err(io::Error::other(format!("{} is being replaced", operation)))
    })
}

/// Check that an outcome came from `expected`, for callers unpacking one.
pub fn expect_outcome(expected: Operation, outcome: &Outcome) -> io::Result<()> {
    if outcome.operation() == expected {
        Ok(())
    } else {
        Err(unexpected_outcome(expected, outcome))
    }
}

pub(crate) fn unexpected_outcome(expected: Operation, outcome: &Outcome) -> io::Error {
    ShapeError::OutcomeMismatch {
        expected,
        found: outcome.operation(),
    }
    .into()
}

/// Replace `operation` on `endpoint` with an implementation built from its
/// current one.
///
/// # Errors
///
/// Returns [`InterceptError::NotPatchable`] if the endpoint does not allow
/// replacing `operation`.
pub fn intercept<F>(
    endpoint: &mut dyn Endpoint,
    operation: Operation,
    f: F,
) -> Result<(), InterceptError>
where
    F: FnOnce(Implementation) -> Implementation,
{
    if !endpoint.is_replaceable(operation) {
        return Err(InterceptError::NotPatchable { operation });
    }
    let table = endpoint
        .operations_mut()
        .ok_or(InterceptError::NotPatchable { operation })?;
    table.replace_with(operation, f);
    tracing::debug!(
        "Intercepted {} (depth {})",
        operation,
        table.depth(operation)
    );
    Ok(())
}

/// Wrap `operation` on `endpoint` with `hook`.
///
/// # Errors
///
/// - [`InterceptError::NotPatchable`] if the operation cannot be replaced
/// - [`InterceptError::ReplaceWithoutBefore`] if the hook replaces arguments
///   but has no `before` function
pub fn install_hook(
    endpoint: &mut dyn Endpoint,
    operation: Operation,
    hook: Hook,
) -> Result<(), InterceptError> {
    if hook.replaces_args && hook.before.is_none() {
        return Err(InterceptError::ReplaceWithoutBefore { operation });
    }
    intercept(endpoint, operation, |real| hook.wrap(operation, real))
}

/// Wrap `accept` with `hook`.
pub fn install_accept_hook(endpoint: &mut dyn Endpoint, hook: Hook) -> Result<(), InterceptError> {
    install_hook(endpoint, Operation::Accept, hook)
}

/// Wrap both `send` and `send_all` with the same `hook`.
///
/// Either both operations are wrapped or neither is.
pub fn install_send_hooks(endpoint: &mut dyn Endpoint, hook: Hook) -> Result<(), InterceptError> {
    if let Some(operation) = Operation::SENDING
        .into_iter()
        .find(|op| !endpoint.is_replaceable(*op))
    {
        return Err(InterceptError::NotPatchable { operation });
    }
    for operation in Operation::SENDING {
        install_hook(endpoint, operation, hook.clone())?;
    }
    Ok(())
}
