//! Error types for slowpoke-core.
//!
//! Endpoint operations keep `std::io::Result` so that failures of the real
//! send/accept propagate verbatim. The types here cover the interception
//! machinery itself.

use crate::endpoint::Operation;
use std::io;

/// Errors raised while installing hooks or behaviors.
#[derive(Debug, thiserror::Error)]
pub enum InterceptError {
    /// The endpoint's operation cannot be replaced in place.
    #[error("operation not patchable: {operation}")]
    NotPatchable {
        /// The operation that was targeted.
        operation: Operation,
    },

    /// Argument replacement was requested without a `before` hook to
    /// produce the replacement.
    #[error("argument replacement on {operation} requires a before hook")]
    ReplaceWithoutBefore {
        /// The operation that was targeted.
        operation: Operation,
    },
}

impl From<InterceptError> for io::Error {
    fn from(e: InterceptError) -> Self {
        io::Error::new(io::ErrorKind::Unsupported, e)
    }
}

/// A hook produced values of the wrong shape for the call it intercepted.
///
/// These are programming errors in hook code. They surface as
/// `io::ErrorKind::InvalidInput` from the intercepted call.
#[derive(Debug, thiserror::Error)]
pub enum ShapeError {
    /// Argument replacement was requested but the `before` hook let the
    /// call proceed unchanged.
    #[error("before hook on {operation} must return replacement arguments")]
    MissingReplacement {
        /// The intercepted operation.
        operation: Operation,
    },

    /// Replacement arguments belong to a different operation.
    #[error("arguments for {found} passed to {expected}")]
    ArgsMismatch {
        /// The intercepted operation.
        expected: Operation,
        /// The operation the arguments were built for.
        found: Operation,
    },

    /// An implementation returned the outcome of a different operation.
    #[error("{expected} produced an outcome of {found}")]
    OutcomeMismatch {
        /// The intercepted operation.
        expected: Operation,
        /// The operation the outcome belongs to.
        found: Operation,
    },
}

impl From<ShapeError> for io::Error {
    fn from(e: ShapeError) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = InterceptError::NotPatchable {
            operation: Operation::SendAll,
        };
        assert_eq!(err.to_string(), "operation not patchable: send_all");
    }

    #[test]
    fn shape_error_becomes_invalid_input() {
        let err: io::Error = ShapeError::MissingReplacement {
            operation: Operation::Send,
        }
        .into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(err.to_string().contains("replacement arguments"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<InterceptError>();
        assert_send_sync::<ShapeError>();
    }
}
