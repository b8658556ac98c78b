//! Error types for slowpoke-server.

use slowpoke_core::InterceptError;

/// Main error type for slowpoke-server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Could not bind the listening endpoint.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The behavior could not be installed on the listening endpoint.
    #[error("failed to install behavior: {0}")]
    Install(#[from] InterceptError),

    /// The server thread panicked.
    #[error("server thread panicked")]
    ThreadPanicked,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use slowpoke_core::Operation;

    #[test]
    fn bind_error_names_address() {
        let err = ServerError::Bind {
            addr: "localhost:80".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().starts_with("failed to bind localhost:80"));
    }

    #[test]
    fn intercept_errors_convert() {
        let err: ServerError = InterceptError::NotPatchable {
            operation: Operation::Accept,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "failed to install behavior: operation not patchable: accept"
        );
    }
}
