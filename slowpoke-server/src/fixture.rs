//! Test fixture: a slowed-down static file server on a background thread.
//!
//! ```no_run
//! use slowpoke_server::SlowServer;
//!
//! let server = SlowServer::builder()
//!     .port(0)
//!     .root("tests/data")
//!     .start()?;
//! // Fetch server.url() with the client under test...
//! # Ok::<(), slowpoke_server::ServerError>(())
//! ```

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::server::{DemoServer, ServerHandle};
use slowpoke_core::{AcceptanceDelayController, Behavior, InstalledBehavior, DEFAULT_CHUNK_LEN};
use std::io;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

/// Default host of [`SlowServer`].
pub const DEFAULT_HOST: &str = "localhost";
/// Default port of [`SlowServer`].
pub const DEFAULT_PORT: u16 = 8080;
/// Default delay of [`SlowServer`].
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

/// Static file server whose accepted connections send in delayed chunks.
///
/// Stops when dropped.
#[derive(Debug)]
pub struct SlowServer {
    handle: ServerHandle,
    controller: AcceptanceDelayController,
}

/// Builder for [`SlowServer`].
#[derive(Debug, Clone)]
pub struct SlowServerBuilder {
    host: String,
    port: u16,
    root: PathBuf,
    delay: Duration,
    chunk_len: NonZeroUsize,
    read_timeout: Duration,
}

impl Default for SlowServerBuilder {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            root: PathBuf::from("."),
            delay: DEFAULT_DELAY,
            chunk_len: DEFAULT_CHUNK_LEN,
            read_timeout: Duration::from_secs(10),
        }
    }
}

impl SlowServerBuilder {
    /// Host to bind to.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Port to bind to; 0 picks a free one.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Directory to serve.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Delay before each chunk.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Bytes per chunk.
    pub fn chunk_len(mut self, chunk_len: NonZeroUsize) -> Self {
        self.chunk_len = chunk_len;
        self
    }

    /// How long a connection may take to send its request, in whole
    /// seconds (at least one).
    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Bind, install the delay and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be bound or started.
    pub fn start(self) -> Result<SlowServer, ServerError> {
        let config = ServerConfig {
            host: self.host,
            port: self.port,
            root: self.root,
            read_timeout_secs: self.read_timeout.as_secs().max(1),
        };
        let behavior = Behavior::DelayBeforeSendingUponAcceptance {
            delay: self.delay,
            chunk_len: self.chunk_len,
        };

        let server = DemoServer::bind(&config, behavior)?;
        let InstalledBehavior::AcceptanceDelay(controller) = server.installed().clone() else {
            return Err(ServerError::Io(io::Error::other(
                "acceptance delay did not yield its controller",
            )));
        };
        let handle = server.spawn()?;
        tracing::debug!("Slow server started on {}", handle.addr());

        Ok(SlowServer { handle, controller })
    }
}

impl SlowServer {
    /// Builder with the defaults: `localhost:8080`, the current directory,
    /// a 1 s delay and 1024-byte chunks.
    pub fn builder() -> SlowServerBuilder {
        SlowServerBuilder::default()
    }

    /// Start a server with the defaults, serving `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be bound or started.
    pub fn start(root: impl Into<PathBuf>) -> Result<Self, ServerError> {
        Self::builder().root(root).start()
    }

    /// Address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.handle.addr()
    }

    /// URL of the served root, without a trailing slash.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr())
    }

    /// Controller for connections accepted from now on.
    pub fn controller(&self) -> &AcceptanceDelayController {
        &self.controller
    }

    /// Stop the server and wait for it to finish.
    ///
    /// # Errors
    ///
    /// Returns the server thread's error, if any.
    pub fn stop(self) -> Result<(), ServerError> {
        self.handle.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let builder = SlowServer::builder();
        assert_eq!(builder.host, "localhost");
        assert_eq!(builder.port, 8080);
        assert_eq!(builder.delay, Duration::from_secs(1));
        assert_eq!(builder.chunk_len.get(), 1024);
    }

    #[test]
    fn starts_on_ephemeral_port() {
        let dir = tempfile::tempdir().unwrap();
        let server = SlowServer::builder()
            .host("127.0.0.1")
            .port(0)
            .root(dir.path())
            .delay(Duration::from_millis(5))
            .start()
            .unwrap();

        assert_ne!(server.addr().port(), 0);
        assert_eq!(server.url(), format!("http://{}", server.addr()));
        assert_eq!(server.controller().delay(), Duration::from_millis(5));
        server.stop().unwrap();
    }
}
