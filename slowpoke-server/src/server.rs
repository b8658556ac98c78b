//! Demo server: a static file server whose listening endpoint carries a
//! [`Behavior`].
//!
//! Connections are served one at a time. The listener runs non-blocking and
//! polls a stop flag between accepts so another thread can shut it down.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::http;
use slowpoke_core::{Behavior, Endpoint, InstalledBehavior, PatchableEndpoint};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often an idle listener checks whether it should stop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A bound demo server that has not started serving yet.
pub struct DemoServer {
    listener: PatchableEndpoint,
    behavior: Behavior,
    installed: InstalledBehavior,
    root: PathBuf,
    read_timeout: Duration,
    stop: Arc<AtomicBool>,
}

impl std::fmt::Debug for DemoServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemoServer")
            .field("listener", &self.listener)
            .field("behavior", &self.behavior)
            .field("root", &self.root)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl DemoServer {
    /// Bind to `config.host:config.port` and install `behavior` on the
    /// listening endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for a configuration that cannot be
    /// served with, [`ServerError::Bind`] if the address cannot be bound and
    /// [`ServerError::Install`] if the behavior cannot be installed.
    pub fn bind(config: &ServerConfig, behavior: Behavior) -> Result<Self, ServerError> {
        config.validate()?;
        let addr = config.bind_address();
        let mut listener = PatchableEndpoint::bind(addr.as_str())
            .map_err(|source| ServerError::Bind { addr, source })?;
        listener.set_nonblocking(true)?;

        if !behavior.acts_on_accept() {
            tracing::warn!(
                "{} alters the listening endpoint's own sends; accepted connections are unaffected",
                behavior.name()
            );
        }
        let installed = behavior.install(&mut listener)?;

        Ok(Self {
            listener,
            behavior,
            installed,
            root: config.root.clone(),
            read_timeout: config.read_timeout(),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle onto the installed behavior's parameters.
    pub fn installed(&self) -> &InstalledBehavior {
        &self.installed
    }

    /// Directory being served.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serve connections on the calling thread until stopped.
    ///
    /// Without a [`ServerHandle`] nothing can set the stop flag, so this runs
    /// until the process exits.
    ///
    /// # Errors
    ///
    /// Returns an error only if the listener itself becomes unusable.
    pub fn serve_forever(mut self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        tracing::info!(
            "Serving {} on http://{} with {}",
            self.root.display(),
            addr,
            self.behavior
        );

        while !self.stop.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((conn, peer)) => self.handle(conn, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }

        tracing::info!("Server on {} stopped", addr);
        Ok(())
    }

    /// Serve connections on a background thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener address cannot be read or the thread
    /// cannot be spawned.
    pub fn spawn(self) -> Result<ServerHandle, ServerError> {
        let addr = self.local_addr()?;
        let stop = Arc::clone(&self.stop);
        let installed = self.installed.clone();
        let thread = thread::Builder::new()
            .name("slowpoke-server".to_string())
            .spawn(move || self.serve_forever())?;

        Ok(ServerHandle {
            addr,
            installed,
            stop,
            thread: Some(thread),
        })
    }

    fn handle(&self, mut conn: Box<dyn Endpoint>, peer: SocketAddr) {
        tracing::debug!("Accepted connection from {}", peer);
        match self.serve(conn.as_mut()) {
            Ok(Some(status)) => tracing::info!("{} -> {}", peer, status.code()),
            Ok(None) => tracing::debug!("{} closed without a request", peer),
            Err(e) => tracing::debug!("Connection from {} ended: {}", peer, e),
        }
    }

    fn serve(&self, conn: &mut dyn Endpoint) -> io::Result<Option<http::Status>> {
        conn.set_nonblocking(false)?;
        conn.set_timeout(Some(self.read_timeout))?;
        http::serve_connection(conn, &self.root)
    }
}

/// A demo server running on a background thread.
///
/// Dropping the handle stops the server and waits for the thread to finish.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    installed: InstalledBehavior,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), ServerError>>>,
}

impl ServerHandle {
    /// Address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Handle onto the installed behavior's parameters.
    pub fn installed(&self) -> &InstalledBehavior {
        &self.installed
    }

    /// Stop the server and wait for it to finish.
    ///
    /// A connection being served when this is called is finished first,
    /// including any delays installed on it.
    ///
    /// # Errors
    ///
    /// Returns the server's own error, or [`ServerError::ThreadPanicked`].
    pub fn stop(mut self) -> Result<(), ServerError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), ServerError> {
        self.stop.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ServerError::ThreadPanicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!("Server on {} did not stop cleanly: {}", self.addr, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use slowpoke_core::{MockEndpoint, DEFAULT_CHUNK_LEN};
    use std::io::{Read, Write};
    use std::net::TcpStream;

    fn local_config(root: &Path) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            root: root.to_path_buf(),
            read_timeout_secs: 5,
        }
    }

    fn get(addr: SocketAddr, path: &str) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).unwrap();
        write!(stream, "GET {path} HTTP/1.0\r\n\r\n").unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        response
    }

    #[test]
    fn bind_installs_behavior() {
        let dir = tempfile::tempdir().unwrap();
        let server = DemoServer::bind(
            &local_config(dir.path()),
            Behavior::DelayBeforeSendingUponAcceptance {
                delay: Duration::ZERO,
                chunk_len: DEFAULT_CHUNK_LEN,
            },
        )
        .unwrap();

        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.installed().chunk_len(), Some(DEFAULT_CHUNK_LEN));
        assert_eq!(server.root(), dir.path());
    }

    #[test]
    fn bind_failure_names_address() {
        let dir = tempfile::tempdir().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = local_config(dir.path());
        config.port = taken.local_addr().unwrap().port();

        let err = DemoServer::bind(&config, Behavior::CloseUponAcceptance).unwrap_err();
        let expected = config.bind_address();
        assert!(matches!(err, ServerError::Bind { ref addr, .. } if *addr == expected));
    }

    #[test]
    fn bind_rejects_zero_read_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = local_config(dir.path());
        config.read_timeout_secs = 0;

        let err = DemoServer::bind(&config, Behavior::CloseUponAcceptance).unwrap_err();
        assert!(matches!(err, ServerError::Config(ConfigError::Invalid { .. })));
    }

    #[test]
    fn accepted_connection_is_served_blocking_with_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let server = DemoServer::bind(&local_config(dir.path()), Behavior::CloseUponAcceptance)
            .unwrap();

        let mut conn = MockEndpoint::new();
        conn.set_nonblocking(true).unwrap();
        conn.queue_inbound(b"GET /missing HTTP/1.0\r\n\r\n".to_vec());

        let status = server.serve(&mut conn).unwrap();
        assert_eq!(status, Some(http::Status::NotFound));
        assert!(!conn.is_nonblocking());
        assert_eq!(conn.timeout().unwrap(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn spawned_server_serves_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "slow hello").unwrap();
        let server = DemoServer::bind(
            &local_config(dir.path()),
            Behavior::DelayBeforeSendingUponAcceptance {
                delay: Duration::ZERO,
                chunk_len: DEFAULT_CHUNK_LEN,
            },
        )
        .unwrap();
        let handle = server.spawn().unwrap();

        let response = get(handle.addr(), "/");
        assert!(response.starts_with(b"HTTP/1.0 200 OK"));
        assert!(response.ends_with(b"slow hello"));

        handle.stop().unwrap();
    }
}
