//! # slowpoke
//!
//! Serve static files over HTTP through a deliberately misbehaving
//! connection.
//!
//! ## Commands
//!
//! - `close-upon-acceptance`: close every connection as soon as it is accepted
//! - `delay-before-sending-once`: delay the listener's first send
//! - `delay-before-sending`: delay and chop the listener's own sends
//! - `delay-before-sending-upon-acceptance-once`: delay the first send on
//!   every accepted connection
//! - `delay-before-sending-upon-acceptance`: delay and chop every send on
//!   every accepted connection
//!
//! ## Example
//!
//! ```bash
//! # Close every connection on localhost:9000
//! slowpoke -H localhost -p 9000 close-upon-acceptance
//!
//! # Throttle to roughly 1 KiB per second
//! slowpoke delay-before-sending-upon-acceptance --delay 1 --chunk-len 1024
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use slowpoke_core::{Behavior, DEFAULT_CHUNK_LEN};
use slowpoke_server::config::parse_delay;
use slowpoke_server::{Config, DemoServer};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Serve static files through a deliberately misbehaving connection.
#[derive(Parser, Debug)]
#[command(name = "slowpoke")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Host name to bind to [default: localhost]
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to bind to [default: 8000]
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory to serve [default: current directory]
    #[arg(long)]
    root: Option<PathBuf>,

    /// TOML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Shut down and close every connection as soon as it is accepted
    CloseUponAcceptance,

    /// Delay the listening endpoint's first send
    DelayBeforeSendingOnce {
        /// Seconds to delay
        #[arg(long, value_parser = parse_secs)]
        delay: Duration,
    },

    /// Delay and chop the listening endpoint's own sends
    DelayBeforeSending {
        /// Seconds to delay before every chunk
        #[arg(long, value_parser = parse_secs)]
        delay: Duration,

        /// Bytes per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_LEN)]
        chunk_len: NonZeroUsize,
    },

    /// Delay the first send on every accepted connection
    DelayBeforeSendingUponAcceptanceOnce {
        /// Seconds to delay
        #[arg(long, value_parser = parse_secs)]
        delay: Duration,
    },

    /// Delay and chop every send on every accepted connection
    DelayBeforeSendingUponAcceptance {
        /// Seconds to delay before every chunk
        #[arg(long, value_parser = parse_secs)]
        delay: Duration,

        /// Bytes per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_LEN)]
        chunk_len: NonZeroUsize,
    },
}

impl Commands {
    fn into_behavior(self) -> Behavior {
        match self {
            Commands::CloseUponAcceptance => Behavior::CloseUponAcceptance,
            Commands::DelayBeforeSendingOnce { delay } => Behavior::DelayBeforeSendingOnce { delay },
            Commands::DelayBeforeSending { delay, chunk_len } => {
                Behavior::DelayBeforeSending { delay, chunk_len }
            }
            Commands::DelayBeforeSendingUponAcceptanceOnce { delay } => {
                Behavior::DelayBeforeSendingUponAcceptanceOnce { delay }
            }
            Commands::DelayBeforeSendingUponAcceptance { delay, chunk_len } => {
                Behavior::DelayBeforeSendingUponAcceptance { delay, chunk_len }
            }
        }
    }
}

fn parse_secs(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{e}"))?;
    parse_delay(secs).map_err(|e| e.to_string())
}

/// Merge the config file (if any) with command-line flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(root) = &cli.root {
        config.server.root = root.clone();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut cli = Cli::parse();
    let config = load_config(&cli)?;

    let behavior = match cli.command.take() {
        Some(command) => command.into_behavior(),
        None => config.behavior()?.context(
            "No behavior given: pass a subcommand or set [behavior] in the config file",
        )?,
    };

    match &cli.config {
        Some(path) => tracing::info!("Loaded config from {}", path.display()),
        None => tracing::debug!("No config file given, using defaults"),
    }
    tracing::info!("Starting slowpoke on {} with {}", config.server.bind_address(), behavior);

    let server = DemoServer::bind(&config.server, behavior).context("Failed to start server")?;
    server.serve_forever()?;
    Ok(())
}
