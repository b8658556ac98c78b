//! # slowpoke-server
//!
//! A small static file server for watching slowpoke behaviors from the
//! outside, plus a fixture that runs one in the background for tests.
//!
//! - [`DemoServer`]: binds a patchable listener, installs a
//!   [`Behavior`](slowpoke_core::Behavior) on it and serves files over
//!   HTTP/1.0, one connection at a time
//! - [`SlowServer`]: a [`DemoServer`] with
//!   `delay_before_sending_upon_acceptance` installed, running on its own
//!   thread and stopped on drop
//! - [`Config`]: TOML configuration for the server and its behavior

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod fixture;
pub mod http;
pub mod server;

pub use config::{BehaviorConfig, BehaviorKind, Config, ConfigError, ServerConfig};
pub use error::ServerError;
pub use fixture::{SlowServer, SlowServerBuilder};
pub use server::{DemoServer, ServerHandle};
