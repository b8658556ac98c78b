//! # slowpoke-core
//!
//! Inject slow sends and abrupt disconnects into stream endpoints, for
//! testing how clients cope with a misbehaving network.
//!
//! ## Features
//!
//! - **Interception**: splice `before`/`after` hooks around `accept`, `send`
//!   and `send_all` on a live endpoint; hooks stack
//! - **Patchability Adapter**: move a native socket into a
//!   [`PatchableEndpoint`] that owns the same handle
//! - **Behaviors**: close upon acceptance, delay once, delay-and-chop, and
//!   the same delays propagated to every accepted connection
//! - **Controllers**: tune delays and chunk lengths after installation
//!
//! Everything runs synchronously on the caller's thread. Delays block that
//! thread.
//!
//! ## Example
//!
//! ```no_run
//! use slowpoke_core::{delay_before_sending_upon_acceptance, Endpoint, PatchableEndpoint, DEFAULT_CHUNK_LEN};
//! use std::time::Duration;
//!
//! let mut listener = PatchableEndpoint::bind("127.0.0.1:8000")?;
//! let controller = delay_before_sending_upon_acceptance(
//!     &mut listener,
//!     Duration::from_secs(1),
//!     DEFAULT_CHUNK_LEN,
//! )?;
//!
//! let (mut conn, _peer) = listener.accept()?;
//! // Sent in 1024-byte chunks, one second apart.
//! conn.send_all(b"hello")?;
//!
//! controller.set_delay(Duration::from_millis(100));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod behavior;
pub mod controller;
pub mod endpoint;
pub mod error;
pub mod intercept;
pub mod mock;
pub mod patchable;

pub use behavior::{
    close_upon_acceptance, delay_before_sending, delay_before_sending_once,
    delay_before_sending_upon_acceptance, delay_before_sending_upon_acceptance_once, Behavior,
    InstalledBehavior,
};
pub use controller::{
    AcceptanceDelayController, AcceptanceDelayOnceController, DelayController, DelayOnceController,
    DEFAULT_CHUNK_LEN,
};
pub use endpoint::{ClosedEndpoint, Endpoint, Operation};
pub use error::{InterceptError, ShapeError};
pub use intercept::{
    expect_outcome, install_accept_hook, install_hook, install_send_hooks, intercept, Args,
    Before, Hook, Implementation, OperationId, OperationTable, Outcome,
};
pub use mock::MockEndpoint;
pub use patchable::{ensure_patchable, ensure_patchable_all, PatchableEndpoint};
