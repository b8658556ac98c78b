//! Misbehaviors that can be installed on an endpoint.
//!
//! Each behavior is a plain function taking the endpoint to alter. The
//! [`Behavior`] enum names the same five behaviors as data, for front ends
//! that pick one at runtime.

mod accept;
mod send;

pub use accept::close_upon_acceptance;
pub use send::{
    delay_before_sending, delay_before_sending_once, delay_before_sending_upon_acceptance,
    delay_before_sending_upon_acceptance_once,
};

use crate::controller::{
    AcceptanceDelayController, AcceptanceDelayOnceController, DelayController, DelayOnceController,
};
use crate::endpoint::Endpoint;
use crate::error::InterceptError;
use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

/// A behavior together with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// See [`close_upon_acceptance`].
    CloseUponAcceptance,
    /// See [`delay_before_sending_once`].
    DelayBeforeSendingOnce {
        /// Delay before the first send.
        delay: Duration,
    },
    /// See [`delay_before_sending`].
    DelayBeforeSending {
        /// Delay before every send or chunk.
        delay: Duration,
        /// Maximum bytes per send or chunk.
        chunk_len: NonZeroUsize,
    },
    /// See [`delay_before_sending_upon_acceptance_once`].
    DelayBeforeSendingUponAcceptanceOnce {
        /// Delay before the first send on each accepted connection.
        delay: Duration,
    },
    /// See [`delay_before_sending_upon_acceptance`].
    DelayBeforeSendingUponAcceptance {
        /// Delay before every send or chunk on accepted connections.
        delay: Duration,
        /// Maximum bytes per send or chunk on accepted connections.
        chunk_len: NonZeroUsize,
    },
}

impl Behavior {
    /// Names of all behaviors, in declaration order.
    pub const NAMES: [&'static str; 5] = [
        "close_upon_acceptance",
        "delay_before_sending_once",
        "delay_before_sending",
        "delay_before_sending_upon_acceptance_once",
        "delay_before_sending_upon_acceptance",
    ];

    /// Name of this behavior.
    pub fn name(&self) -> &'static str {
        match self {
            Behavior::CloseUponAcceptance => Self::NAMES[0],
            Behavior::DelayBeforeSendingOnce { .. } => Self::NAMES[1],
            Behavior::DelayBeforeSending { .. } => Self::NAMES[2],
            Behavior::DelayBeforeSendingUponAcceptanceOnce { .. } => Self::NAMES[3],
            Behavior::DelayBeforeSendingUponAcceptance { .. } => Self::NAMES[4],
        }
    }

    /// Whether the behavior alters `accept` (and so needs a listening
    /// endpoint) rather than sending.
    pub fn acts_on_accept(&self) -> bool {
        matches!(
            self,
            Behavior::CloseUponAcceptance
                | Behavior::DelayBeforeSendingUponAcceptanceOnce { .. }
                | Behavior::DelayBeforeSendingUponAcceptance { .. }
        )
    }

    /// Install this behavior on `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`InterceptError::NotPatchable`] if the operations the
    /// behavior needs cannot be intercepted on `endpoint`.
    pub fn install(&self, endpoint: &mut dyn Endpoint) -> Result<InstalledBehavior, InterceptError> {
        let installed = match *self {
            Behavior::CloseUponAcceptance => {
                close_upon_acceptance(endpoint)?;
                InstalledBehavior::Closing
            }
            Behavior::DelayBeforeSendingOnce { delay } => {
                InstalledBehavior::DelayOnce(delay_before_sending_once(endpoint, delay)?)
            }
            Behavior::DelayBeforeSending { delay, chunk_len } => {
                InstalledBehavior::Delay(delay_before_sending(endpoint, delay, chunk_len)?)
            }
            Behavior::DelayBeforeSendingUponAcceptanceOnce { delay } => {
                InstalledBehavior::AcceptanceDelayOnce(delay_before_sending_upon_acceptance_once(
                    endpoint, delay,
                )?)
            }
            Behavior::DelayBeforeSendingUponAcceptance { delay, chunk_len } => {
                InstalledBehavior::AcceptanceDelay(delay_before_sending_upon_acceptance(
                    endpoint, delay, chunk_len,
                )?)
            }
        };
        tracing::debug!("Installed {}", self);
        Ok(installed)
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Behavior::CloseUponAcceptance => f.write_str(self.name()),
            Behavior::DelayBeforeSendingOnce { delay }
            | Behavior::DelayBeforeSendingUponAcceptanceOnce { delay } => {
                write!(f, "{} (delay {:?})", self.name(), delay)
            }
            Behavior::DelayBeforeSending { delay, chunk_len }
            | Behavior::DelayBeforeSendingUponAcceptance { delay, chunk_len } => {
                write!(
                    f,
                    "{} (delay {:?}, chunks of {} bytes)",
                    self.name(),
                    delay,
                    chunk_len
                )
            }
        }
    }
}

/// Handle returned by [`Behavior::install`].
#[derive(Debug, Clone)]
pub enum InstalledBehavior {
    /// [`close_upon_acceptance`] has no parameters to control.
    Closing,
    /// Controller of [`delay_before_sending_once`].
    DelayOnce(DelayOnceController),
    /// Controller of [`delay_before_sending`].
    Delay(DelayController),
    /// Controller of [`delay_before_sending_upon_acceptance_once`].
    AcceptanceDelayOnce(AcceptanceDelayOnceController),
    /// Controller of [`delay_before_sending_upon_acceptance`].
    AcceptanceDelay(AcceptanceDelayController),
}

impl InstalledBehavior {
    /// Current delay, if the behavior has one.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            InstalledBehavior::Closing => None,
            InstalledBehavior::DelayOnce(c) => Some(c.delay()),
            InstalledBehavior::Delay(c) => Some(c.delay()),
            InstalledBehavior::AcceptanceDelayOnce(c) => Some(c.delay()),
            InstalledBehavior::AcceptanceDelay(c) => Some(c.delay()),
        }
    }

    /// Change the delay. Returns `false` if the behavior has none.
    pub fn set_delay(&self, delay: Duration) -> bool {
        match self {
            InstalledBehavior::Closing => return false,
            InstalledBehavior::DelayOnce(c) => c.set_delay(delay),
            InstalledBehavior::Delay(c) => c.set_delay(delay),
            InstalledBehavior::AcceptanceDelayOnce(c) => c.set_delay(delay),
            InstalledBehavior::AcceptanceDelay(c) => c.set_delay(delay),
        }
        true
    }

    /// Current chunk length, if the behavior chops its sends.
    pub fn chunk_len(&self) -> Option<NonZeroUsize> {
        match self {
            InstalledBehavior::Delay(c) => Some(c.chunk_len()),
            InstalledBehavior::AcceptanceDelay(c) => Some(c.chunk_len()),
            _ => None,
        }
    }
}
