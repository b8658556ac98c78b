//! Controllers for installed behaviors.
//!
//! A controller is a cheap `Clone` handle onto shared parameters. Hooks hold
//! one clone and read the parameters each time they fire, so changes made
//! through any other clone apply from the next intercepted call on.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Chunk length used when none is given.
pub const DEFAULT_CHUNK_LEN: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(len) => len,
    None => panic!("default chunk length must be non-zero"),
};

/// Delay stored as whole nanoseconds.
#[derive(Debug)]
struct DelayCell(AtomicU64);

impl DelayCell {
    fn new(delay: Duration) -> Self {
        Self(AtomicU64::new(Self::to_nanos(delay)))
    }

    fn to_nanos(delay: Duration) -> u64 {
        u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX)
    }

    fn get(&self) -> Duration {
        Duration::from_nanos(self.0.load(Ordering::Acquire))
    }

    fn set(&self, delay: Duration) {
        self.0.store(Self::to_nanos(delay), Ordering::Release);
    }
}

#[derive(Debug)]
struct ChunkLenCell(AtomicUsize);

impl ChunkLenCell {
    fn new(len: NonZeroUsize) -> Self {
        Self(AtomicUsize::new(len.get()))
    }

    fn get(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.0.load(Ordering::Acquire)).unwrap_or(DEFAULT_CHUNK_LEN)
    }

    fn set(&self, len: NonZeroUsize) {
        self.0.store(len.get(), Ordering::Release);
    }
}

#[derive(Debug)]
struct DelayOnceState {
    delay: DelayCell,
    used: AtomicBool,
}

/// Controls [`delay_before_sending_once`](crate::delay_before_sending_once).
#[derive(Clone)]
pub struct DelayOnceController {
    state: Arc<DelayOnceState>,
}

impl DelayOnceController {
    /// Create an armed controller.
    pub fn new(delay: Duration) -> Self {
        Self {
            state: Arc::new(DelayOnceState {
                delay: DelayCell::new(delay),
                used: AtomicBool::new(false),
            }),
        }
    }

    /// Delay applied by the next armed send.
    pub fn delay(&self) -> Duration {
        self.state.delay.get()
    }

    /// Change the delay.
    pub fn set_delay(&self, delay: Duration) {
        self.state.delay.set(delay);
    }

    /// Re-arm so the next send is delayed again.
    pub fn reset(&self) {
        self.state.used.store(false, Ordering::Release);
    }

    /// Whether the delay has fired since creation or the last reset.
    pub fn is_used(&self) -> bool {
        self.state.used.load(Ordering::Acquire)
    }

    /// Mark the controller used and report whether this call was the first
    /// since creation or the last reset. Exactly one of any number of
    /// concurrent callers sees `true`.
    pub(crate) fn mark_used_if_first(&self) -> bool {
        !self.state.used.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for DelayOnceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayOnceController")
            .field("delay", &self.delay())
            .field("used", &self.is_used())
            .finish()
    }
}

#[derive(Debug)]
struct DelayState {
    delay: DelayCell,
    chunk_len: ChunkLenCell,
}

/// Controls [`delay_before_sending`](crate::delay_before_sending).
#[derive(Clone)]
pub struct DelayController {
    state: Arc<DelayState>,
}

impl DelayController {
    /// Create a controller.
    pub fn new(delay: Duration, chunk_len: NonZeroUsize) -> Self {
        Self {
            state: Arc::new(DelayState {
                delay: DelayCell::new(delay),
                chunk_len: ChunkLenCell::new(chunk_len),
            }),
        }
    }

    /// Delay applied before every send and every chunk.
    pub fn delay(&self) -> Duration {
        self.state.delay.get()
    }

    /// Change the delay.
    pub fn set_delay(&self, delay: Duration) {
        self.state.delay.set(delay);
    }

    /// Maximum bytes per send or chunk.
    pub fn chunk_len(&self) -> NonZeroUsize {
        self.state.chunk_len.get()
    }

    /// Change the chunk length.
    pub fn set_chunk_len(&self, chunk_len: NonZeroUsize) {
        self.state.chunk_len.set(chunk_len);
    }
}

impl fmt::Debug for DelayController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayController")
            .field("delay", &self.delay())
            .field("chunk_len", &self.chunk_len())
            .finish()
    }
}

/// Controls
/// [`delay_before_sending_upon_acceptance_once`](crate::delay_before_sending_upon_acceptance_once).
///
/// Holds the template applied to each accepted connection. Every connection
/// gets its own one-shot state, created with the delay current at the moment
/// of acceptance.
#[derive(Clone)]
pub struct AcceptanceDelayOnceController {
    delay: Arc<DelayCell>,
}

impl AcceptanceDelayOnceController {
    /// Create a controller.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay: Arc::new(DelayCell::new(delay)),
        }
    }

    /// Delay given to the next accepted connection.
    pub fn delay(&self) -> Duration {
        self.delay.get()
    }

    /// Change the delay for connections accepted from now on.
    pub fn set_delay(&self, delay: Duration) {
        self.delay.set(delay);
    }
}

impl fmt::Debug for AcceptanceDelayOnceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptanceDelayOnceController")
            .field("delay", &self.delay())
            .finish()
    }
}

/// Controls
/// [`delay_before_sending_upon_acceptance`](crate::delay_before_sending_upon_acceptance).
///
/// Holds the template applied to each accepted connection. Connections
/// already accepted keep the values they were given.
#[derive(Clone)]
pub struct AcceptanceDelayController {
    state: Arc<DelayState>,
}

impl AcceptanceDelayController {
    /// Create a controller.
    pub fn new(delay: Duration, chunk_len: NonZeroUsize) -> Self {
        Self {
            state: Arc::new(DelayState {
                delay: DelayCell::new(delay),
                chunk_len: ChunkLenCell::new(chunk_len),
            }),
        }
    }

    /// Delay given to the next accepted connection.
    pub fn delay(&self) -> Duration {
        self.state.delay.get()
    }

    /// Change the delay for connections accepted from now on.
    pub fn set_delay(&self, delay: Duration) {
        self.state.delay.set(delay);
    }

    /// Chunk length given to the next accepted connection.
    pub fn chunk_len(&self) -> NonZeroUsize {
        self.state.chunk_len.get()
    }

    /// Change the chunk length for connections accepted from now on.
    pub fn set_chunk_len(&self, chunk_len: NonZeroUsize) {
        self.state.chunk_len.set(chunk_len);
    }
}

impl fmt::Debug for AcceptanceDelayController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptanceDelayController")
            .field("delay", &self.delay())
            .field("chunk_len", &self.chunk_len())
            .finish()
    }
}
