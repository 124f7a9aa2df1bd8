//! Configuration for a follower.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default ring buffer capacity in bytes.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Interval of the fill loop and of a waiting reader's re-checks.
pub const POLL_INTERVAL_FAST: Duration = Duration::from_millis(25);

/// Interval of the rotation loop.
pub const POLL_INTERVAL_SLOW: Duration = Duration::from_millis(250);

/// Where the first read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Offset 0 of the file as it exists at open time.
    Beginning,
    /// Only bytes appended after open.
    #[default]
    End,
}

/// How changes to the file are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Periodic fills plus periodic identity and size checks.
    #[default]
    Poll,
    /// Filesystem notifications, falling back to a file-level watch.
    Notify,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Poll => f.write_str("poll"),
            Strategy::Notify => f.write_str("notify"),
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" | "polling" => Ok(Strategy::Poll),
            "notify" => Ok(Strategy::Notify),
            other => Err(Error::InvalidOptions {
                message: format!("unknown strategy '{}'", other),
            }),
        }
    }
}

/// Options accepted by [`Follower::open`](crate::Follower::open).
///
/// ```
/// use log_follower::{Options, Strategy};
///
/// let options = Options::new()
///     .from_beginning()
///     .buffer_capacity(64 * 1024)
///     .strategy(Strategy::Notify);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub start: StartPosition,
    pub buffer_capacity: usize,
    pub strategy: Strategy,
    pub fast_interval: Duration,
    pub slow_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            start: StartPosition::End,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            strategy: Strategy::Poll,
            fast_interval: POLL_INTERVAL_FAST,
            slow_interval: POLL_INTERVAL_SLOW,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the file from offset 0 instead of from its current end.
    pub fn from_beginning(mut self) -> Self {
        self.start = StartPosition::Beginning;
        self
    }

    pub fn start(mut self, start: StartPosition) -> Self {
        self.start = start;
        self
    }

    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the fill interval and the rotation-check interval.
    pub fn poll_intervals(mut self, fast: Duration, slow: Duration) -> Self {
        self.fast_interval = fast;
        self.slow_interval = slow;
        self
    }

    /// Rejects values that cannot drive a follower.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(Error::InvalidOptions {
                message: "buffer capacity must be non-zero".to_string(),
            });
        }
        if self.fast_interval.is_zero() || self.slow_interval.is_zero() {
            return Err(Error::InvalidOptions {
                message: "poll intervals must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
