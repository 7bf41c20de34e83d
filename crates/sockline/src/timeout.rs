//! Timeouts and the deadlines they resolve to
//!
//! Every blocking operation on a [`Client`](crate::Client) takes a
//! [`Timeout`]. It is turned into a [`Deadline`] exactly once, when the call
//! starts, and the polling loop checks that deadline after each attempt.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// How long to sleep between polls of a non-blocking socket
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long an operation may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Wait until the operation's own stop condition fires
    #[default]
    Unbounded,
    /// Give up once this much time has passed since the call started
    After(Duration),
}

impl Timeout {
    pub fn from_millis(ms: u64) -> Self {
        Self::After(Duration::from_millis(ms))
    }

    /// `true` for `After(Duration::ZERO)`
    pub fn is_zero(&self) -> bool {
        matches!(self, Timeout::After(d) if d.is_zero())
    }

    /// Resolve against the current instant
    pub fn deadline(self) -> Deadline {
        self.deadline_from(Instant::now())
    }

    pub(crate) fn deadline_from(self, now: Instant) -> Deadline {
        match self {
            Timeout::Unbounded => Deadline::Never,
            // an overflowing instant is as good as never
            Timeout::After(d) => now.checked_add(d).map_or(Deadline::Never, Deadline::At),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(d: Option<Duration>) -> Self {
        d.map_or(Timeout::Unbounded, Timeout::After)
    }
}

/// Signed milliseconds, as they arrive from scripts and command lines
///
/// Negative values are rejected with [`Error::Configuration`].
impl TryFrom<i64> for Timeout {
    type Error = Error;

    fn try_from(ms: i64) -> Result<Self> {
        u64::try_from(ms)
            .map(Timeout::from_millis)
            .map_err(|_| Error::configuration(format!("timeout must not be negative, got {ms}ms")))
    }
}

/// An absolute point in time after which polling stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    Never,
    At(Instant),
}

impl Deadline {
    pub fn has_passed(&self) -> bool {
        self.has_passed_at(Instant::now())
    }

    pub(crate) fn has_passed_at(&self, now: Instant) -> bool {
        match self {
            Deadline::Never => false,
            Deadline::At(at) => now >= *at,
        }
    }
}
