//! Idle threshold newtype.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::IdleError;

/// A positive idle threshold, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct IdleDuration(u64);

impl IdleDuration {
    /// Threshold used when a caller does not name one (30 seconds).
    pub const DEFAULT: IdleDuration = IdleDuration(30_000);

    /// Build a threshold from milliseconds, rejecting zero.
    pub fn from_millis(ms: u64) -> Result<Self, IdleError> {
        if ms == 0 {
            return Err(IdleError::InvalidDuration);
        }
        Ok(Self(ms))
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl Default for IdleDuration {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u64> for IdleDuration {
    type Error = IdleError;

    fn try_from(ms: u64) -> Result<Self, Self::Error> {
        Self::from_millis(ms)
    }
}

impl From<IdleDuration> for u64 {
    fn from(duration: IdleDuration) -> Self {
        duration.0
    }
}

impl fmt::Display for IdleDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
