//! Error types for idle timer operations.

use thiserror::Error;

/// Errors reported by the idle timer registry and service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdleError {
    #[error("idle duration must be a positive number of milliseconds")]
    InvalidDuration,

    #[error("no idle timer registered for target")]
    NoTimerRegistered,

    #[error("idle timer service has shut down")]
    ServiceClosed,
}
