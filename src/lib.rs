//! Idlewatch - per-target idle timers
//!
//! Watches targets for one or more idle thresholds at once and reports when
//! each threshold elapses and when activity returns afterwards.

pub mod config;
pub mod idle;
pub mod logging;

pub use idle::{IdleDuration, IdleError, IdleEvent, IdleTimerRegistry, IdleTimers};
