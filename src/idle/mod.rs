//! Per-target idle timers with independent durations.
//!
//! [`IdleTimerRegistry`] is the synchronous state machine; [`IdleTimers`]
//! runs it on a tokio task and exposes an async handle.

mod clock;
mod duration;
mod error;
mod events;
mod registry;
mod service;
mod source;
mod target;
mod watcher;

pub use clock::{Clock, Deadline, TimerId};
pub use duration::IdleDuration;
pub use error::IdleError;
pub use events::{IdleEvent, IdleObserver};
pub use registry::IdleTimerRegistry;
pub use service::{IdleTimers, DEFAULT_EVENT_CAPACITY};
pub use source::{ActivitySource, SubscriptionId, SubscriptionSet};
pub use watcher::WatcherStatus;
