//! Error types for the scheduler.
//!
//! Error handling follows two rules:
//!
//! - Invalid configuration and invalid job arguments fail fast at the
//!   construction site, before any state is created. Nothing is surfaced
//!   mid-schedule.
//! - Job-body panics are not errors of the engine: they are recovered per
//!   invocation, reported through the configured panic hook, and never
//!   abort the tick loop (see [`crate::dispatch`]).

use std::time::Duration;

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by timer construction and the scheduling API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Slot count per wheel level must be at least 2.
    #[error("invalid slot count {0}: must be at least 2")]
    InvalidSlotCount(usize),

    /// Wheel depth must be at least 1.
    #[error("invalid wheel depth {0}: must be at least 1")]
    InvalidLevels(usize),

    /// Base tick duration must be positive.
    #[error("invalid base tick {0:?}: must be positive")]
    InvalidBaseTick(Duration),

    /// Dispatch worker count must be at least 1.
    #[error("invalid dispatch thread count {0}: must be at least 1")]
    InvalidDispatchThreads(usize),

    /// Job interval must be positive.
    #[error("invalid interval {0:?}: must be positive")]
    InvalidInterval(Duration),

    /// Delay before a deferred add must be positive.
    #[error("invalid delay {0:?}: must be positive")]
    InvalidDelay(Duration),

    /// Bounded-repeat count must be positive.
    #[error("invalid times {0}: must be positive")]
    InvalidTimes(i64),

    /// Entries may only be constructed in the ready or stopped state.
    #[error("invalid initial status {0}: must be ready or stopped")]
    InvalidInitialStatus(i8),

    /// The timer has been closed and accepts no further jobs.
    #[error("timer is closed")]
    TimerClosed,

    /// An environment override was set but could not be parsed.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnvValue {
        /// The environment variable name.
        var: &'static str,
        /// What the variable should have contained.
        expected: &'static str,
        /// The raw value found in the environment.
        value: String,
    },
}
