//! Timer configuration: wheel geometry, tick resolution, and dispatch pool
//! sizing.
//!
//! # Configuration precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic** — values set via builder methods (`slots_per_level(16)`)
//! 2. **Environment variables** — values from `TICKWHEEL_*` env vars
//! 3. **Defaults** — built-in defaults from [`TimerConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `TICKWHEEL_SLOTS` | `usize` | `slots_per_level` |
//! | `TICKWHEEL_LEVELS` | `usize` | `levels` |
//! | `TICKWHEEL_BASE_TICK_MS` | `u64` | `base_tick` (milliseconds) |
//! | `TICKWHEEL_DISPATCH_THREADS` | `usize` | `dispatch_threads` |
//! | `TICKWHEEL_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//!
//! All geometry is validated fail-fast by [`TimerConfig::validate`] before
//! any timer state exists; nothing is clamped silently.

use std::fmt;
use std::time::Duration;

use crate::dispatch::PanicHook;
use crate::error::{Error, Result};

/// Environment variable name for slots per wheel level.
pub const ENV_SLOTS: &str = "TICKWHEEL_SLOTS";
/// Environment variable name for wheel depth.
pub const ENV_LEVELS: &str = "TICKWHEEL_LEVELS";
/// Environment variable name for the base tick, in milliseconds.
pub const ENV_BASE_TICK_MS: &str = "TICKWHEEL_BASE_TICK_MS";
/// Environment variable name for the dispatch worker count.
pub const ENV_DISPATCH_THREADS: &str = "TICKWHEEL_DISPATCH_THREADS";
/// Environment variable name for the worker thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "TICKWHEEL_THREAD_NAME_PREFIX";

/// Default slots per wheel level.
pub const DEFAULT_SLOTS: usize = 10;
/// Default wheel depth.
pub const DEFAULT_LEVELS: usize = 6;
/// Default base tick.
pub const DEFAULT_BASE_TICK: Duration = Duration::from_millis(50);
/// Default dispatch worker count.
pub const DEFAULT_DISPATCH_THREADS: usize = 4;
/// Default bound on how long [`Timer::close`](crate::timer::Timer::close)
/// waits for in-flight jobs before detaching their workers.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a [`Timer`](crate::timer::Timer).
#[derive(Clone)]
pub struct TimerConfig {
    /// Slots per wheel level. Must be at least 2.
    pub slots_per_level: usize,
    /// Number of wheel levels. Must be at least 1, and
    /// `slots_per_level^levels` must fit in `u64`.
    pub levels: usize,
    /// Duration of one base tick. Must be positive. This is the scheduling
    /// resolution: every interval is quantized to a whole number of ticks,
    /// rounding up, with a minimum of one tick.
    pub base_tick: Duration,
    /// Number of dispatch worker threads. Must be at least 1.
    pub dispatch_threads: usize,
    /// Name prefix for the tick thread and dispatch workers.
    pub thread_name_prefix: String,
    /// Upper bound on how long `close` waits for in-flight jobs to finish.
    /// Workers still busy past the deadline are detached, not joined.
    pub shutdown_timeout: Duration,
    /// Callback invoked when a job body panics. When unset, recovered
    /// panics are logged at error level.
    pub panic_hook: Option<PanicHook>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            slots_per_level: DEFAULT_SLOTS,
            levels: DEFAULT_LEVELS,
            base_tick: DEFAULT_BASE_TICK,
            dispatch_threads: DEFAULT_DISPATCH_THREADS,
            thread_name_prefix: "tickwheel".to_string(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            panic_hook: None,
        }
    }
}

impl fmt::Debug for TimerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerConfig")
            .field("slots_per_level", &self.slots_per_level)
            .field("levels", &self.levels)
            .field("base_tick", &self.base_tick)
            .field("dispatch_threads", &self.dispatch_threads)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("panic_hook", &self.panic_hook.is_some())
            .finish()
    }
}

impl TimerConfig {
    /// Returns the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from defaults plus `TICKWHEEL_*` environment
    /// overrides.
    ///
    /// Only variables present in the environment are applied. Returns an
    /// error if a variable is set but unparseable; range validation happens
    /// later in [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Applies `TICKWHEEL_*` environment overrides to this configuration.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(val) = read_env(ENV_SLOTS) {
            self.slots_per_level = parse_usize(ENV_SLOTS, &val)?;
        }
        if let Some(val) = read_env(ENV_LEVELS) {
            self.levels = parse_usize(ENV_LEVELS, &val)?;
        }
        if let Some(val) = read_env(ENV_BASE_TICK_MS) {
            self.base_tick = Duration::from_millis(parse_u64(ENV_BASE_TICK_MS, &val)?);
        }
        if let Some(val) = read_env(ENV_DISPATCH_THREADS) {
            self.dispatch_threads = parse_usize(ENV_DISPATCH_THREADS, &val)?;
        }
        if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
            self.thread_name_prefix = val;
        }
        Ok(())
    }

    /// Sets the slots per wheel level.
    #[must_use]
    pub fn slots_per_level(mut self, slots: usize) -> Self {
        self.slots_per_level = slots;
        self
    }

    /// Sets the number of wheel levels.
    #[must_use]
    pub fn levels(mut self, levels: usize) -> Self {
        self.levels = levels;
        self
    }

    /// Sets the base tick duration.
    #[must_use]
    pub fn base_tick(mut self, base_tick: Duration) -> Self {
        self.base_tick = base_tick;
        self
    }

    /// Sets the dispatch worker count.
    #[must_use]
    pub fn dispatch_threads(mut self, threads: usize) -> Self {
        self.dispatch_threads = threads;
        self
    }

    /// Sets the thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Sets the bound on how long `close` waits for in-flight jobs.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the panic hook.
    #[must_use]
    pub fn panic_hook(mut self, hook: PanicHook) -> Self {
        self.panic_hook = Some(hook);
        self
    }

    /// Validates the configuration, failing fast on the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.slots_per_level < 2 {
            return Err(Error::InvalidSlotCount(self.slots_per_level));
        }
        if self.levels < 1 {
            return Err(Error::InvalidLevels(self.levels));
        }
        // The coarsest wheel's span must be representable in base ticks.
        let levels = u32::try_from(self.levels).map_err(|_| Error::InvalidLevels(self.levels))?;
        if (self.slots_per_level as u64).checked_pow(levels).is_none() {
            return Err(Error::InvalidLevels(self.levels));
        }
        if self.base_tick.is_zero() {
            return Err(Error::InvalidBaseTick(self.base_tick));
        }
        if self.dispatch_threads < 1 {
            return Err(Error::InvalidDispatchThreads(self.dispatch_threads));
        }
        Ok(())
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize> {
    val.trim().parse::<usize>().map_err(|_| Error::InvalidEnvValue {
        var,
        expected: "unsigned integer",
        value: val.to_string(),
    })
}

fn parse_u64(var: &'static str, val: &str) -> Result<u64> {
    val.trim().parse::<u64>().map_err(|_| Error::InvalidEnvValue {
        var,
        expected: "unsigned integer",
        value: val.to_string(),
    })
}
