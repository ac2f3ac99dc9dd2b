//! Tickwheel: a hierarchical timing-wheel job scheduler.
//!
//! # Overview
//!
//! Tickwheel schedules recurring and one-shot jobs on a stack of timing
//! wheels: the finest wheel counts base ticks, each coarser wheel counts
//! full rotations of the one below it. Placement and advancement are O(1)
//! per record, so millions of pending jobs cost no more per tick than the
//! handful that are actually due.
//!
//! # Core Properties
//!
//! - **Relative anchoring**: every placement is computed from residual ticks,
//!   never wall time, so cascading accumulates no drift
//! - **Fire-and-forget dispatch**: job bodies run on a worker pool; a slow
//!   job delays nothing but itself
//! - **Panic isolation**: a panicking job is recovered, reported, and stays
//!   scheduled; the tick loop and workers are never lost
//! - **No catch-up**: a clock jump fires each due entry at most once and
//!   re-anchors from the final position
//! - **Deterministic testing**: the same tick path runs against a
//!   [`VirtualClock`] where time moves only when the test says so
//!
//! # Module Structure
//!
//! - [`clock`]: Logical timestamps and pluggable time sources
//! - [`config`]: Timer configuration, defaults, and env overrides
//! - [`entry`]: Job entries and their status machine
//! - [`timer`]: The timer, tick processing, and the scheduling API
//! - [`dispatch`]: The worker pool and panic recovery
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tickwheel::{JobFlow, Timer, TimerConfig};
//!
//! # fn main() -> tickwheel::Result<()> {
//! let timer = Timer::new(TimerConfig::default())?;
//! timer.add(Duration::from_secs(1), || {
//!     println!("tick");
//!     JobFlow::Continue
//! })?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod entry;
pub mod error;
mod slot;
pub mod test_utils;
pub mod timer;
mod wheel;

// Re-exports for convenient access to core types
pub use clock::{Time, TimeSource, VirtualClock, WallClock};
pub use config::TimerConfig;
pub use dispatch::{PanicHook, PanicPayload};
pub use entry::{Entry, EntryId, Job, JobFlow, Status, UNLIMITED_TIMES};
pub use error::{Error, Result};
pub use timer::Timer;
