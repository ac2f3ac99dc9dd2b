//! Hierarchical timing wheels: placement, advancement, and cascading.
//!
//! [`WheelStack`] is the pure cascade engine. It owns a fixed stack of
//! wheel levels (finest to coarsest) and a base-tick counter, and knows
//! nothing about clocks, threads, or job dispatch: one call to
//! [`WheelStack::advance_one`] is one base tick. That keeps the whole
//! algorithm deterministic and unit-testable in isolation; the timer layers
//! clocks and dispatch on top.
//!
//! # Geometry
//!
//! With `S` slots per level, level `L` has slot duration `S^L` base ticks
//! and total span `S^(L+1)` base ticks. All level pointers are derived from
//! the single base-tick counter: level `L` advances exactly when the counter
//! is a multiple of `S^L`, which is also the moment level `L-1` completes a
//! full rotation.
//!
//! # Re-anchoring
//!
//! Placement is computed from residual relative ticks, never from wall
//! time. Each [`Scheduled`] record stores the residual delay that will
//! remain when its slot is next visited; a cascade re-inserts the record
//! using that residual alone, so repeated rotations accumulate no drift.
//!
//! Delays beyond the coarsest wheel's span are clamped onto the coarsest
//! wheel with a rounds counter: each visit of the record's slot consumes
//! one full top-level rotation until the residual placement takes over.

use std::sync::Arc;

use crate::entry::Entry;
use crate::slot::{Scheduled, Slot};

/// One level of the hierarchy: a fixed ring of slots plus a rotation
/// pointer. Created once at construction, never resized.
#[derive(Debug)]
pub(crate) struct Wheel {
    level: usize,
    /// Duration of one slot at this level, in base ticks (`S^level`).
    slot_ticks: u64,
    /// Rotation pointer in `[0, slots.len())`.
    pointer: usize,
    slots: Vec<Slot>,
}

impl Wheel {
    fn new(level: usize, slot_ticks: u64, slot_count: usize) -> Self {
        let mut slots = Vec::with_capacity(slot_count);
        slots.resize_with(slot_count, Slot::default);
        Self {
            level,
            slot_ticks,
            pointer: 0,
            slots,
        }
    }
}

/// Where a record lands: level, slot index, owed rotations, and the
/// residual delay remaining at the slot's next visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    level: usize,
    slot: usize,
    rounds: u64,
    rem: u64,
}

/// The ordered stack of wheels and the single tick counter driving them.
///
/// Exclusive access discipline: exactly one owner mutates the stack (the
/// timer, under its wheel lock), so no per-slot locking exists on the
/// advancement path.
#[derive(Debug)]
pub(crate) struct WheelStack {
    wheels: Vec<Wheel>,
    slots_per_level: usize,
    /// Base ticks elapsed since construction.
    now_tick: u64,
    /// Live scheduled records across all slots.
    len: usize,
}

impl WheelStack {
    /// Builds the stack. Geometry is validated by the timer config before
    /// this is reached; `slots_per_level^levels` must fit in `u64`.
    pub(crate) fn new(slots_per_level: usize, levels: usize) -> Self {
        debug_assert!(slots_per_level >= 2);
        debug_assert!(levels >= 1);
        let s = slots_per_level as u64;
        let wheels = (0..levels)
            .map(|level| Wheel::new(level, s.pow(level as u32), slots_per_level))
            .collect();
        Self {
            wheels,
            slots_per_level,
            now_tick: 0,
            len: 0,
        }
    }

    /// Base ticks elapsed since construction.
    pub(crate) fn now_tick(&self) -> u64 {
        self.now_tick
    }

    /// Number of live scheduled records.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total span of the coarsest wheel, in base ticks.
    pub(crate) fn top_span(&self) -> u64 {
        let top = self.wheels.last().expect("at least one wheel level");
        top.slot_ticks * self.slots_per_level as u64
    }

    /// Anchors an entry `rem` base ticks ahead of the current position.
    ///
    /// `rem` is clamped to at least one tick; a job can never fire on the
    /// tick it was added.
    pub(crate) fn insert(&mut self, entry: Arc<Entry>, rem: u64) {
        let rem = rem.max(1);
        let p = self.placement(rem);
        tracing::trace!(
            entry = %entry.id(),
            rem,
            level = p.level,
            slot = p.slot,
            rounds = p.rounds,
            residual = p.rem,
            "anchor"
        );
        self.wheels[p.level].slots[p.slot].push(Scheduled {
            entry,
            rounds: p.rounds,
            rem: p.rem,
        });
        self.len += 1;
    }

    /// Computes the destination for a record due in `rem` base ticks.
    ///
    /// Chooses the finest level whose ring can hold the delay from the
    /// current pointer, `(pointer + offset) mod S`, where the offset counts
    /// pointer advances until the visit. The residual is fixed here, at
    /// anchor time: the visit tick of the chosen slot is exact because all
    /// pointers advance in lockstep off `now_tick`.
    fn placement(&self, rem: u64) -> Placement {
        debug_assert!(rem >= 1);
        let s = u128::from(self.slots_per_level as u64);
        // Widened: `phase + rem` exceeds u64 when rem is near u64::MAX and
        // the pointer sits off phase zero. Arbitrarily large delays must
        // place, never overflow.
        let rem_wide = u128::from(rem);

        for wheel in &self.wheels {
            let st = u128::from(wheel.slot_ticks);
            let phase = u128::from(self.now_tick) % st;
            let offset = (phase + rem_wide) / st;
            if offset == 0 {
                continue;
            }
            if offset <= s {
                let elapsed = offset * st - phase;
                return Placement {
                    level: wheel.level,
                    slot: (wheel.pointer + offset as usize) % self.slots_per_level,
                    rounds: 0,
                    rem: u64::try_from(rem_wide.saturating_sub(elapsed)).unwrap_or(u64::MAX),
                };
            }
        }

        // Beyond the coarsest span: clamp onto the top wheel and owe the
        // surplus as full rotations.
        let top = self.wheels.last().expect("at least one wheel level");
        let st = u128::from(top.slot_ticks);
        let phase = u128::from(self.now_tick) % st;
        let advances = (phase + rem_wide) / st;
        let rounds = (advances - 1) / s;
        let offset = advances - rounds * s;
        let elapsed = advances * st - phase;
        Placement {
            level: top.level,
            slot: (top.pointer + offset as usize) % self.slots_per_level,
            rounds: u64::try_from(rounds).unwrap_or(u64::MAX),
            rem: u64::try_from(rem_wide.saturating_sub(elapsed)).unwrap_or(u64::MAX),
        }
    }

    /// Advances the stack by one base tick, appending due entries to `due`.
    ///
    /// Level 0 advances every call; level `L` advances when the counter
    /// reaches a multiple of its slot duration, i.e. when level `L-1` just
    /// completed a rotation. Visiting a slot is a take-and-filter pass:
    /// closed records are dropped (lazy deletion), records owing rotations
    /// stay put minus one round, records with residual delay demote into
    /// finer wheels, and records with no residual are due.
    ///
    /// Cost is O(records in the visited slot at each level that advances
    /// this tick).
    pub(crate) fn advance_one(&mut self, due: &mut Vec<Arc<Entry>>) {
        self.now_tick += 1;

        for level_idx in 0..self.wheels.len() {
            if self.now_tick % self.wheels[level_idx].slot_ticks != 0 {
                break;
            }

            let pointer = {
                let wheel = &mut self.wheels[level_idx];
                wheel.pointer = (wheel.pointer + 1) % wheel.slots.len();
                wheel.pointer
            };
            let records = self.wheels[level_idx].slots[pointer].take();
            if records.is_empty() {
                continue;
            }

            tracing::trace!(
                tick = self.now_tick,
                level = level_idx,
                slot = pointer,
                records = records.len(),
                "visit"
            );

            for mut record in records {
                if record.entry.is_closed() {
                    self.len -= 1;
                    continue;
                }
                if record.rounds > 0 {
                    record.rounds -= 1;
                    self.wheels[level_idx].slots[pointer].push(record);
                    continue;
                }
                if record.rem == 0 {
                    self.len -= 1;
                    due.push(record.entry);
                    continue;
                }
                // Demote: re-anchor from the residual alone.
                let Scheduled { entry, rem, .. } = record;
                self.len -= 1;
                self.insert(entry, rem);
            }
        }
    }

    /// Drops all scheduled records without firing them.
    pub(crate) fn clear(&mut self) {
        for wheel in &mut self.wheels {
            for slot in &mut wheel.slots {
                let _ = slot.take();
            }
        }
        self.len = 0;
    }
}
