//! Slots: unordered buckets of scheduled records within one wheel level.

use std::sync::Arc;

use crate::entry::Entry;

/// One entry's placement record inside a slot.
///
/// The record, not the entry, carries the wheel-position state: the residual
/// delay used for re-anchoring on cascade and the rounds counter for delays
/// exceeding the coarsest wheel's span. Moving a record between slots is a
/// transfer of ownership; an entry resides in exactly one slot at a time.
#[derive(Debug)]
pub(crate) struct Scheduled {
    pub(crate) entry: Arc<Entry>,
    /// Full top-wheel rotations still owed before this record is due.
    /// Only nonzero for records anchored on the coarsest wheel.
    pub(crate) rounds: u64,
    /// Base ticks that will remain when this record's slot is next visited.
    /// Zero means the record is due at that visit.
    pub(crate) rem: u64,
}

/// An unordered bucket of scheduled records sharing a coarse position.
///
/// Mutated only by the timer holding the wheel lock. Firing order among
/// records in the same slot is unspecified.
#[derive(Debug, Default)]
pub(crate) struct Slot {
    records: Vec<Scheduled>,
}

impl Slot {
    pub(crate) fn push(&mut self, record: Scheduled) {
        self.records.push(record);
    }

    /// Takes the slot's contents for a visit, leaving it empty.
    ///
    /// Visiting is an explicit take-and-filter pass: the caller re-anchors
    /// records that stay and drops closed ones, so no iteration ever runs
    /// concurrently with mutation.
    pub(crate) fn take(&mut self) -> Vec<Scheduled> {
        std::mem::take(&mut self.records)
    }
}
