//! Bounded, timestamped status history
//!
//! A [`StatusSchedule`] is a log of status values ordered by timestamp.
//! Inserts may arrive out of order; each entry lands at its chronological
//! position and the newest entry (by timestamp, ties broken by insertion
//! order) is the current status. When the log exceeds its bound the entry
//! with the oldest timestamp is evicted.
//!
//! The schedule never holds zero entries: it is seeded with the status
//! type's `UNKNOWN` sentinel on construction.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::status::StatusValue;
use crate::types::{timestamp_from_millis, Clock, Timestamp};

/// Default bound when an entity kind does not configure one
pub const DEFAULT_MAX_SCHEDULE_SIZE: usize = 15;

/// Immutable status value stamped with the time it became valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampedStatus<S> {
    pub timestamp: Timestamp,
    pub value: S,
}

impl<S> TimestampedStatus<S> {
    pub fn new(timestamp: Timestamp, value: S) -> Self {
        Self { timestamp, value }
    }
}

/// How [`StatusSchedule::set`] treats the existing history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Discard the existing history first
    Replace,
    /// Insert every value into the existing history
    Merge,
}

/// Head transition produced by a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadChange<S> {
    pub old: TimestampedStatus<S>,
    pub new: TimestampedStatus<S>,
}

#[derive(Debug)]
struct Inner<S> {
    /// Ascending by timestamp, equal timestamps in insertion order
    entries: Vec<TimestampedStatus<S>>,
}

impl<S: StatusValue> Inner<S> {
    fn head(&self) -> TimestampedStatus<S> {
        // Never empty: seeded on construction and re-seeded on empty replace.
        self.entries
            .last()
            .copied()
            .unwrap_or_else(|| TimestampedStatus::new(timestamp_from_millis(0), S::UNKNOWN))
    }

    fn insert(&mut self, status: TimestampedStatus<S>, max_size: usize) {
        // Equal timestamps sort before us: later inserts win ties.
        let pos = self
            .entries
            .partition_point(|e| e.timestamp <= status.timestamp);
        self.entries.insert(pos, status);

        if self.entries.len() > max_size {
            self.entries.remove(0);
        }
    }
}

/// Bounded ordered history of timestamped status values
pub struct StatusSchedule<S> {
    inner: RwLock<Inner<S>>,
    max_size: usize,
    clock: Arc<dyn Clock>,
}

impl<S: StatusValue> StatusSchedule<S> {
    /// Create a schedule seeded with `S::UNKNOWN` at the clock's current time
    pub fn new(max_size: usize, clock: Arc<dyn Clock>) -> Self {
        let seed = TimestampedStatus::new(clock.now(), S::UNKNOWN);
        Self::with_initial(max_size, clock, seed)
    }

    /// Create a schedule seeded with an explicit first entry
    pub fn with_initial(max_size: usize, clock: Arc<dyn Clock>, initial: TimestampedStatus<S>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: vec![initial],
            }),
            max_size: max_size.max(1),
            clock,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Always false; kept for API symmetry with collections
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Record `value` at `timestamp` (or now)
    ///
    /// Returns the head transition when the inserted entry became the new
    /// current status with a different value. Equal values are still
    /// recorded but produce no transition.
    pub fn insert(&self, value: S, timestamp: Option<Timestamp>) -> Option<HeadChange<S>> {
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now());
        let status = TimestampedStatus::new(timestamp, value);

        let mut inner = self.inner.write();
        let old = inner.head();
        inner.insert(status, self.max_size);
        let new = inner.head();

        head_change(old, new, status)
    }

    /// Bulk update
    ///
    /// `Replace` discards the existing history (an empty replacement
    /// re-seeds the `UNKNOWN` sentinel at the current time); `Merge` inserts
    /// each value at its chronological position. At most one transition is
    /// reported, comparing the head before and after the whole batch.
    pub fn set(&self, values: &[TimestampedStatus<S>], mode: SetMode) -> Option<HeadChange<S>> {
        let mut inner = self.inner.write();
        let old = inner.head();

        if mode == SetMode::Replace {
            inner.entries.clear();
            if values.is_empty() {
                let seed = TimestampedStatus::new(self.clock.now(), S::UNKNOWN);
                inner.insert(seed, self.max_size);
            }
        }

        for status in values {
            inner.insert(*status, self.max_size);
        }

        let new = inner.head();
        if old.value != new.value {
            Some(HeadChange { old, new })
        } else {
            None
        }
    }

    /// Latest-timestamp entry
    pub fn current(&self) -> TimestampedStatus<S> {
        self.inner.read().head()
    }

    /// Value of the latest-timestamp entry
    pub fn current_value(&self) -> S {
        self.current().value
    }

    /// Snapshot of the history, newest first
    pub fn history(&self) -> Vec<TimestampedStatus<S>> {
        self.inner
            .read()
            .entries
            .iter()
            .rev()
            .copied()
            .collect()
    }
}

/// Read-only handle on a schedule owned by an entity
///
/// Entities hand this out instead of the schedule itself so every mutation
/// goes through the entity and reaches its subscribers and ancestors.
pub struct ScheduleView<'a, S> {
    schedule: &'a StatusSchedule<S>,
}

impl<'a, S: StatusValue> ScheduleView<'a, S> {
    pub(crate) fn new(schedule: &'a StatusSchedule<S>) -> Self {
        Self { schedule }
    }

    pub fn max_size(&self) -> usize {
        self.schedule.max_size()
    }

    pub fn len(&self) -> usize {
        self.schedule.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty()
    }

    pub fn current(&self) -> TimestampedStatus<S> {
        self.schedule.current()
    }

    pub fn current_value(&self) -> S {
        self.schedule.current_value()
    }

    pub fn history(&self) -> Vec<TimestampedStatus<S>> {
        self.schedule.history()
    }
}

impl<S> Clone for ScheduleView<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for ScheduleView<'_, S> {}

impl<S: StatusValue> std::fmt::Debug for ScheduleView<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self.schedule, f)
    }
}

fn head_change<S: StatusValue>(
    old: TimestampedStatus<S>,
    new: TimestampedStatus<S>,
    inserted: TimestampedStatus<S>,
) -> Option<HeadChange<S>> {
    if new == inserted && new.value != old.value {
        Some(HeadChange { old, new })
    } else {
        None
    }
}

impl<S: StatusValue> std::fmt::Debug for StatusSchedule<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusSchedule")
            .field("current", &self.current())
            .field("len", &self.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}
