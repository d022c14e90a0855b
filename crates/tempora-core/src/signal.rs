//! Temporal signals and their discrete update encoding
//!
//! A [`Signal`] is a partial function from time to an optional value. It is
//! stored as a strictly time-increasing sequence of [`Record`]s, each saying
//! "from this instant on, the signal is active with `v`" or "is inactive".
//! Between two records the signal holds the last declared state. Before the
//! first record it has no state at all.
//!
//! The stability [`Watermark`] certifies that no record will ever arrive at or
//! before it, which is what allows [`Signal::compact`] to discard history.
//!
//! # Example
//!
//! ```
//! use tempora_core::{Record, Signal, Watermark};
//!
//! let mut sig = Signal::new();
//! sig.merge_updates([Record::active(0, 5), Record::inactive(100)]).unwrap();
//! sig.advance_stability(Watermark::At(150)).unwrap();
//!
//! assert_eq!(sig.sample_at(42).unwrap(), Some(&5));
//! assert_eq!(sig.sample_at(120).unwrap(), None);
//! ```

use crate::error::{Error, ProtocolViolation, Result};
use crate::time::{Delay, Time, Watermark};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// New state of a signal from some instant onward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Update<T> {
    /// The signal becomes active with a value
    Active(T),
    /// The signal becomes inactive
    Inactive,
}

impl<T> Update<T> {
    /// Check if this update activates the signal
    pub fn is_active(&self) -> bool {
        matches!(self, Update::Active(_))
    }

    /// The carried value, if active
    pub fn value(&self) -> Option<&T> {
        match self {
            Update::Active(v) => Some(v),
            Update::Inactive => None,
        }
    }

    /// Map the carried value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Update<U> {
        match self {
            Update::Active(v) => Update::Active(f(v)),
            Update::Inactive => Update::Inactive,
        }
    }
}

impl<T> From<Option<T>> for Update<T> {
    fn from(state: Option<T>) -> Self {
        match state {
            Some(v) => Update::Active(v),
            None => Update::Inactive,
        }
    }
}

/// A single timestamped update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record<T> {
    /// Instant from which the update holds
    pub time: Time,
    /// The new state
    pub update: Update<T>,
}

impl<T> Record<T> {
    /// Record activation with a value at `time`
    pub fn active(time: Time, value: T) -> Self {
        Self {
            time,
            update: Update::Active(value),
        }
    }

    /// Record deactivation at `time`
    pub fn inactive(time: Time) -> Self {
        Self {
            time,
            update: Update::Inactive,
        }
    }

    /// The same record offset by `delay`
    pub fn shifted(self, delay: Delay) -> Self {
        Self {
            time: self.time.saturating_add(delay),
            update: self.update,
        }
    }
}

/// A time-varying, possibly absent value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal<T> {
    /// Retained update history plus the pending future tail
    records: VecDeque<Record<T>>,
    /// No record will arrive at or before this
    stability: Watermark,
    /// Time of the first record ever merged (survives compaction)
    first: Option<Time>,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Signal<T> {
    /// Create a signal with no history and nothing stable
    pub fn new() -> Self {
        Self {
            records: VecDeque::new(),
            stability: Watermark::Origin,
            first: None,
        }
    }

    /// Current stability watermark
    pub fn stability(&self) -> Watermark {
        self.stability
    }

    /// Retained records, oldest first
    pub fn records(&self) -> impl Iterator<Item = &Record<T>> {
        self.records.iter()
    }

    /// Number of retained records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no records are retained
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Most recent record
    pub fn last(&self) -> Option<&Record<T>> {
        self.records.back()
    }

    /// Time of the most recent record
    pub fn last_time(&self) -> Option<Time> {
        self.records.back().map(|r| r.time)
    }

    /// Time of the first record ever merged, even if compacted since
    pub fn first_time(&self) -> Option<Time> {
        self.first
    }

    /// State at `t` regardless of stability
    ///
    /// Returns `None` when the signal has no retained state at `t`,
    /// `Some(None)` when it is inactive and `Some(Some(v))` when active.
    pub fn state_at(&self, t: Time) -> Option<Option<&T>> {
        let idx = self.records.partition_point(|r| r.time <= t);
        if idx == 0 {
            return None;
        }
        Some(self.records[idx - 1].update.value())
    }

    /// Sample the signal at `t`
    ///
    /// Only well defined at or before the stability watermark. Sampling
    /// before the first update is an error, not `None`.
    pub fn sample_at(&self, t: Time) -> Result<Option<&T>> {
        if !self.stability.covers(t) {
            return Err(Error::Unstable {
                time: t,
                watermark: self.stability,
            });
        }
        match self.state_at(t) {
            Some(state) => Ok(state),
            None => match self.first {
                Some(first) if t >= first => Err(Error::Compacted { time: t }),
                _ => Err(Error::Undefined { time: t }),
            },
        }
    }

    /// Append strictly time-increasing records after the watermark
    ///
    /// Either all records are appended or none is.
    pub fn merge_updates<I>(&mut self, updates: I) -> Result<()>
    where
        I: IntoIterator<Item = Record<T>>,
    {
        let updates: Vec<Record<T>> = updates.into_iter().collect();
        let mut previous = self.last_time();
        for record in &updates {
            if self.stability.covers(record.time) {
                return Err(ProtocolViolation::UpdateBehindWatermark {
                    time: record.time,
                    watermark: self.stability,
                }
                .into());
            }
            if let Some(previous) = previous {
                if record.time <= previous {
                    return Err(ProtocolViolation::UpdateOutOfOrder {
                        time: record.time,
                        previous,
                    }
                    .into());
                }
            }
            previous = Some(record.time);
        }
        if self.first.is_none() {
            self.first = updates.first().map(|r| r.time);
        }
        self.records.extend(updates);
        Ok(())
    }

    /// Raise the stability watermark
    ///
    /// A regression is a protocol violation.
    pub fn advance_stability(&mut self, watermark: Watermark) -> Result<()> {
        if watermark < self.stability {
            return Err(ProtocolViolation::WatermarkRegression {
                current: self.stability,
                proposed: watermark,
            }
            .into());
        }
        self.stability = watermark;
        Ok(())
    }

    /// Discard history at or before the watermark except the current state
    pub fn compact(&mut self) {
        self.compact_until(self.stability);
    }

    /// Like [`Signal::compact`], but never past `upto`
    ///
    /// Used when some consumer has not yet read everything up to the watermark.
    pub fn compact_until(&mut self, upto: Watermark) {
        let limit = upto.meet(self.stability);
        let covered = self.records.partition_point(|r| limit.covers(r.time));
        if covered > 1 {
            self.records.drain(..covered - 1);
        }
    }

    /// Instants of records in `(after, upto]`
    pub fn times_in(&self, after: Watermark, upto: Watermark) -> impl Iterator<Item = Time> + '_ {
        self.records_in(after, upto).map(|r| r.time)
    }

    /// Records in `(after, upto]`
    pub fn records_in(
        &self,
        after: Watermark,
        upto: Watermark,
    ) -> impl Iterator<Item = &Record<T>> + '_ {
        self.records
            .iter()
            .filter(move |r| !after.covers(r.time) && upto.covers(r.time))
    }
}

impl<T: Clone> Signal<T> {
    /// Build a signal from records and a watermark, validating both
    pub fn from_records<I>(records: I, stability: Watermark) -> Result<Self>
    where
        I: IntoIterator<Item = Record<T>>,
    {
        let mut signal = Self::new();
        signal.merge_updates(records)?;
        signal.advance_stability(stability)?;
        Ok(signal)
    }

    /// A signal active with `value` on `[start, end)`
    ///
    /// # Panics
    ///
    /// Panics if `end <= start`
    pub fn interval(value: T, start: Time, end: Time) -> Self {
        assert!(end > start, "interval end must follow its start");
        let mut signal = Self::new();
        signal.records.push_back(Record {
            time: start,
            update: Update::Active(value),
        });
        signal.records.push_back(Record::inactive(end));
        signal.first = Some(start);
        signal
    }

    /// Shift every update and the watermark forward by `delay`
    pub fn delay(&self, delay: Delay) -> Signal<T> {
        Signal {
            records: self
                .records
                .iter()
                .cloned()
                .map(|r| r.shifted(delay))
                .collect(),
            stability: self.stability.shift(delay),
            first: self.first.map(|t| t.saturating_add(delay)),
        }
    }

    /// Apply `f` to every active value, keeping timing unchanged
    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> Signal<U> {
        Signal {
            records: self
                .records
                .iter()
                .map(|r| Record {
                    time: r.time,
                    update: match &r.update {
                        Update::Active(v) => Update::Active(f(v)),
                        Update::Inactive => Update::Inactive,
                    },
                })
                .collect(),
            stability: self.stability,
            first: self.first,
        }
    }
}

/// Combine two signals instant by instant
///
/// `f` receives each side's state (`None` when undefined) at every instant
/// where either side changes, and returns the output state or `None` to leave
/// the output undefined. Consecutive identical states are collapsed.
fn combine<A, B, C, F>(a: &Signal<A>, b: &Signal<B>, f: F) -> Signal<C>
where
    C: Clone + PartialEq,
    F: Fn(Option<Option<&A>>, Option<Option<&B>>) -> Option<Update<C>>,
{
    let mut times: Vec<Time> = a
        .records
        .iter()
        .map(|r| r.time)
        .chain(b.records.iter().map(|r| r.time))
        .collect();
    times.sort_unstable();
    times.dedup();

    let mut out = Signal::new();
    for t in times {
        if let Some(update) = f(a.state_at(t), b.state_at(t)) {
            if out.records.back().map(|r: &Record<C>| &r.update) != Some(&update) {
                out.records.push_back(Record { time: t, update });
            }
        }
    }
    out.first = out.records.front().map(|r| r.time);
    out.stability = a.stability.meet(b.stability);
    out
}

/// Synchronized product: active exactly when both sides are active
pub fn zip<A, B>(a: &Signal<A>, b: &Signal<B>) -> Signal<(A, B)>
where
    A: Clone + PartialEq,
    B: Clone + PartialEq,
{
    combine(a, b, |sa, sb| match (sa?, sb?) {
        (Some(x), Some(y)) => Some(Update::Active((x.clone(), y.clone()))),
        _ => Some(Update::Inactive),
    })
}

/// Split a product signal into its components
pub fn unzip<A: Clone, B: Clone>(signal: &Signal<(A, B)>) -> (Signal<A>, Signal<B>) {
    (
        signal.map(|(a, _)| a.clone()),
        signal.map(|(_, b)| b.clone()),
    )
}

/// Combine two disjoint choice branches into one signal
///
/// The branches must never be active at the same instant; this is guaranteed
/// by construction and not checked here. The left branch is preferred.
pub fn merge<T: Clone + PartialEq>(a: &Signal<T>, b: &Signal<T>) -> Signal<T> {
    combine(a, b, |sa, sb| {
        if sa.is_none() && sb.is_none() {
            return None;
        }
        match (sa.flatten(), sb.flatten()) {
            (Some(v), _) | (None, Some(v)) => Some(Update::Active(v.clone())),
            (None, None) => Some(Update::Inactive),
        }
    })
}

/// Route a signal into two disjoint branches by a predicate
pub fn split<T, P>(signal: &Signal<T>, predicate: P) -> (Signal<T>, Signal<T>)
where
    T: Clone,
    P: Fn(&T) -> bool,
{
    let mut left = Signal::new();
    let mut right = Signal::new();
    for record in &signal.records {
        let (l, r) = match &record.update {
            Update::Active(v) if predicate(v) => (Update::Active(v.clone()), Update::Inactive),
            Update::Active(v) => (Update::Inactive, Update::Active(v.clone())),
            Update::Inactive => (Update::Inactive, Update::Inactive),
        };
        left.records.push_back(Record {
            time: record.time,
            update: l,
        });
        right.records.push_back(Record {
            time: record.time,
            update: r,
        });
    }
    left.first = signal.first;
    right.first = signal.first;
    left.stability = signal.stability;
    right.stability = signal.stability;
    (left, right)
}
