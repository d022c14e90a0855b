//! Update batches and idempotent admission
//!
//! A [`Batch`] is the unit of transfer between links and partitions: a set of
//! records plus the stability watermark the producer certifies with them.
//!
//! [`admit`] merges a batch into a signal so that delivery is idempotent and
//! insensitive to record order within a batch:
//! - records are sorted by time and exact duplicates are dropped
//! - records the signal already knows (at or below its watermark, or inside
//!   its received tail) are ignored when they agree with history
//! - a record that contradicts history is a protocol violation
//! - a watermark at or below the current one is a stale redelivery

use crate::error::{ProtocolViolation, Result};
use crate::signal::{Record, Signal};
use crate::time::Watermark;
use serde::{Deserialize, Serialize};

/// Records certified up to a stability watermark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch<T> {
    /// Updates carried by the batch, in any order
    pub records: Vec<Record<T>>,
    /// No update at or before this will follow from the same producer
    pub stability: Watermark,
}

impl<T> Batch<T> {
    /// Create a batch
    pub fn new(records: Vec<Record<T>>, stability: Watermark) -> Self {
        Self { records, stability }
    }

    /// A batch carrying no records, only advancing stability
    pub fn heartbeat(stability: Watermark) -> Self {
        Self::new(Vec::new(), stability)
    }

    /// Check if the batch carries no records
    pub fn is_heartbeat(&self) -> bool {
        self.records.is_empty()
    }
}

/// Outcome of admitting one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Admission {
    /// Records appended to the signal
    pub applied: usize,
    /// Records ignored as redeliveries of known history
    pub stale: usize,
    /// Whether the watermark moved forward
    pub advanced: bool,
}

impl Admission {
    /// Check if the batch had no effect at all
    pub fn is_noop(&self) -> bool {
        self.applied == 0 && !self.advanced
    }
}

/// Merge `batch` into `signal` idempotently
///
/// Either the whole batch is admitted or the signal is left untouched.
pub fn admit<T: Clone + PartialEq>(signal: &mut Signal<T>, batch: Batch<T>) -> Result<Admission> {
    let Batch {
        mut records,
        stability,
    } = batch;
    records.sort_by_key(|r| r.time);
    records.dedup();
    if let Some(pair) = records.windows(2).find(|w| w[0].time == w[1].time) {
        return Err(ProtocolViolation::ConflictingUpdate { time: pair[0].time }.into());
    }

    let current = signal.stability();
    let last = signal.last_time();
    let mut admission = Admission::default();
    let mut fresh = Vec::with_capacity(records.len());
    for record in records {
        let known = current.covers(record.time) || last.is_some_and(|l| record.time <= l);
        if !known {
            fresh.push(record);
            continue;
        }
        check_known(signal, &record)?;
        admission.stale += 1;
    }

    admission.applied = fresh.len();
    signal.merge_updates(fresh)?;
    if stability > current {
        signal.advance_stability(stability)?;
        admission.advanced = true;
    }
    Ok(admission)
}

/// Verify that a record inside known history agrees with it
fn check_known<T: PartialEq>(signal: &Signal<T>, record: &Record<T>) -> Result<()> {
    if let Some(existing) = signal.records().find(|r| r.time == record.time) {
        if existing == record {
            return Ok(());
        }
        return Err(ProtocolViolation::ConflictingUpdate { time: record.time }.into());
    }
    if !signal.stability().covers(record.time) {
        // Inside the received tail but between two records: it can only have
        // arrived out of order.
        return Err(ProtocolViolation::UpdateOutOfOrder {
            time: record.time,
            previous: signal.last_time().unwrap_or(record.time),
        }
        .into());
    }
    match signal.state_at(record.time) {
        Some(state) if state == record.update.value() => Ok(()),
        None if signal.first_time().is_some_and(|f| record.time >= f) => Ok(()),
        _ => Err(ProtocolViolation::UpdateBehindWatermark {
            time: record.time,
            watermark: signal.stability(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn batch(records: Vec<Record<i64>>, w: u64) -> Batch<i64> {
        Batch::new(records, Watermark::At(w))
    }

    #[test]
    fn test_admit_sorts_records() {
        let mut sig = Signal::new();
        let adm = admit(
            &mut sig,
            batch(vec![Record::inactive(20), Record::active(5, 1)], 20),
        )
        .unwrap();
        assert_eq!(adm.applied, 2);
        assert!(adm.advanced);
        assert_eq!(sig.sample_at(10).unwrap(), Some(&1));
    }

    #[test]
    fn test_redelivery_is_noop() {
        let mut sig = Signal::new();
        let b = batch(vec![Record::active(5, 1), Record::inactive(20)], 10);
        admit(&mut sig, b.clone()).unwrap();
        let before = sig.clone();

        let adm = admit(&mut sig, b).unwrap();
        assert!(adm.is_noop());
        assert_eq!(adm.stale, 2);
        assert_eq!(sig, before);
    }

    #[test]
    fn test_permutations_agree() {
        let records = vec![
            Record::active(1, 10),
            Record::active(4, 11),
            Record::inactive(6),
            Record::active(6, 12),
        ];
        // duplicate instant with different states is rejected in every order
        let mut a = Signal::new();
        let mut b = Signal::new();
        let ea = admit(&mut a, batch(records.clone(), 8)).unwrap_err();
        let mut reversed = records;
        reversed.reverse();
        let eb = admit(&mut b, batch(reversed, 8)).unwrap_err();
        assert_eq!(ea, eb);
        assert!(a.is_empty() && b.is_empty());

        let records = vec![Record::active(1, 10), Record::active(4, 11), Record::inactive(6)];
        let mut a = Signal::new();
        let mut b = Signal::new();
        admit(&mut a, batch(records.clone(), 8)).unwrap();
        admit(&mut b, batch(vec![records[2].clone(), records[0].clone(), records[1].clone()], 8))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_duplicates_within_batch_collapse() {
        let mut sig = Signal::new();
        let adm = admit(
            &mut sig,
            batch(vec![Record::active(3, 7), Record::active(3, 7)], 3),
        )
        .unwrap();
        assert_eq!(adm.applied, 1);
        assert_eq!(sig.len(), 1);
    }

    #[test]
    fn test_conflicting_history_is_violation() {
        let mut sig = Signal::new();
        admit(&mut sig, batch(vec![Record::active(5, 1)], 10)).unwrap();
        let err = admit(&mut sig, batch(vec![Record::active(5, 2)], 10)).unwrap_err();
        assert_eq!(
            err,
            Error::Protocol(ProtocolViolation::ConflictingUpdate { time: 5 })
        );
    }

    #[test]
    fn test_new_change_behind_watermark_is_violation() {
        let mut sig = Signal::new();
        admit(&mut sig, batch(vec![Record::active(5, 1)], 10)).unwrap();
        let err = admit(&mut sig, batch(vec![Record::active(8, 2)], 12)).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolViolation::UpdateBehindWatermark { time: 8, .. })
        ));
        assert_eq!(sig.stability(), Watermark::At(10));
    }

    #[test]
    fn test_stale_heartbeat_is_ignored() {
        let mut sig: Signal<i64> = Signal::new();
        admit(&mut sig, Batch::heartbeat(Watermark::At(30))).unwrap();
        let adm = admit(&mut sig, Batch::heartbeat(Watermark::At(10))).unwrap();
        assert!(adm.is_noop());
        assert_eq!(sig.stability(), Watermark::At(30));
    }

    #[test]
    fn test_redelivery_after_compaction() {
        let mut sig = Signal::new();
        let first = batch(vec![Record::active(0, 1), Record::active(10, 2)], 20);
        admit(&mut sig, first.clone()).unwrap();
        sig.compact();
        assert_eq!(sig.len(), 1);
        assert!(admit(&mut sig, first).unwrap().is_noop());
    }
}
