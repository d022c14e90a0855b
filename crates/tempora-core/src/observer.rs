//! Escape hatch for attaching side-effecting observers to a leaf signal
//!
//! Observers run outside the signal algebra, so the link that hosts one only
//! hands it records that have become stable: each record is delivered exactly
//! once, in time order, and never again at a later watermark.

use crate::identity::PartitionId;
use crate::registry::Registry;
use crate::signal::Record;
use crate::time::Watermark;
use crate::value::Value;

/// Context handed to an observer on every delivery
#[derive(Debug, Clone, Copy)]
pub struct ObserveContext<'a> {
    /// Partition running the observer
    pub partition: &'a PartitionId,
    /// Resource registry of the running network
    pub registry: &'a Registry,
}

/// A side-effecting consumer of a leaf signal
///
/// Implementations must not feed values back into the network at instants
/// they have already observed.
pub trait Observer: Send + Sync {
    /// Receive newly stable records, all at or before `stability`
    fn observe(&self, ctx: &ObserveContext<'_>, records: &[Record<Value>], stability: Watermark);
}

impl<F> Observer for F
where
    F: Fn(&[Record<Value>], Watermark) + Send + Sync,
{
    fn observe(&self, _ctx: &ObserveContext<'_>, records: &[Record<Value>], stability: Watermark) {
        self(records, stability)
    }
}
