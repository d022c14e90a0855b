//! Stateful update processors instantiated from compiled link specs
//!
//! A link only ever reads the stable part of its inputs: every round it
//! processes the records in `(seen, horizon]`, where `horizon` is the meet of
//! its input watermarks, and then remembers `horizon` as `seen`. Output
//! records are therefore always at or before the output watermark, which is
//! what makes delivery order irrelevant to the result.

use crate::dynamic::DynamicLink;
use crate::graph::{GraphSettings, Wire};
use crate::partition::{Envelope, Ingress, Outgoing};
use std::sync::Arc;
use tempora_compiler::{ChannelId, LinkKind, LinkSpec};
use tempora_core::{
    Batch, LinkId, MapFn, ObserveContext, Observer, PartitionId, Predicate, ProtocolViolation,
    Record, Result, Signal, Time, Update, Value, Watermark,
};

/// Everything a link may consult while processing a round
pub(crate) struct LinkContext<'a> {
    pub observe: &'a ObserveContext<'a>,
    pub settings: &'a GraphSettings,
}

enum Operator {
    /// Fed from outside the link graph
    Ingress,
    Map(MapFn),
    Zip,
    Unzip,
    Split(Predicate),
    Merge {
        /// Start of the current instant range where both branches are active
        overlap: Option<Time>,
    },
    Delay(Time),
    Send {
        channel: ChannelId,
        to: PartitionId,
    },
    Observe(Arc<dyn Observer>),
    Dynamic(Box<DynamicLink>),
}

pub(crate) struct Link {
    id: LinkId,
    op: Operator,
    /// Local wire indices read by the link
    inputs: Vec<usize>,
    /// Local wire indices written by the link
    outputs: Vec<usize>,
    seen: Watermark,
}

impl Link {
    pub(crate) fn new(
        spec: &LinkSpec,
        inputs: Vec<usize>,
        outputs: Vec<usize>,
        home: &PartitionId,
        settings: &GraphSettings,
    ) -> Self {
        let op = match &spec.kind {
            LinkKind::Input { .. } | LinkKind::Receive { .. } => Operator::Ingress,
            LinkKind::Map { f, .. } => Operator::Map(f.clone()),
            LinkKind::Zip => Operator::Zip,
            LinkKind::Unzip => Operator::Unzip,
            LinkKind::Split { predicate, .. } => Operator::Split(predicate.clone()),
            LinkKind::Merge => Operator::Merge { overlap: None },
            LinkKind::Delay(d) => Operator::Delay(*d),
            LinkKind::Send { channel, to } => Operator::Send {
                channel: *channel,
                to: to.clone(),
            },
            LinkKind::Observe { observer, .. } => Operator::Observe(observer.clone()),
            LinkKind::Dynamic {
                library,
                input,
                output,
                latency,
            } => Operator::Dynamic(Box::new(DynamicLink::new(
                spec.id,
                library.clone(),
                input.clone(),
                output.clone(),
                *latency,
                home.clone(),
                settings.clone(),
            ))),
        };
        Self {
            id: spec.id,
            op,
            inputs,
            outputs,
            seen: Watermark::Origin,
        }
    }

    pub(crate) fn id(&self) -> LinkId {
        self.id
    }

    /// Input watermark processed so far
    pub(crate) fn seen(&self) -> Watermark {
        self.seen
    }

    /// Process newly stable input; returns the number of records produced
    pub(crate) fn process(
        &mut self,
        wires: &mut [Wire],
        ctx: &LinkContext<'_>,
        outgoing: &mut Vec<Outgoing>,
    ) -> Result<usize> {
        if matches!(self.op, Operator::Ingress) {
            return Ok(0);
        }
        let horizon = self
            .inputs
            .iter()
            .map(|&i| wires[i].signal.stability())
            .fold(Watermark::Final, Watermark::meet);
        if horizon <= self.seen {
            return Ok(0);
        }
        let after = self.seen;

        let produced = match &mut self.op {
            Operator::Ingress => 0,

            Operator::Map(f) => {
                let records: Vec<Record<Value>> = wires[self.inputs[0]]
                    .signal
                    .records_in(after, horizon)
                    .map(|r| Record {
                        time: r.time,
                        update: match &r.update {
                            Update::Active(v) => Update::Active(f(v)),
                            Update::Inactive => Update::Inactive,
                        },
                    })
                    .collect();
                emit(&mut wires[self.outputs[0]].signal, records, horizon)?
            }

            Operator::Zip => {
                let (a, b) = (&wires[self.inputs[0]].signal, &wires[self.inputs[1]].signal);
                let mut records = Vec::new();
                for t in instants(a, b, after, horizon) {
                    if let (Some(x), Some(y)) = (a.state_at(t), b.state_at(t)) {
                        let update = match (x, y) {
                            (Some(x), Some(y)) => Update::Active(Value::pair(x.clone(), y.clone())),
                            _ => Update::Inactive,
                        };
                        records.push(Record { time: t, update });
                    }
                }
                emit(&mut wires[self.outputs[0]].signal, records, horizon)?
            }

            Operator::Merge { overlap } => {
                let tolerance = ctx.settings.sum_overlap_tolerance;
                let (a, b) = (&wires[self.inputs[0]].signal, &wires[self.inputs[1]].signal);
                let mut records = Vec::new();
                for t in instants(a, b, after, horizon) {
                    let (x, y) = (a.state_at(t), b.state_at(t));
                    if x.is_none() && y.is_none() {
                        continue;
                    }
                    let (x, y) = (x.flatten(), y.flatten());
                    if x.is_some() && y.is_some() {
                        overlap.get_or_insert(t);
                    } else if let Some(since) = overlap.take() {
                        check_overlap(since, t, tolerance)?;
                    }
                    records.push(Record {
                        time: t,
                        update: Update::from(x.or(y).cloned()),
                    });
                }
                if let Some(since) = *overlap {
                    let now = horizon.time().unwrap_or(if horizon.is_final() {
                        Time::MAX
                    } else {
                        since
                    });
                    check_overlap(since, now, tolerance)?;
                }
                emit(&mut wires[self.outputs[0]].signal, records, horizon)?
            }

            Operator::Unzip => {
                let mut left = Vec::new();
                let mut right = Vec::new();
                for r in wires[self.inputs[0]].signal.records_in(after, horizon) {
                    let (l, rt) = match r.update.value().and_then(Value::as_pair) {
                        Some((l, rt)) => (Update::Active(l.clone()), Update::Active(rt.clone())),
                        None => (Update::Inactive, Update::Inactive),
                    };
                    left.push(Record { time: r.time, update: l });
                    right.push(Record { time: r.time, update: rt });
                }
                emit(&mut wires[self.outputs[0]].signal, left, horizon)?
                    + emit(&mut wires[self.outputs[1]].signal, right, horizon)?
            }

            Operator::Split(predicate) => {
                let mut left = Vec::new();
                let mut right = Vec::new();
                for r in wires[self.inputs[0]].signal.records_in(after, horizon) {
                    let (l, rt) = match &r.update {
                        Update::Active(v) if predicate(v) => (Update::Active(v.clone()), Update::Inactive),
                        Update::Active(v) => (Update::Inactive, Update::Active(v.clone())),
                        Update::Inactive => (Update::Inactive, Update::Inactive),
                    };
                    left.push(Record { time: r.time, update: l });
                    right.push(Record { time: r.time, update: rt });
                }
                emit(&mut wires[self.outputs[0]].signal, left, horizon)?
                    + emit(&mut wires[self.outputs[1]].signal, right, horizon)?
            }

            Operator::Delay(d) => {
                let d = *d;
                let records: Vec<Record<Value>> = wires[self.inputs[0]]
                    .signal
                    .records_in(after, horizon)
                    .cloned()
                    .map(|r| r.shifted(d))
                    .collect();
                emit(&mut wires[self.outputs[0]].signal, records, horizon.shift(d))?
            }

            Operator::Send { channel, to } => {
                let records: Vec<Record<Value>> = wires[self.inputs[0]]
                    .signal
                    .records_in(after, horizon)
                    .cloned()
                    .collect();
                let produced = records.len();
                outgoing.push(Outgoing {
                    to: to.clone(),
                    envelope: Envelope {
                        ingress: Ingress::Channel(*channel),
                        batch: Batch::new(records, horizon),
                    },
                });
                produced
            }

            Operator::Observe(observer) => {
                let records: Vec<Record<Value>> = wires[self.inputs[0]]
                    .signal
                    .records_in(after, horizon)
                    .cloned()
                    .collect();
                observer.observe(ctx.observe, &records, horizon);
                0
            }

            Operator::Dynamic(link) => {
                link.process(wires, &self.inputs, &self.outputs, after, horizon, ctx.observe)?
            }
        };

        self.seen = horizon;
        Ok(produced)
    }
}

/// Instants in `(after, upto]` where either input changes
fn instants(a: &Signal<Value>, b: &Signal<Value>, after: Watermark, upto: Watermark) -> Vec<Time> {
    let mut times: Vec<Time> = a
        .times_in(after, upto)
        .chain(b.times_in(after, upto))
        .collect();
    times.sort_unstable();
    times.dedup();
    times
}

fn check_overlap(since: Time, until: Time, tolerance: Time) -> Result<()> {
    if until.saturating_sub(since) > tolerance {
        return Err(ProtocolViolation::SumOverlap { since, time: until }.into());
    }
    Ok(())
}

/// Append records to an output wire and advance its watermark
///
/// Records that repeat the wire's current state are dropped.
pub(crate) fn emit(
    wire: &mut Signal<Value>,
    records: Vec<Record<Value>>,
    stability: Watermark,
) -> Result<usize> {
    let mut last = wire.last().map(|r| r.update.clone());
    let mut fresh = Vec::with_capacity(records.len());
    for record in records {
        if last.as_ref() == Some(&record.update) {
            continue;
        }
        last = Some(record.update.clone());
        fresh.push(record);
    }
    let produced = fresh.len();
    wire.merge_updates(fresh)?;
    if stability > wire.stability() {
        wire.advance_stability(stability)?;
    }
    Ok(produced)
}
