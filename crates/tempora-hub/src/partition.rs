//! Partitions - Independent logical threads running a share of the network
//!
//! A [`Partition`] owns the links the blueprint assigned to it, the wires
//! between them and one bounded hand-off queue. Each scheduling round:
//!
//! 1. flushes batches still addressed to downstream partitions
//! 2. drains its queue and admits every batch idempotently
//! 3. runs every link once, in topological order
//! 4. hands newly stable records to downstream partitions
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──step──▶ Running ──halt──▶ Draining ──upstream stopped, queues empty──▶ Stopped
//!   └───────────────halt────────────────┘
//! ```
//!
//! A protocol violation stops the partition immediately: it is a link or
//! compiler bug, not something a round can recover from.

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::queue::{HandoffQueue, PushError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempora_compiler::ChannelId;
use tempora_core::{Batch, ObserveContext, PartitionId, Registry, Value, Watermark};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle state of a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionState {
    /// Built but never stepped
    Idle,
    /// Processing input
    Running,
    /// Refusing external input, finishing what upstream partitions send
    Draining,
    /// Done; the queue is closed
    Stopped,
}

impl PartitionState {
    fn encode(self) -> u8 {
        match self {
            PartitionState::Idle => 0,
            PartitionState::Running => 1,
            PartitionState::Draining => 2,
            PartitionState::Stopped => 3,
        }
    }

    fn decode(raw: u8) -> Self {
        match raw {
            0 => PartitionState::Idle,
            1 => PartitionState::Running,
            2 => PartitionState::Draining,
            _ => PartitionState::Stopped,
        }
    }

    /// Check if the partition still accepts external input
    pub fn accepts_input(&self) -> bool {
        matches!(self, PartitionState::Idle | PartitionState::Running)
    }
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PartitionState::Idle => "idle",
            PartitionState::Running => "running",
            PartitionState::Draining => "draining",
            PartitionState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle state shared between a partition, its handles and its neighbors
#[derive(Debug)]
pub(crate) struct Status(AtomicU8);

impl Status {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(PartitionState::Idle.encode()))
    }

    pub(crate) fn get(&self) -> PartitionState {
        PartitionState::decode(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, state: PartitionState) {
        self.0.store(state.encode(), Ordering::SeqCst);
    }

    /// Move from `from` to `to` unless another thread changed the state first
    pub(crate) fn transition(&self, from: PartitionState, to: PartitionState) -> bool {
        self.0
            .compare_exchange(from.encode(), to.encode(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Ask the partition to drain; returns the state it was in
    pub(crate) fn request_halt(&self) -> PartitionState {
        loop {
            let current = self.get();
            match current {
                PartitionState::Idle | PartitionState::Running => {
                    if self.transition(current, PartitionState::Draining) {
                        return current;
                    }
                }
                other => return other,
            }
        }
    }
}

/// Where a batch enters a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ingress {
    /// External input port of the network
    Port(usize),
    /// Receiving end of a cross-partition channel
    Channel(ChannelId),
}

impl fmt::Display for Ingress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ingress::Port(port) => write!(f, "input[{}]", port),
            Ingress::Channel(channel) => write!(f, "{}", channel),
        }
    }
}

/// A batch addressed to one ingress of a partition
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub ingress: Ingress,
    pub batch: Batch<Value>,
}

/// An envelope waiting to be handed to another partition
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub to: PartitionId,
    pub envelope: Envelope,
}

/// What one scheduling round did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundReport {
    /// Batches admitted from the queue
    pub batches: usize,
    /// Records ignored as redeliveries
    pub stale: usize,
    /// Stability reached by every ingress of the partition
    pub horizon: Watermark,
    /// Records produced by the partition's links
    pub emitted: usize,
    /// Batches handed to downstream partitions
    pub sent: usize,
}

/// Result of [`Partition::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A round ran
    Ran(RoundReport),
    /// Nothing was queued
    Idle,
    /// A downstream queue is full; the outbox is kept for the next step
    Blocked,
    /// The partition has stopped
    Stopped,
}

/// One independently scheduled share of a network
pub struct Partition {
    id: PartitionId,
    status: Arc<Status>,
    graph: Graph,
    queue: Arc<HandoffQueue<Envelope>>,
    peers: HashMap<PartitionId, Arc<HandoffQueue<Envelope>>>,
    upstream: Vec<Arc<Status>>,
    outbox: VecDeque<Outgoing>,
    registry: Arc<Registry>,
    idle_wait: Duration,
}

impl Partition {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: PartitionId,
        status: Arc<Status>,
        graph: Graph,
        queue: Arc<HandoffQueue<Envelope>>,
        peers: HashMap<PartitionId, Arc<HandoffQueue<Envelope>>>,
        upstream: Vec<Arc<Status>>,
        registry: Arc<Registry>,
        idle_wait: Duration,
    ) -> Self {
        Self {
            id,
            status,
            graph,
            queue,
            peers,
            upstream,
            outbox: VecDeque::new(),
            registry,
            idle_wait,
        }
    }

    /// Name of the partition
    pub fn id(&self) -> &PartitionId {
        &self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> PartitionState {
        self.status.get()
    }

    /// Number of envelopes waiting in the hand-off queue
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Number of envelopes waiting for room downstream
    pub fn pending_outgoing(&self) -> usize {
        self.outbox.len()
    }

    /// Run one scheduling round
    ///
    /// Never blocks: a full downstream queue yields [`StepOutcome::Blocked`]
    /// and the envelopes are retried on the next step.
    pub fn step(&mut self) -> Result<StepOutcome> {
        match self.status.get() {
            PartitionState::Stopped => return Ok(StepOutcome::Stopped),
            PartitionState::Idle => {
                if self.status.transition(PartitionState::Idle, PartitionState::Running) {
                    info!(partition = %self.id, "partition running");
                }
            }
            _ => {}
        }

        if !self.flush() {
            debug!(partition = %self.id, pending = self.outbox.len(), "downstream queue full");
            return Ok(StepOutcome::Blocked);
        }

        let envelopes = self.queue.drain();
        if envelopes.is_empty() {
            if self.can_stop() {
                self.stop();
                return Ok(StepOutcome::Stopped);
            }
            return Ok(StepOutcome::Idle);
        }

        let mut report = RoundReport::default();
        for Envelope { ingress, batch } in envelopes {
            match self.graph.admit(&ingress, batch) {
                Ok(Some(admission)) => {
                    report.batches += 1;
                    report.stale += admission.stale;
                    if admission.is_noop() {
                        trace!(partition = %self.id, %ingress, "stale batch ignored");
                    }
                }
                Ok(None) => {}
                Err(source) => return Err(self.fault(source)),
            }
        }

        let ctx = ObserveContext {
            partition: &self.id,
            registry: &self.registry,
        };
        let output = match self.graph.run_round(&ctx) {
            Ok(output) => output,
            Err(source) => return Err(self.fault(source)),
        };
        report.emitted = output.emitted;
        report.horizon = output.horizon;
        report.sent = output.outgoing.len();
        self.outbox.extend(output.outgoing);

        if !self.flush() {
            debug!(partition = %self.id, pending = self.outbox.len(), "downstream queue full");
            return Ok(StepOutcome::Blocked);
        }
        Ok(StepOutcome::Ran(report))
    }

    /// Stop accepting external input and drain
    pub fn halt(&mut self) -> Result<()> {
        match self.status.request_halt() {
            PartitionState::Stopped => Err(Error::InvalidTransition {
                partition: self.id.clone(),
                from: PartitionState::Stopped,
                to: PartitionState::Draining,
            }),
            previous => {
                if previous != PartitionState::Draining {
                    info!(partition = %self.id, "partition draining");
                }
                self.queue.wake();
                Ok(())
            }
        }
    }

    /// Run rounds on the current thread until the partition stops
    pub fn run(mut self) -> Result<()> {
        loop {
            match self.step()? {
                StepOutcome::Ran(_) => {}
                StepOutcome::Blocked => self.flush_blocking(),
                StepOutcome::Idle => {
                    self.queue.wait_readable(self.idle_wait);
                }
                StepOutcome::Stopped => return Ok(()),
            }
        }
    }

    fn can_stop(&self) -> bool {
        self.status.get() == PartitionState::Draining
            && self.outbox.is_empty()
            && self.queue.is_empty()
            && self
                .upstream
                .iter()
                .all(|s| s.get() == PartitionState::Stopped)
    }

    fn stop(&mut self) {
        self.status.set(PartitionState::Stopped);
        self.queue.close();
        info!(partition = %self.id, "partition stopped");
    }

    fn fault(&mut self, source: tempora_core::Error) -> Error {
        error!(partition = %self.id, error = %source, "partition faulted");
        self.status.set(PartitionState::Stopped);
        self.queue.close();
        Error::Fault {
            partition: self.id.clone(),
            source,
        }
    }

    /// Hand queued envelopes downstream without blocking; `false` if one
    /// did not fit
    fn flush(&mut self) -> bool {
        while let Some(Outgoing { to, envelope }) = self.outbox.pop_front() {
            let Some(queue) = self.peers.get(&to).cloned() else {
                warn!(partition = %self.id, to = %to, "no channel to partition; batch dropped");
                continue;
            };
            match queue.try_push(envelope) {
                Ok(()) => {}
                Err(PushError::Full(envelope)) => {
                    self.outbox.push_front(Outgoing { to, envelope });
                    return false;
                }
                Err(PushError::Closed(_)) => {
                    warn!(partition = %self.id, to = %to, "downstream partition closed; batch dropped");
                }
            }
        }
        true
    }

    /// Hand queued envelopes downstream, waiting for room
    fn flush_blocking(&mut self) {
        while let Some(Outgoing { to, envelope }) = self.outbox.pop_front() {
            let Some(queue) = self.peers.get(&to).cloned() else {
                warn!(partition = %self.id, to = %to, "no channel to partition; batch dropped");
                continue;
            };
            if queue.push(envelope).is_err() {
                warn!(partition = %self.id, to = %to, "downstream partition closed; batch dropped");
            }
        }
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("queued", &self.queued())
            .field("outbox", &self.outbox.len())
            .finish()
    }
}
