//! Per-partition link graph
//!
//! A [`Graph`] is the runtime form of the links a blueprint assigns to one
//! partition. Wires are stored in a flat arena indexed by local position;
//! links refer to them by index. After each round every wire is compacted
//! up to the slowest of its readers, so history is kept exactly as long as
//! some link or output port may still need it.

use crate::dynamic::{InstallLog, LocalMembranes, MembraneBuilder};
use crate::link::{Link, LinkContext};
use crate::partition::{Ingress, Outgoing};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tempora_compiler::{Blueprint, LinkKind};
use tempora_core::{
    admit, Admission, Batch, ObserveContext, PartitionId, Record, Result, Signal, Time, Value,
    WireId, Watermark,
};
use tracing::{trace, warn};

/// Settings every graph of a network shares, including installed sub-networks
#[derive(Clone)]
pub(crate) struct GraphSettings {
    pub sum_overlap_tolerance: Time,
    pub membranes: Arc<dyn MembraneBuilder>,
    pub failures: InstallLog,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            sum_overlap_tolerance: 0,
            membranes: Arc::new(LocalMembranes),
            failures: InstallLog::default(),
        }
    }
}

/// A leaf signal between links
#[derive(Default)]
pub(crate) struct Wire {
    pub signal: Signal<Value>,
    /// Links reading this wire
    pub readers: Vec<usize>,
    /// Output port publishing this wire
    pub port: Option<Arc<OutputPort>>,
}

/// What a round produced
#[derive(Debug, Default)]
pub(crate) struct RoundOutput {
    pub emitted: usize,
    pub outgoing: Vec<Outgoing>,
    pub horizon: Watermark,
}

pub(crate) struct Graph {
    partition: PartitionId,
    links: Vec<Link>,
    wires: Vec<Wire>,
    index: HashMap<WireId, usize>,
    ingress: HashMap<Ingress, usize>,
    settings: GraphSettings,
}

impl Graph {
    /// Instantiate the links `blueprint` assigns to `partition`
    pub(crate) fn instantiate(
        blueprint: &Blueprint,
        partition: &PartitionId,
        settings: GraphSettings,
    ) -> Self {
        let mut wires = Vec::new();
        let mut index = HashMap::new();
        for spec in blueprint.wires().iter().filter(|w| &w.partition == partition) {
            index.insert(spec.id, wires.len());
            wires.push(Wire::default());
        }

        let mut links = Vec::new();
        let mut ingress = HashMap::new();
        for spec in blueprint.links_on(partition) {
            let position = links.len();
            let inputs: Vec<usize> = spec.inputs.iter().filter_map(|w| index.get(w).copied()).collect();
            let outputs: Vec<usize> = spec.outputs.iter().filter_map(|w| index.get(w).copied()).collect();
            match spec.kind {
                LinkKind::Input { port } => {
                    if let Some(&wire) = outputs.first() {
                        ingress.insert(Ingress::Port(port), wire);
                    }
                }
                LinkKind::Receive { channel } => {
                    if let Some(&wire) = outputs.first() {
                        ingress.insert(Ingress::Channel(channel), wire);
                    }
                }
                _ => {}
            }
            for &wire in &inputs {
                wires[wire].readers.push(position);
            }
            links.push(Link::new(spec, inputs, outputs, partition, &settings));
        }

        Self {
            partition: partition.clone(),
            links,
            wires,
            index,
            ingress,
            settings,
        }
    }

    /// Publish every stable record of `wire` through `port`
    pub(crate) fn attach_port(&mut self, wire: WireId, port: Arc<OutputPort>) -> bool {
        match self.index.get(&wire) {
            Some(&i) => {
                self.wires[i].port = Some(port);
                true
            }
            None => false,
        }
    }

    /// Admit a batch arriving at `ingress`
    ///
    /// Batches for an ingress this graph does not have are dropped.
    pub(crate) fn admit(&mut self, ingress: &Ingress, batch: Batch<Value>) -> Result<Option<Admission>> {
        let Some(&wire) = self.ingress.get(ingress) else {
            warn!(partition = %self.partition, %ingress, "batch for unknown ingress dropped");
            return Ok(None);
        };
        admit(&mut self.wires[wire].signal, batch).map(Some)
    }

    /// Run every link once in topological order
    pub(crate) fn run_round(&mut self, observe: &ObserveContext<'_>) -> Result<RoundOutput> {
        let mut output = RoundOutput::default();
        let ctx = LinkContext {
            observe,
            settings: &self.settings,
        };
        for link in &mut self.links {
            let produced = link.process(&mut self.wires, &ctx, &mut output.outgoing)?;
            if produced > 0 {
                trace!(partition = %self.partition, link = %link.id(), produced, "link emitted");
            }
            output.emitted += produced;
        }

        for wire in &self.wires {
            if let Some(port) = &wire.port {
                port.publish(&wire.signal)?;
            }
        }

        for wire in &mut self.wires {
            let mut limit = wire.signal.stability();
            for &reader in &wire.readers {
                limit = limit.meet(self.links[reader].seen());
            }
            if let Some(port) = &wire.port {
                limit = limit.meet(port.published());
            }
            wire.signal.compact_until(limit);
        }

        output.horizon = self
            .ingress
            .values()
            .map(|&w| self.wires[w].signal.stability())
            .fold(Watermark::Final, Watermark::meet);
        Ok(output)
    }

    /// Number of retained records over all wires
    pub(crate) fn retained(&self) -> usize {
        self.wires.iter().map(|w| w.signal.len()).sum()
    }
}

#[derive(Debug, Default)]
struct PortState {
    signal: Signal<Value>,
    pending: Vec<Record<Value>>,
}

/// Stable records of one output leaf, shared with whoever reads them
#[derive(Debug, Default)]
pub struct OutputPort {
    state: Mutex<PortState>,
    retain: bool,
}

impl OutputPort {
    /// Create a port; a retaining port keeps full history for sampling
    pub(crate) fn new(retain: bool) -> Self {
        Self {
            state: Mutex::new(PortState::default()),
            retain,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PortState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy the records `wire` made stable since the last publication
    pub(crate) fn publish(&self, wire: &Signal<Value>) -> Result<()> {
        let mut state = self.lock();
        let from = state.signal.stability();
        let to = wire.stability();
        if to <= from {
            return Ok(());
        }
        let records: Vec<Record<Value>> = wire.records_in(from, to).cloned().collect();
        state.signal.merge_updates(records.iter().cloned())?;
        state.signal.advance_stability(to)?;
        if !self.retain {
            state.signal.compact();
        }
        state.pending.extend(records);
        Ok(())
    }

    /// Stability of everything published so far
    pub(crate) fn published(&self) -> Watermark {
        self.lock().signal.stability()
    }

    /// Records published since the last call, with the current watermark
    pub(crate) fn take_batch(&self) -> Batch<Value> {
        let mut state = self.lock();
        let records = std::mem::take(&mut state.pending);
        Batch::new(records, state.signal.stability())
    }

    /// Copy of the published signal
    pub(crate) fn signal(&self) -> Signal<Value> {
        self.lock().signal.clone()
    }

    /// Sample the published signal
    pub(crate) fn sample_at(&self, t: Time) -> Result<Option<Value>> {
        self.lock().signal.sample_at(t).map(|v| v.cloned())
    }

    /// Drop published history at or before `upto`, keeping the state there
    pub(crate) fn release_until(&self, upto: Watermark) {
        self.lock().signal.compact_until(upto);
    }
}
