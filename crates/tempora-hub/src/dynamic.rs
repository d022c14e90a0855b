//! Runtime installation of behaviors named by a signal
//!
//! A dynamic link reads a product `(name, x)`. Whenever the name changes it
//! resolves the new name in its [`BehaviorLibrary`], compiles the result
//! against the shape of `x` and instantiates it as a private sub-network on
//! the link's own partition. The sub-network sees `x` from the instant of
//! installation until the name changes again, and its output is spliced
//! into the link's output from `start + latency.max` on.
//!
//! While the name is inactive, including before the first name ever becomes
//! active, the output is inactive too. Installation failures (unknown names,
//! compile errors, placement) are never fatal either: the output is inactive
//! while the failed name is current and the failure is recorded in the
//! network's [`InstallFailure`] log.
//!
//! Outputs of a sub-network cross a [`Membrane`] before they reach the host
//! graph. A [`MembraneBuilder`] decides which output shapes may cross. Each
//! membrane leaf holds only the current state of its output once a round's
//! records have crossed.

use crate::graph::{Graph, GraphSettings, OutputPort, Wire};
use crate::link::emit;
use crate::partition::Ingress;
use std::fmt;
use std::sync::{Arc, Mutex};
use tempora_compiler::{compile, CompileErrors};
use tempora_core::{
    admit, Batch, Behavior, BehaviorLibrary, LeafType, Latency, LinkId, ObserveContext,
    PartitionId, Record, Result, Shape, Signal, Time, Update, Value, Watermark,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Why a named behavior could not be installed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InstallError {
    #[error("no behavior named {0}")]
    UnknownBehavior(Value),

    #[error("installed behavior does not compile: {0}")]
    Compile(CompileErrors),

    #[error("installed behavior must stay on partition {home}, but uses {found}")]
    Placement {
        home: PartitionId,
        found: PartitionId,
    },

    #[error("membrane rejected the output: {0}")]
    Membrane(String),
}

/// A failed installation and the interval its name was current
#[derive(Debug, Clone, PartialEq)]
pub struct InstallFailure {
    /// Dynamic link that attempted the installation
    pub link: LinkId,
    /// The name that failed
    pub name: Value,
    /// Instant the name became current
    pub start: Time,
    /// Instant the name stopped being current, if it has
    pub end: Option<Time>,
    pub error: InstallError,
}

/// Failure log shared by every graph of a network
pub type InstallLog = Arc<Mutex<Vec<InstallFailure>>>;

/// Boundary buffers between an installed sub-network and its host link
#[derive(Debug, Clone, PartialEq)]
pub enum Membrane {
    Leaf {
        partition: PartitionId,
        ty: LeafType,
        signal: Signal<Value>,
    },
    Product(Box<Membrane>, Box<Membrane>),
    Sum(Box<Membrane>, Box<Membrane>),
}

impl Membrane {
    /// Shape of the membrane
    pub fn shape(&self) -> Shape {
        match self {
            Membrane::Leaf { partition, ty, .. } => Shape::leaf(partition.clone(), ty.clone()),
            Membrane::Product(l, r) => Shape::product(l.shape(), r.shape()),
            Membrane::Sum(l, r) => Shape::sum(l.shape(), r.shape()),
        }
    }

    /// Records held by every leaf buffer
    pub fn retained(&self) -> usize {
        match self {
            Membrane::Leaf { signal, .. } => signal.len(),
            Membrane::Product(l, r) | Membrane::Sum(l, r) => l.retained() + r.retained(),
        }
    }

    /// Leaf buffers, left to right
    pub fn leaves_mut(&mut self) -> Vec<&mut Signal<Value>> {
        match self {
            Membrane::Leaf { signal, .. } => vec![signal],
            Membrane::Product(l, r) | Membrane::Sum(l, r) => {
                let mut out = l.leaves_mut();
                out.extend(r.leaves_mut());
                out
            }
        }
    }
}

/// Builds the membrane an installed sub-network's output crosses
pub trait MembraneBuilder: Send + Sync {
    /// Buffer for one output leaf of a sub-network installed on `home`
    fn leaf(
        &self,
        home: &PartitionId,
        partition: &PartitionId,
        ty: &LeafType,
    ) -> std::result::Result<Signal<Value>, InstallError>;

    /// Membrane for a whole output shape
    fn build(&self, home: &PartitionId, shape: &Shape) -> std::result::Result<Membrane, InstallError> {
        match shape {
            Shape::Leaf { partition, ty } => Ok(Membrane::Leaf {
                partition: partition.clone(),
                ty: ty.clone(),
                signal: self.leaf(home, partition, ty)?,
            }),
            Shape::Product(l, r) => Ok(Membrane::Product(
                Box::new(self.build(home, l)?),
                Box::new(self.build(home, r)?),
            )),
            Shape::Sum(l, r) => Ok(Membrane::Sum(
                Box::new(self.build(home, l)?),
                Box::new(self.build(home, r)?),
            )),
        }
    }
}

/// Membranes for sub-networks whose output stays on their home partition
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalMembranes;

impl MembraneBuilder for LocalMembranes {
    fn leaf(
        &self,
        home: &PartitionId,
        partition: &PartitionId,
        _ty: &LeafType,
    ) -> std::result::Result<Signal<Value>, InstallError> {
        if partition != home {
            return Err(InstallError::Membrane(format!(
                "output leaf on {} cannot leave home partition {}",
                partition, home
            )));
        }
        Ok(Signal::new())
    }
}

/// One instantiated sub-network
struct Installation {
    name: Value,
    start: Time,
    end: Option<Time>,
    graph: Graph,
    ports: Vec<Arc<OutputPort>>,
    membrane: Membrane,
    /// Input watermark fed so far; `None` before the first feed
    fed: Option<Watermark>,
    /// Whether the deactivation at `end` has been fed
    closed: bool,
}

impl Installation {
    /// Feed newly stable input, run the sub-network and collect its output
    fn drive(
        &mut self,
        sources: &[&Signal<Value>],
        horizon: Watermark,
        ctx: &ObserveContext<'_>,
        candidates: &mut [Vec<Record<Value>>],
        latency: Time,
    ) -> Result<()> {
        if !self.closed {
            let ended = self.end.filter(|&end| horizon.covers(end));
            for (port, signal) in sources.iter().enumerate() {
                let mut records = Vec::new();
                let after = match self.fed {
                    Some(fed) => fed,
                    None => {
                        if let Some(state) = signal.state_at(self.start) {
                            records.push(Record {
                                time: self.start,
                                update: Update::from(state.cloned()),
                            });
                        }
                        Watermark::At(self.start)
                    }
                };
                records.extend(
                    signal
                        .records_in(after, horizon)
                        .filter(|r| self.end.map_or(true, |end| r.time < end))
                        .cloned(),
                );
                let stability = match ended {
                    Some(end) => {
                        records.push(Record::inactive(end));
                        Watermark::Final
                    }
                    None => horizon,
                };
                self.graph.admit(&Ingress::Port(port), Batch::new(records, stability))?;
            }
            self.fed = Some(horizon);
            self.closed = ended.is_some();
        }

        self.graph.run_round(ctx)?;

        let cutoff = self.end.map(|end| end.saturating_add(latency));
        for ((port, leaf), slot) in self
            .ports
            .iter()
            .zip(self.membrane.leaves_mut())
            .zip(candidates.iter_mut())
        {
            let crossed = cross(leaf, port.take_batch())?;
            slot.extend(
                crossed
                    .into_iter()
                    .filter(|r| cutoff.map_or(true, |cutoff| r.time < cutoff)),
            );
        }
        Ok(())
    }

    fn finished(&self) -> bool {
        self.closed && self.ports.iter().all(|p| p.published().is_final())
    }
}

/// Host side of a dynamic behavior
pub(crate) struct DynamicLink {
    id: LinkId,
    library: Arc<dyn BehaviorLibrary>,
    input: Shape,
    output: Shape,
    latency: Latency,
    home: PartitionId,
    settings: GraphSettings,
    /// Name currently selected by the name leaf; `None` before its first record
    active: Option<Option<Value>>,
    current: Option<Installation>,
    retiring: Vec<Installation>,
    /// Log entry of the current name, if its installation failed
    failed: Option<usize>,
}

impl DynamicLink {
    pub(crate) fn new(
        id: LinkId,
        library: Arc<dyn BehaviorLibrary>,
        input: Shape,
        output: Shape,
        latency: Latency,
        home: PartitionId,
        settings: GraphSettings,
    ) -> Self {
        Self {
            id,
            library,
            input,
            output,
            latency,
            home,
            settings,
            active: None,
            current: None,
            retiring: Vec::new(),
            failed: None,
        }
    }

    /// Process `(after, horizon]` of the name leaf and the installed input
    pub(crate) fn process(
        &mut self,
        wires: &mut [Wire],
        inputs: &[usize],
        outputs: &[usize],
        after: Watermark,
        horizon: Watermark,
        ctx: &ObserveContext<'_>,
    ) -> Result<usize> {
        let Some((&name_wire, sources)) = inputs.split_first() else {
            return Ok(0);
        };
        let delay = self.latency.max.max(0) as Time;
        let mut candidates: Vec<Vec<Record<Value>>> = vec![Vec::new(); outputs.len()];

        let names: Vec<Record<Value>> = wires[name_wire]
            .signal
            .records_in(after, horizon)
            .cloned()
            .collect();
        for record in names {
            let name = record.update.value().cloned();
            if self.active.as_ref() == Some(&name) {
                continue;
            }
            self.retire(record.time);
            let switch = record.time.saturating_add(delay);
            for slot in &mut candidates {
                slot.push(Record::inactive(switch));
            }
            if let Some(name) = &name {
                self.install(name.clone(), record.time);
            }
            self.active = Some(name);
        }

        let sources: Vec<&Signal<Value>> = sources.iter().map(|&i| &wires[i].signal).collect();
        for installation in &mut self.retiring {
            installation.drive(&sources, horizon, ctx, &mut candidates, delay)?;
        }
        let id = self.id;
        self.retiring.retain(|installation| {
            let done = installation.finished();
            if done {
                debug!(link = %id, name = %installation.name, "retired behavior discarded");
            }
            !done
        });
        if let Some(installation) = &mut self.current {
            installation.drive(&sources, horizon, ctx, &mut candidates, delay)?;
        }

        let stability = horizon.shift(delay);
        let mut produced = 0;
        for (&wire, records) in outputs.iter().zip(candidates) {
            produced += emit(&mut wires[wire].signal, latest_per_instant(records), stability)?;
        }
        Ok(produced)
    }

    fn retire(&mut self, end: Time) {
        if let Some(mut installation) = self.current.take() {
            debug!(link = %self.id, name = %installation.name, end, "retiring behavior");
            installation.end = Some(end);
            self.retiring.push(installation);
        }
        if let Some(index) = self.failed.take() {
            let mut log = self.settings.failures.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(failure) = log.get_mut(index) {
                failure.end = Some(end);
            }
        }
    }

    fn install(&mut self, name: Value, start: Time) {
        match self.instantiate(&name, start) {
            Ok(installation) => {
                debug!(link = %self.id, %name, start, "installed behavior");
                self.current = Some(installation);
            }
            Err(error) => {
                warn!(link = %self.id, %name, start, %error, "behavior installation failed");
                let mut log = self.settings.failures.lock().unwrap_or_else(|e| e.into_inner());
                self.failed = Some(log.len());
                log.push(InstallFailure {
                    link: self.id,
                    name,
                    start,
                    end: None,
                    error,
                });
            }
        }
    }

    fn instantiate(&self, name: &Value, start: Time) -> std::result::Result<Installation, InstallError> {
        let behavior = self
            .library
            .resolve(name)
            .ok_or_else(|| InstallError::UnknownBehavior(name.clone()))?;
        let bounded = behavior
            .latency(self.latency.min, self.latency.max)
            .then(Behavior::expect(self.output.clone()));
        let blueprint = compile(&bounded, &self.input).map_err(InstallError::Compile)?;
        if let Some(found) = blueprint.partitions().into_iter().find(|p| **p != self.home) {
            return Err(InstallError::Placement {
                home: self.home.clone(),
                found: found.clone(),
            });
        }
        let membrane = self.settings.membranes.build(&self.home, &self.output)?;

        let mut graph = Graph::instantiate(&blueprint, &self.home, self.settings.clone());
        let ports = blueprint
            .output()
            .ports()
            .into_iter()
            .map(|port| {
                let output = Arc::new(OutputPort::new(false));
                graph.attach_port(port.wire, output.clone());
                output
            })
            .collect();
        Ok(Installation {
            name: name.clone(),
            start,
            end: None,
            graph,
            ports,
            membrane,
            fed: None,
            closed: false,
        })
    }
}

impl fmt::Debug for DynamicLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicLink")
            .field("id", &self.id)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("latency", &self.latency)
            .field("active", &self.active)
            .field("retiring", &self.retiring.len())
            .finish()
    }
}

/// Admit a sub-network output batch into its membrane leaf
///
/// Returns the records the batch made stable. The leaf is compacted down to
/// its current state afterwards.
fn cross(leaf: &mut Signal<Value>, batch: Batch<Value>) -> Result<Vec<Record<Value>>> {
    let before = leaf.stability();
    admit(leaf, batch)?;
    let crossed = leaf.records_in(before, leaf.stability()).cloned().collect();
    leaf.compact();
    Ok(crossed)
}

/// Sort by time and keep the last record given for each instant
fn latest_per_instant(mut records: Vec<Record<Value>>) -> Vec<Record<Value>> {
    records.sort_by_key(|r| r.time);
    let mut out: Vec<Record<Value>> = Vec::with_capacity(records.len());
    for record in records {
        match out.last_mut() {
            Some(last) if last.time == record.time => *last = record,
            _ => out.push(record),
        }
    }
    out
}
