//! Networks - Compiled behaviors instantiated over partitions
//!
//! A [`Network`] owns one [`Partition`] per partition of its blueprint,
//! connected by bounded hand-off queues. It can be driven two ways:
//!
//! - **Manually**, on the caller's thread, with [`Network::run_until_idle`]
//!   or by stepping single partitions. Nothing blocks; a full queue shows up
//!   as [`StepOutcome::Blocked`](crate::StepOutcome::Blocked).
//! - **Threaded**, with [`Network::spawn`], one OS thread per partition.
//!
//! External input enters through [`InputHandle`]s, one per input leaf.
//! Stable output is read through [`OutputHandle`]s, one per output leaf.
//!
//! # Example
//!
//! ```
//! use tempora_core::{Batch, Behavior, Record, Shape, Value, Watermark};
//! use tempora_hub::{Network, NetworkConfig};
//!
//! let double = Behavior::map("double", "int", |v: &Value| Value::Int(v.as_int().unwrap_or(0) * 2));
//! let mut network = Network::build(&double, &Shape::leaf("main", "int"), NetworkConfig::default()).unwrap();
//!
//! let input = network.input(0).unwrap();
//! input.push(Batch::new(vec![Record::of(0, 21)], Watermark::Final)).unwrap();
//! network.run_until_idle().unwrap();
//!
//! let output = network.output(0).unwrap();
//! assert_eq!(output.sample_at(5).unwrap(), Some(Value::Int(42)));
//! ```

use crate::config::{max_threads, NetworkConfig, PartitionAssignment};
use crate::dynamic::{InstallFailure, InstallLog, LocalMembranes, MembraneBuilder};
use crate::error::{Error, Result};
use crate::graph::{Graph, GraphSettings, OutputPort};
use crate::partition::{Envelope, Ingress, Partition, PartitionState, Status, StepOutcome};
use crate::queue::{HandoffQueue, PushError};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tempora_compiler::{compile, Blueprint};
use tempora_core::{
    Batch, Behavior, Clock, PartitionId, Registry, Shape, Signal, Time, Value, Watermark,
};
use tracing::{info, warn};

/// Shared runtime collaborators of a network
#[derive(Clone)]
pub struct BuildOptions {
    /// Resource registry handed to observers
    pub registry: Arc<Registry>,
    /// Decides which outputs of installed behaviors may reach their host
    pub membranes: Arc<dyn MembraneBuilder>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            registry: Arc::new(Registry::new("tempora")),
            membranes: Arc::new(LocalMembranes),
        }
    }
}

impl fmt::Debug for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildOptions")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Queue and lifecycle state of one partition, as seen from outside it
#[derive(Clone)]
struct Endpoint {
    status: Arc<Status>,
    queue: Arc<HandoffQueue<Envelope>>,
}

/// A running instance of a compiled behavior
pub struct Network {
    partitions: IndexMap<PartitionId, Partition>,
    endpoints: IndexMap<PartitionId, Endpoint>,
    inputs: Vec<InputHandle>,
    outputs: Vec<OutputHandle>,
    registry: Arc<Registry>,
    failures: InstallLog,
}

impl Network {
    /// Compile `behavior` for `input` and build it with every partition
    /// assigned
    pub fn build(behavior: &Behavior, input: &Shape, config: NetworkConfig) -> Result<Self> {
        let blueprint = compile(behavior, input)?;
        let assignment = PartitionAssignment::for_blueprint(&blueprint, config);
        Self::from_blueprint(&blueprint, &assignment)
    }

    /// Instantiate a compiled blueprint
    pub fn from_blueprint(blueprint: &Blueprint, assignment: &PartitionAssignment) -> Result<Self> {
        Self::build_with(blueprint, assignment, BuildOptions::default())
    }

    /// Instantiate a compiled blueprint with explicit collaborators
    pub fn build_with(
        blueprint: &Blueprint,
        assignment: &PartitionAssignment,
        options: BuildOptions,
    ) -> Result<Self> {
        let ids: Vec<PartitionId> = blueprint.partitions().into_iter().cloned().collect();
        if let Some(missing) = ids.iter().find(|id| !assignment.contains(id)) {
            return Err(Error::UnassignedPartition(missing.clone()));
        }
        if ids.len() > max_threads() {
            warn!(
                partitions = ids.len(),
                cpus = max_threads(),
                "more partitions than logical CPUs"
            );
        }

        let config = assignment.config();
        let endpoints: IndexMap<PartitionId, Endpoint> = ids
            .iter()
            .map(|id| {
                let endpoint = Endpoint {
                    status: Arc::new(Status::new()),
                    queue: Arc::new(HandoffQueue::new(config.queue_capacity(id))),
                };
                (id.clone(), endpoint)
            })
            .collect();

        let failures = InstallLog::default();
        let settings = GraphSettings {
            sum_overlap_tolerance: config.sum_overlap_tolerance,
            membranes: options.membranes.clone(),
            failures: failures.clone(),
        };
        let mut graphs: IndexMap<PartitionId, Graph> = ids
            .iter()
            .map(|id| (id.clone(), Graph::instantiate(blueprint, id, settings.clone())))
            .collect();

        let mut outputs = Vec::new();
        for (index, port) in blueprint.output().ports().into_iter().enumerate() {
            let shared = Arc::new(OutputPort::new(true));
            if let Some(graph) = graphs.get_mut(&port.partition) {
                graph.attach_port(port.wire, shared.clone());
            }
            outputs.push(OutputHandle {
                index,
                partition: port.partition.clone(),
                port: shared,
            });
        }

        let mut inputs = Vec::new();
        for (index, port) in blueprint.input().ports().into_iter().enumerate() {
            let Some(endpoint) = endpoints.get(&port.partition) else {
                return Err(Error::UnknownPartition(port.partition.clone()));
            };
            inputs.push(InputHandle {
                index,
                partition: port.partition.clone(),
                endpoint: endpoint.clone(),
            });
        }

        let mut partitions = IndexMap::new();
        for (id, graph) in graphs {
            let mut peers = HashMap::new();
            for channel in blueprint.channels().iter().filter(|c| c.from == id) {
                if let Some(endpoint) = endpoints.get(&channel.to) {
                    peers.insert(channel.to.clone(), endpoint.queue.clone());
                }
            }
            let upstream = blueprint
                .upstream_of(&id)
                .into_iter()
                .filter_map(|p| endpoints.get(p))
                .map(|e| e.status.clone())
                .collect();
            let Some(endpoint) = endpoints.get(&id) else {
                return Err(Error::UnknownPartition(id));
            };
            let partition = Partition::new(
                id.clone(),
                endpoint.status.clone(),
                graph,
                endpoint.queue.clone(),
                peers,
                upstream,
                options.registry.clone(),
                config.idle_wait(),
            );
            partitions.insert(id, partition);
        }

        info!(
            partitions = partitions.len(),
            inputs = inputs.len(),
            outputs = outputs.len(),
            channels = blueprint.channels().len(),
            "network built"
        );
        Ok(Self {
            partitions,
            endpoints,
            inputs,
            outputs,
            registry: options.registry,
            failures,
        })
    }

    /// Handle of input port `index`
    pub fn input(&self, index: usize) -> Result<InputHandle> {
        self.inputs.get(index).cloned().ok_or(Error::UnknownPort(index))
    }

    /// Handles of every input port, left to right
    pub fn inputs(&self) -> &[InputHandle] {
        &self.inputs
    }

    /// Handle of output port `index`
    pub fn output(&self, index: usize) -> Result<OutputHandle> {
        self.outputs.get(index).cloned().ok_or(Error::UnknownPort(index))
    }

    /// Handles of every output port, left to right
    pub fn outputs(&self) -> &[OutputHandle] {
        &self.outputs
    }

    /// Names of the partitions, in blueprint order
    pub fn partition_ids(&self) -> impl Iterator<Item = &PartitionId> {
        self.partitions.keys()
    }

    /// Access one partition for manual stepping
    pub fn partition_mut(&mut self, id: &PartitionId) -> Result<&mut Partition> {
        self.partitions
            .get_mut(id)
            .ok_or_else(|| Error::UnknownPartition(id.clone()))
    }

    /// Lifecycle state of a partition
    pub fn state(&self, id: &PartitionId) -> Result<PartitionState> {
        self.endpoints
            .get(id)
            .map(|e| e.status.get())
            .ok_or_else(|| Error::UnknownPartition(id.clone()))
    }

    /// Step every partition until none makes progress
    ///
    /// Returns the number of rounds that ran.
    pub fn run_until_idle(&mut self) -> Result<usize> {
        let mut rounds = 0;
        loop {
            let mut progressed = false;
            for partition in self.partitions.values_mut() {
                let before = partition.state();
                if let StepOutcome::Ran(_) = partition.step()? {
                    rounds += 1;
                    progressed = true;
                }
                if partition.state() != before {
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(rounds);
            }
        }
    }

    /// Stop accepting external input on every partition
    pub fn halt(&mut self) {
        for partition in self.partitions.values_mut() {
            if partition.state() != PartitionState::Stopped {
                // only fails for stopped partitions
                let _ = partition.halt();
            }
        }
    }

    /// Halt and drain every partition on the current thread
    pub fn shutdown(&mut self) -> Result<()> {
        self.halt();
        self.run_until_idle()?;
        Ok(())
    }

    /// Installation failures of dynamic behaviors so far
    pub fn install_failures(&self) -> Vec<InstallFailure> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Resource registry shared by the network's observers
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run every partition on its own thread
    pub fn spawn(self) -> Result<RunningNetwork> {
        let mut threads = Vec::with_capacity(self.partitions.len());
        for (id, partition) in self.partitions {
            let handle = thread::Builder::new()
                .name(format!("tempora-{}", id))
                .spawn(move || partition.run())?;
            threads.push((id, handle));
        }
        info!(threads = threads.len(), "network spawned");
        Ok(RunningNetwork {
            threads,
            endpoints: self.endpoints,
            inputs: self.inputs,
            outputs: self.outputs,
            registry: self.registry,
            failures: self.failures,
        })
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("partitions", &self.partitions.values().collect::<Vec<_>>())
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

/// A network whose partitions run on their own threads
pub struct RunningNetwork {
    threads: Vec<(PartitionId, JoinHandle<Result<()>>)>,
    endpoints: IndexMap<PartitionId, Endpoint>,
    inputs: Vec<InputHandle>,
    outputs: Vec<OutputHandle>,
    registry: Arc<Registry>,
    failures: InstallLog,
}

impl RunningNetwork {
    /// Ask every partition to drain and stop
    pub fn halt(&self) {
        for (id, endpoint) in &self.endpoints {
            if endpoint.status.request_halt().accepts_input() {
                info!(partition = %id, "partition draining");
            }
            endpoint.queue.wake();
        }
    }

    /// Handle of input port `index`
    pub fn input(&self, index: usize) -> Result<InputHandle> {
        self.inputs.get(index).cloned().ok_or(Error::UnknownPort(index))
    }

    /// Handle of output port `index`
    pub fn output(&self, index: usize) -> Result<OutputHandle> {
        self.outputs.get(index).cloned().ok_or(Error::UnknownPort(index))
    }

    /// Lifecycle state of a partition
    pub fn state(&self, id: &PartitionId) -> Result<PartitionState> {
        self.endpoints
            .get(id)
            .map(|e| e.status.get())
            .ok_or_else(|| Error::UnknownPartition(id.clone()))
    }

    /// Installation failures of dynamic behaviors so far
    pub fn install_failures(&self) -> Vec<InstallFailure> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Resource registry shared by the network's observers
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Wait for every partition thread to finish
    ///
    /// Returns the first error any partition stopped with.
    pub fn join(self) -> Result<()> {
        let mut first = None;
        for (id, handle) in self.threads {
            let outcome = match handle.join() {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::ThreadPanicked(id)),
            };
            if let Err(e) = outcome {
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Producer end of one network input port
#[derive(Clone)]
pub struct InputHandle {
    index: usize,
    partition: PartitionId,
    endpoint: Endpoint,
}

impl InputHandle {
    /// Index of the port
    pub fn index(&self) -> usize {
        self.index
    }

    /// Partition the port feeds
    pub fn partition(&self) -> &PartitionId {
        &self.partition
    }

    fn envelope(&self, batch: Batch<Value>) -> Envelope {
        Envelope {
            ingress: Ingress::Port(self.index),
            batch,
        }
    }

    /// Deliver a batch, waiting while the partition's queue is full
    ///
    /// Only call this from a thread other than the one stepping the network,
    /// or make sure the queue has room.
    pub fn push(&self, batch: Batch<Value>) -> Result<()> {
        match self.endpoint.status.get() {
            PartitionState::Draining => return Err(Error::Draining(self.partition.clone())),
            PartitionState::Stopped => return Err(Error::QueueClosed(self.partition.clone())),
            _ => {}
        }
        self.endpoint
            .queue
            .push(self.envelope(batch))
            .map_err(|_| Error::QueueClosed(self.partition.clone()))
    }

    /// Deliver a batch without waiting; the batch is handed back on failure
    pub fn try_push(&self, batch: Batch<Value>) -> std::result::Result<(), PushError<Batch<Value>>> {
        if !self.endpoint.status.get().accepts_input() {
            return Err(PushError::Closed(batch));
        }
        self.endpoint
            .queue
            .try_push(self.envelope(batch))
            .map_err(|e| match e {
                PushError::Full(env) => PushError::Full(env.batch),
                PushError::Closed(env) => PushError::Closed(env.batch),
            })
    }

    /// Certify that nothing will change at or before `t`
    pub fn heartbeat(&self, t: Time) -> Result<()> {
        self.push(Batch::heartbeat(Watermark::At(t)))
    }

    /// Heartbeat at the current reading of `clock`
    pub fn heartbeat_now(&self, clock: &dyn Clock) -> Result<()> {
        self.heartbeat(clock.now())
    }

    /// Declare the input complete
    pub fn finish(&self) -> Result<()> {
        self.push(Batch::heartbeat(Watermark::Final))
    }
}

impl fmt::Debug for InputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputHandle")
            .field("index", &self.index)
            .field("partition", &self.partition)
            .finish()
    }
}

/// Consumer end of one network output port
#[derive(Debug, Clone)]
pub struct OutputHandle {
    index: usize,
    partition: PartitionId,
    port: Arc<OutputPort>,
}

impl OutputHandle {
    /// Index of the port
    pub fn index(&self) -> usize {
        self.index
    }

    /// Partition producing the port
    pub fn partition(&self) -> &PartitionId {
        &self.partition
    }

    /// Records that became stable since the last poll
    pub fn poll(&self) -> Batch<Value> {
        self.port.take_batch()
    }

    /// Everything published so far
    pub fn signal(&self) -> Signal<Value> {
        self.port.signal()
    }

    /// Stability of the published signal
    pub fn stability(&self) -> Watermark {
        self.port.published()
    }

    /// Sample the published signal at `t`
    pub fn sample_at(&self, t: Time) -> Result<Option<Value>> {
        Ok(self.port.sample_at(t)?)
    }

    /// Forget published history at or before `upto`
    ///
    /// The state at `upto` is kept, so sampling from there on still works.
    /// Earlier instants then fail with a compaction error. Never reaches past
    /// the published watermark.
    pub fn release_until(&self, upto: Watermark) {
        self.port.release_until(upto);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitionConfig;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use tempora_core::{
        Catalog, Latency, ManualClock, ObserveContext, Observer, ProtocolViolation, Record,
        Resource,
    };

    fn int(partition: &str) -> Shape {
        Shape::leaf(partition, "int")
    }

    fn int_map(name: &str, f: fn(i64) -> i64) -> Behavior {
        Behavior::map(name, "int", move |v: &Value| Value::Int(f(v.as_int().unwrap_or(0))))
    }

    fn envelope() -> Behavior {
        Behavior::dup()
            .then(Behavior::second(Behavior::delay(10)))
            .then(Behavior::zip())
    }

    fn records_of(signal: &Signal<Value>) -> Vec<Record<Value>> {
        signal.records().cloned().collect()
    }

    // ========================================================================
    // Building
    // ========================================================================

    #[test]
    fn test_build_creates_partitions_and_ports() {
        let b = Behavior::second(Behavior::cross("a")).then(Behavior::zip());
        let network = Network::build(&b, &Shape::product(int("a"), int("b")), NetworkConfig::default()).unwrap();
        assert_eq!(network.partition_ids().count(), 2);
        assert_eq!(network.inputs().len(), 2);
        assert_eq!(network.outputs().len(), 1);
        assert_eq!(network.input(1).unwrap().partition(), &PartitionId::new("b"));
        assert!(matches!(network.input(2), Err(Error::UnknownPort(2))));
        assert_eq!(network.state(&"a".into()).unwrap(), PartitionState::Idle);
    }

    #[test]
    fn test_unassigned_partition_is_rejected() {
        let bp = compile(&Behavior::identity(), &int("a")).unwrap();
        let assignment = PartitionAssignment::new(NetworkConfig::default());
        let err = Network::from_blueprint(&bp, &assignment).unwrap_err();
        assert!(matches!(err, Error::UnassignedPartition(p) if p.as_str() == "a"));
    }

    #[test]
    fn test_compile_errors_surface() {
        let err = Network::build(&Behavior::zip(), &int("a"), NetworkConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
    }

    // ========================================================================
    // Signal semantics
    // ========================================================================

    #[test]
    fn test_product_equalization_envelope() {
        let mut network = Network::build(&envelope(), &int("main"), NetworkConfig::default()).unwrap();
        let input = network.input(0).unwrap();
        input
            .push(Batch::new(vec![Record::of(0, 5), Record::inactive(100)], Watermark::Final))
            .unwrap();
        network.run_until_idle().unwrap();

        let output = network.output(0).unwrap();
        assert_eq!(output.stability(), Watermark::Final);
        assert!(matches!(
            output.sample_at(9),
            Err(Error::Core(tempora_core::Error::Undefined { time: 9 }))
        ));
        let pair = Value::pair(5, 5);
        assert_eq!(output.sample_at(10).unwrap(), Some(pair.clone()));
        assert_eq!(output.sample_at(109).unwrap(), Some(pair));
        assert_eq!(output.sample_at(110).unwrap(), None);
    }

    #[test]
    fn test_output_waits_for_stability() {
        let mut network = Network::build(&int_map("inc", |x| x + 1), &int("a"), NetworkConfig::default()).unwrap();
        let input = network.input(0).unwrap();
        input
            .push(Batch::new(vec![Record::of(0, 1), Record::of(20, 2)], Watermark::At(10)))
            .unwrap();
        network.run_until_idle().unwrap();
        let output = network.output(0).unwrap();
        assert_eq!(records_of(&output.signal()), vec![Record::of(0, 2)]);

        let clock = ManualClock::starting_at(30);
        input.heartbeat_now(&clock).unwrap();
        network.run_until_idle().unwrap();
        assert_eq!(output.stability(), Watermark::At(30));
        assert_eq!(output.sample_at(25).unwrap(), Some(Value::Int(3)));
        assert_eq!(output.poll().records.len(), 2);
        assert!(output.poll().records.is_empty());
    }

    #[test]
    fn test_released_output_history_is_compacted() {
        let mut network = Network::build(&Behavior::identity(), &int("a"), NetworkConfig::default()).unwrap();
        let records: Vec<_> = (0..100u64).map(|t| Record::of(t, t as i64)).collect();
        network
            .input(0)
            .unwrap()
            .push(Batch::new(records, Watermark::At(99)))
            .unwrap();
        network.run_until_idle().unwrap();

        let output = network.output(0).unwrap();
        assert_eq!(output.signal().len(), 100);

        output.release_until(Watermark::At(90));
        assert_eq!(output.signal().len(), 10);
        assert_eq!(output.sample_at(90).unwrap(), Some(Value::Int(90)));
        assert_eq!(output.sample_at(95).unwrap(), Some(Value::Int(95)));
        assert!(matches!(
            output.sample_at(50),
            Err(Error::Core(tempora_core::Error::Compacted { time: 50 }))
        ));

        // bounded by what has been published
        output.release_until(Watermark::Final);
        assert_eq!(output.signal().len(), 1);
        assert_eq!(output.sample_at(99).unwrap(), Some(Value::Int(99)));
    }

    #[test]
    fn test_redelivery_is_idempotent() {
        let mut network = Network::build(&int_map("inc", |x| x + 1), &int("a"), NetworkConfig::default()).unwrap();
        let input = network.input(0).unwrap();
        let batch = Batch::new(vec![Record::of(0, 1), Record::of(5, 2)], Watermark::At(10));

        input.push(batch.clone()).unwrap();
        network.run_until_idle().unwrap();
        let once = network.output(0).unwrap().signal();

        input.push(batch.clone()).unwrap();
        input.push(batch).unwrap();
        network.run_until_idle().unwrap();
        assert_eq!(network.output(0).unwrap().signal(), once);
    }

    #[test]
    fn test_batch_order_does_not_matter() {
        let run = |batches: Vec<Batch<Value>>| {
            let mut network = Network::build(&envelope(), &int("a"), NetworkConfig::default()).unwrap();
            let input = network.input(0).unwrap();
            for batch in batches {
                input.push(batch).unwrap();
                network.run_until_idle().unwrap();
            }
            input.finish().unwrap();
            network.run_until_idle().unwrap();
            records_of(&network.output(0).unwrap().signal())
        };

        let whole = run(vec![Batch::new(
            vec![Record::of(0, 1), Record::of(4, 2), Record::inactive(9), Record::of(15, 3)],
            Watermark::At(20),
        )]);
        let shuffled = run(vec![Batch::new(
            vec![Record::of(15, 3), Record::inactive(9), Record::of(0, 1), Record::of(4, 2)],
            Watermark::At(20),
        )]);
        let pieces = run(vec![
            Batch::new(vec![Record::of(4, 2), Record::of(0, 1)], Watermark::At(4)),
            Batch::heartbeat(Watermark::At(2)),
            Batch::new(vec![Record::inactive(9)], Watermark::At(9)),
            Batch::new(vec![Record::of(15, 3)], Watermark::At(20)),
        ]);
        assert_eq!(whole, shuffled);
        assert_eq!(whole, pieces);
        assert_eq!(whole.first(), Some(&Record::of(10, Value::pair(1, 1))));
    }

    #[test]
    fn test_split_and_merge_are_disjoint() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let b = Behavior::split("positive", |v: &Value| v.as_int().unwrap_or(0) > 0)
            .then(Behavior::left(Behavior::observe(
                "positive",
                move |records: &[Record<Value>], _: Watermark| {
                    log.lock().unwrap().extend(records.iter().cloned());
                },
            )))
            .then(Behavior::merge());
        let mut network = Network::build(&b, &int("a"), NetworkConfig::default()).unwrap();
        let records = vec![Record::of(0, 1), Record::of(3, -2), Record::inactive(6), Record::of(8, 4)];
        network
            .input(0)
            .unwrap()
            .push(Batch::new(records.clone(), Watermark::Final))
            .unwrap();
        network.run_until_idle().unwrap();

        assert_eq!(records_of(&network.output(0).unwrap().signal()), records);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Record::of(0, 1), Record::inactive(3), Record::of(8, 4)]
        );
    }

    #[test]
    fn test_sum_overlap_faults_partition() {
        let mut network = Network::build(
            &Behavior::merge(),
            &Shape::sum(int("a"), int("a")),
            NetworkConfig::default(),
        )
        .unwrap();
        network.input(0).unwrap().push(Batch::new(vec![Record::of(0, 1)], Watermark::Final)).unwrap();
        network.input(1).unwrap().push(Batch::new(vec![Record::of(0, 2)], Watermark::Final)).unwrap();

        let err = network.run_until_idle().unwrap_err();
        assert!(matches!(
            err.violation(),
            Some(ProtocolViolation::SumOverlap { since: 0, .. })
        ));
        assert_eq!(network.state(&"a".into()).unwrap(), PartitionState::Stopped);
        assert!(matches!(
            network.input(0).unwrap().push(Batch::heartbeat(Watermark::Final)),
            Err(Error::QueueClosed(_))
        ));
    }

    #[test]
    fn test_short_overlap_within_tolerance() {
        let config = NetworkConfig {
            sum_overlap_tolerance: 5,
            ..NetworkConfig::default()
        };
        let mut network = Network::build(&Behavior::merge(), &Shape::sum(int("a"), int("a")), config).unwrap();
        network
            .input(0)
            .unwrap()
            .push(Batch::new(vec![Record::of(0, 1), Record::inactive(3)], Watermark::Final))
            .unwrap();
        network
            .input(1)
            .unwrap()
            .push(Batch::new(vec![Record::of(0, 2)], Watermark::Final))
            .unwrap();
        network.run_until_idle().unwrap();
        assert_eq!(
            records_of(&network.output(0).unwrap().signal()),
            vec![Record::of(0, 1), Record::of(3, 2)]
        );
    }

    // ========================================================================
    // Observers and resources
    // ========================================================================

    #[derive(Default)]
    struct Tally(Mutex<u64>);

    impl Resource for Tally {
        fn create(_space: &str, _identity: &str) -> Self {
            Tally::default()
        }
    }

    struct Counting;

    impl Observer for Counting {
        fn observe(&self, ctx: &ObserveContext<'_>, records: &[Record<Value>], _stability: Watermark) {
            let tally = ctx.registry.locate::<Tally>(ctx.partition.as_str());
            *tally.0.lock().unwrap() += records.len() as u64;
        }
    }

    #[test]
    fn test_observer_sees_each_record_once() {
        let b = Behavior::observe("count", Counting);
        let mut network = Network::build(&b, &int("a"), NetworkConfig::default()).unwrap();
        let input = network.input(0).unwrap();
        input.push(Batch::new(vec![Record::of(0, 1), Record::of(5, 2)], Watermark::At(5))).unwrap();
        input.push(Batch::new(vec![Record::of(5, 2)], Watermark::At(5))).unwrap();
        network.run_until_idle().unwrap();
        input.push(Batch::new(vec![Record::of(9, 3)], Watermark::Final)).unwrap();
        network.run_until_idle().unwrap();

        let tally = network.registry().locate::<Tally>("a");
        assert_eq!(*tally.0.lock().unwrap(), 3);
    }

    // ========================================================================
    // Dynamic behaviors
    // ========================================================================

    fn library() -> Catalog {
        Catalog::new()
            .with("double", int_map("double", |x| x * 2))
            .with("negate", int_map("negate", |x| -x))
            .with("elsewhere", Behavior::cross("b").then(Behavior::cross("a")))
    }

    fn dynamic_network(latency: i64) -> Network {
        let b = Behavior::dynamic(library(), int("a"), Latency::new(0, latency));
        let input = Shape::product(Shape::leaf("a", "name"), int("a"));
        Network::build(&b, &input, NetworkConfig::default()).unwrap()
    }

    #[test]
    fn test_dynamic_switches_behaviors() {
        let mut network = dynamic_network(5);
        network
            .input(0)
            .unwrap()
            .push(Batch::new(
                vec![Record::of(0, "double"), Record::of(20, "negate")],
                Watermark::Final,
            ))
            .unwrap();
        network
            .input(1)
            .unwrap()
            .push(Batch::new(vec![Record::of(0, 3), Record::of(10, 4)], Watermark::Final))
            .unwrap();
        network.run_until_idle().unwrap();

        let output = network.output(0).unwrap();
        assert_eq!(output.stability(), Watermark::Final);
        assert_eq!(
            records_of(&output.signal()),
            vec![Record::of(5, 6), Record::of(15, 8), Record::of(25, -4)]
        );
        assert!(network.install_failures().is_empty());
    }

    #[test]
    fn test_dynamic_missing_behavior_is_inactive() {
        let mut network = dynamic_network(0);
        network
            .input(0)
            .unwrap()
            .push(Batch::new(
                vec![Record::of(0, "ghost"), Record::inactive(50)],
                Watermark::Final,
            ))
            .unwrap();
        network
            .input(1)
            .unwrap()
            .push(Batch::new(vec![Record::of(0, 1)], Watermark::Final))
            .unwrap();
        network.run_until_idle().unwrap();

        let output = network.output(0).unwrap();
        for t in [0, 25, 49, 50, 80] {
            assert_eq!(output.sample_at(t).unwrap(), None);
        }
        let failures = network.install_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].name, Value::from("ghost"));
        assert_eq!(failures[0].start, 0);
        assert_eq!(failures[0].end, Some(50));
        assert!(matches!(failures[0].error, crate::InstallError::UnknownBehavior(_)));
    }

    fn run_dynamic(latency: i64, names: Vec<Record<Value>>, xs: Vec<Record<Value>>) -> OutputHandle {
        let mut network = dynamic_network(latency);
        network.input(0).unwrap().push(Batch::new(names, Watermark::Final)).unwrap();
        network.input(1).unwrap().push(Batch::new(xs, Watermark::Final)).unwrap();
        network.run_until_idle().unwrap();
        assert!(network.install_failures().is_empty());
        network.output(0).unwrap()
    }

    #[test]
    fn test_dynamic_inactive_before_first_name() {
        let output = run_dynamic(
            0,
            vec![Record::inactive(0), Record::of(10, "double")],
            vec![Record::of(0, 3)],
        );
        assert_eq!(output.stability(), Watermark::Final);
        assert_eq!(
            records_of(&output.signal()),
            vec![Record::inactive(0), Record::of(10, 6)]
        );
        assert_eq!(output.sample_at(5).unwrap(), None);
        assert_eq!(output.sample_at(10).unwrap(), Some(Value::Int(6)));
    }

    #[test]
    fn test_dynamic_name_never_active() {
        let output = run_dynamic(
            0,
            vec![Record::inactive(0)],
            vec![Record::of(0, 1), Record::of(5, 2)],
        );
        assert_eq!(output.stability(), Watermark::Final);
        assert_eq!(records_of(&output.signal()), vec![Record::inactive(0)]);
        for t in [0, 5, 100] {
            assert_eq!(output.sample_at(t).unwrap(), None);
        }
    }

    #[test]
    fn test_dynamic_inactive_gap_between_names() {
        let output = run_dynamic(
            5,
            vec![Record::of(0, "double"), Record::inactive(10), Record::of(20, "negate")],
            vec![Record::of(0, 3)],
        );
        assert_eq!(
            records_of(&output.signal()),
            vec![Record::of(5, 6), Record::inactive(15), Record::of(25, -3)]
        );
        assert_eq!(output.sample_at(12).unwrap(), Some(Value::Int(6)));
        assert_eq!(output.sample_at(15).unwrap(), None);
        assert_eq!(output.sample_at(24).unwrap(), None);
        assert_eq!(output.sample_at(30).unwrap(), Some(Value::Int(-3)));
    }

    #[test]
    fn test_dynamic_rejects_foreign_placement() {
        let mut network = dynamic_network(0);
        network
            .input(0)
            .unwrap()
            .push(Batch::new(vec![Record::of(0, "elsewhere")], Watermark::Final))
            .unwrap();
        network.input(1).unwrap().finish().unwrap();
        network.run_until_idle().unwrap();

        let failures = network.install_failures();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].error, crate::InstallError::Placement { .. }));
        assert_eq!(failures[0].end, None);
    }

    struct Sealed;

    impl MembraneBuilder for Sealed {
        fn leaf(
            &self,
            _home: &PartitionId,
            _partition: &PartitionId,
            _ty: &tempora_core::LeafType,
        ) -> std::result::Result<Signal<Value>, crate::InstallError> {
            Err(crate::InstallError::Membrane("sealed".to_string()))
        }
    }

    #[test]
    fn test_custom_membrane_builder_rejects() {
        let b = Behavior::dynamic(library(), int("a"), Latency::new(0, 0));
        let input = Shape::product(Shape::leaf("a", "name"), int("a"));
        let bp = compile(&b, &input).unwrap();
        let options = BuildOptions {
            membranes: Arc::new(Sealed),
            ..BuildOptions::default()
        };
        let assignment = PartitionAssignment::for_blueprint(&bp, NetworkConfig::default());
        let mut network = Network::build_with(&bp, &assignment, options).unwrap();
        network
            .input(0)
            .unwrap()
            .push(Batch::new(vec![Record::of(0, "double")], Watermark::Final))
            .unwrap();
        network
            .input(1)
            .unwrap()
            .push(Batch::new(vec![Record::of(0, 7)], Watermark::Final))
            .unwrap();
        network.run_until_idle().unwrap();

        assert_eq!(network.output(0).unwrap().sample_at(3).unwrap(), None);
        let failures = network.install_failures();
        assert_eq!(failures[0].error, crate::InstallError::Membrane("sealed".to_string()));
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    #[test]
    fn test_backpressure_blocks_sender() {
        let config = NetworkConfig::default().with_partition("b", PartitionConfig::with_queue_capacity(2));
        let mut network = Network::build(&Behavior::cross("b"), &int("a"), config).unwrap();
        let input = network.input(0).unwrap();
        let (a, b) = (PartitionId::new("a"), PartitionId::new("b"));

        for t in 0..2u64 {
            input.try_push(Batch::new(vec![Record::of(t, t as i64)], Watermark::At(t))).unwrap();
            let outcome = network.partition_mut(&a).unwrap().step().unwrap();
            assert!(matches!(outcome, StepOutcome::Ran(report) if report.sent == 1));
        }
        assert_eq!(network.partition_mut(&b).unwrap().queued(), 2);

        input.try_push(Batch::new(vec![Record::of(2, 2)], Watermark::At(2))).unwrap();
        let outcome = network.partition_mut(&a).unwrap().step().unwrap();
        assert_eq!(outcome, StepOutcome::Blocked);
        assert_eq!(network.partition_mut(&a).unwrap().pending_outgoing(), 1);
        assert_eq!(network.partition_mut(&b).unwrap().queued(), 2);

        let outcome = network.partition_mut(&b).unwrap().step().unwrap();
        assert!(matches!(outcome, StepOutcome::Ran(report) if report.batches == 2));
        assert_eq!(network.partition_mut(&a).unwrap().step().unwrap(), StepOutcome::Idle);
        assert_eq!(network.partition_mut(&b).unwrap().queued(), 1);

        network.run_until_idle().unwrap();
        assert_eq!(network.output(0).unwrap().stability(), Watermark::At(2));
    }

    #[test]
    fn test_halt_drains_then_stops() {
        let mut network = Network::build(&Behavior::cross("b"), &int("a"), NetworkConfig::default()).unwrap();
        let input = network.input(0).unwrap();
        input.push(Batch::new(vec![Record::of(0, 1)], Watermark::At(0))).unwrap();

        network.halt();
        assert!(matches!(input.push(Batch::heartbeat(Watermark::At(1))), Err(Error::Draining(_))));
        assert!(matches!(
            input.try_push(Batch::heartbeat(Watermark::At(1))),
            Err(PushError::Closed(_))
        ));

        network.run_until_idle().unwrap();
        assert_eq!(network.state(&"a".into()).unwrap(), PartitionState::Stopped);
        assert_eq!(network.state(&"b".into()).unwrap(), PartitionState::Stopped);
        // input queued before the halt was still delivered
        assert_eq!(network.output(0).unwrap().sample_at(0).unwrap(), Some(Value::Int(1)));

        let err = network.partition_mut(&"a".into()).unwrap().halt().unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn test_two_instantiations_agree() {
        let b = Behavior::second(Behavior::cross("a").then(int_map("inc", |x| x + 1)))
            .then(Behavior::zip());
        let bp = compile(&b, &Shape::product(int("a"), int("b"))).unwrap();
        let assignment = PartitionAssignment::for_blueprint(&bp, NetworkConfig::default());

        let run = |network: &mut Network| {
            network
                .input(0)
                .unwrap()
                .push(Batch::new(vec![Record::of(0, 1), Record::of(7, 2)], Watermark::Final))
                .unwrap();
            network
                .input(1)
                .unwrap()
                .push(Batch::new(vec![Record::of(3, 10)], Watermark::Final))
                .unwrap();
            network.run_until_idle().unwrap();
            records_of(&network.output(0).unwrap().signal())
        };
        let mut first = Network::from_blueprint(&bp, &assignment).unwrap();
        let mut second = Network::from_blueprint(&bp, &assignment).unwrap();
        let a = run(&mut first);
        assert_eq!(a, run(&mut second));
        assert_eq!(a, vec![Record::of(3, Value::pair(1, 11)), Record::of(7, Value::pair(2, 11))]);
    }

    #[test]
    fn test_threaded_run() {
        let b = Behavior::cross("b").then(int_map("inc", |x| x + 1));
        let network = Network::build(&b, &int("a"), NetworkConfig::default()).unwrap();
        let running = network.spawn().unwrap();

        let input = running.input(0).unwrap();
        for t in 0..20u64 {
            input.push(Batch::new(vec![Record::of(t, t as i64)], Watermark::At(t))).unwrap();
        }
        input.finish().unwrap();

        let output = running.output(0).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while !output.stability().is_final() {
            assert!(Instant::now() < deadline, "output never became final");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(output.sample_at(19).unwrap(), Some(Value::Int(20)));

        running.halt();
        running.join().unwrap();
    }

    fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_threaded_sender_waits_for_room() {
        let config = NetworkConfig::default().with_partition("b", PartitionConfig::with_queue_capacity(1));
        let mut network = Network::build(&Behavior::cross("b"), &int("a"), config).unwrap();
        let (a, b) = (PartitionId::new("a"), PartitionId::new("b"));
        let input = network.input(0).unwrap();
        let output = network.output(0).unwrap();
        let a_queue = network.endpoints[&a].queue.clone();
        let a_status = network.endpoints[&a].status.clone();
        let b_queue = network.endpoints[&b].queue.clone();

        // only the sending side runs on its own thread
        let sender = network.partitions.shift_remove(&a).unwrap();
        let worker = thread::spawn(move || sender.run());

        input.push(Batch::new(vec![Record::of(0, 0)], Watermark::At(0))).unwrap();
        wait_until("first hand-off", || b_queue.len() == 1);

        input.push(Batch::new(vec![Record::of(1, 1)], Watermark::At(1))).unwrap();
        wait_until("second batch drained", || a_queue.is_empty());

        // the sender is parked on the full queue and cannot drain its own
        input.push(Batch::new(vec![Record::of(2, 2)], Watermark::At(2))).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(a_queue.len(), 1);
        assert_eq!(b_queue.len(), 1);

        wait_until("output to catch up", || {
            network.partition_mut(&b).unwrap().step().unwrap();
            output.stability() == Watermark::At(2)
        });
        for t in 0..3u64 {
            assert_eq!(output.sample_at(t).unwrap(), Some(Value::Int(t as i64)));
        }

        a_status.request_halt();
        a_queue.wake();
        worker.join().unwrap().unwrap();
        assert_eq!(network.state(&a).unwrap(), PartitionState::Stopped);

        network.halt();
        network.run_until_idle().unwrap();
        assert_eq!(network.state(&b).unwrap(), PartitionState::Stopped);
    }
}
