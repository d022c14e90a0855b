//! Tempora Hub - Partitioned execution of compiled behaviors
//!
//! This crate turns a [`Blueprint`](tempora_compiler::Blueprint) into a running
//! network: one scheduler per partition, each driving the links the compiler
//! placed there, connected by bounded hand-off queues.
//!
//! ## Architecture
//!
//! ```text
//! Network (owns partitions, hands out ports)
//!  │
//!  ├── InputHandle[] ──► HandoffQueue ──► Partition
//!  │                                       │
//!  │                                       ├── Graph (links + wires)
//!  │                                       │    └── DynamicLink → installed Graphs
//!  │                                       │
//!  │                                       └── outbox ──► peer HandoffQueue
//!  │
//!  └── OutputHandle[] ◄── OutputPort ◄── output wires
//! ```
//!
//! ## Key Components
//!
//! - [`Network`]: Builds partitions from a blueprint and steps them
//! - [`Partition`]: Lifecycle, round loop and backpressure for one partition
//! - [`HandoffQueue`]: Bounded queue carrying batches between partitions
//! - [`MembraneBuilder`]: Decides where installed behaviors may emit output
//! - [`NetworkConfig`]: Queue sizing, idle waits and sum tolerance, loadable from RON
//!
//! ## Design Principles
//!
//! 1. **Links only read stable input** - arrival order never changes results
//! 2. **Partitions share nothing but queues** - cross-partition data is batches
//! 3. **Faults stay local** - a protocol violation stops only its partition

mod config;
mod dynamic;
mod error;
mod graph;
mod link;
mod network;
mod partition;
mod queue;

pub use config::{max_threads, NetworkConfig, PartitionAssignment, PartitionConfig};
pub use dynamic::{InstallError, InstallFailure, InstallLog, LocalMembranes, Membrane, MembraneBuilder};
pub use error::{Error, Result};
pub use graph::OutputPort;
pub use network::{BuildOptions, InputHandle, Network, OutputHandle, RunningNetwork};
pub use partition::{Envelope, Ingress, Partition, PartitionState, RoundReport, StepOutcome};
pub use queue::{HandoffQueue, PushError};
