//! Tempora Journal - Recording, export and deterministic replay
//!
//! Networks are deterministic in their input batches: the same batches,
//! delivered in any order and any grouping, produce the same outputs. This
//! crate makes that property usable:
//!
//! - **Recorder**: Capture the batches pushed into a network's inputs
//! - **Exporter**: Write recordings as RON, bincode or JSON, and load them back
//! - **Replayer**: Feed a recording into a fresh network and compare outputs
//! - **Auditor**: Summarize what each input port received
//!
//! # Example
//!
//! ```
//! use tempora_core::{Batch, Behavior, Record, Shape, Watermark};
//! use tempora_hub::{Network, NetworkConfig};
//! use tempora_journal::{ExportFormat, Exporter, Recorder, Recording, Replayer};
//!
//! let behavior = Behavior::delay(5);
//! let input = Shape::leaf("a", "int");
//!
//! // Record a session
//! let mut network = Network::build(&behavior, &input, NetworkConfig::default()).unwrap();
//! let mut recorder = Recorder::new();
//! let port = network.input(0).unwrap();
//! recorder.push(&port, Batch::new(vec![Record::of(0, 1)], Watermark::Final)).unwrap();
//! network.run_until_idle().unwrap();
//! let recording = recorder.finish(network.outputs());
//!
//! // Store and reload it
//! let bytes = Exporter::new(&recording).export(ExportFormat::Bincode).unwrap();
//! let loaded = Recording::load(&bytes, ExportFormat::Bincode).unwrap();
//!
//! // Replay into a fresh network
//! let mut fresh = Network::build(&behavior, &input, NetworkConfig::default()).unwrap();
//! let report = Replayer::new(&loaded).verify(&mut fresh).unwrap();
//! assert!(report.is_identical());
//! ```

mod auditor;
mod error;
mod exporter;
mod recorder;
mod replayer;

pub use auditor::{AuditReport, Auditor, PortSummary};
pub use error::{Error, Result};
pub use exporter::{ExportFormat, Exporter};
pub use recorder::{JournalEntry, OutputCapture, Recorder, Recording, FORMAT_VERSION};
pub use replayer::{compare, Divergence, ReplayReport, ReplayState, Replayer};
