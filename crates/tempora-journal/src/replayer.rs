//! Deterministic replay of recordings
//!
//! Replaying feeds the recorded batches, in recorded order, into a freshly
//! built network and drives it on the calling thread. Since links only ever
//! act on stable input, the outputs of a replay must equal the outputs
//! captured while recording; [`compare`] reports the ports where they don't.

use crate::recorder::{OutputCapture, Recording};
use crate::{Error, Result};
use std::fmt;
use tempora_core::{Time, Watermark};
use tempora_hub::{Network, PushError};
use tracing::{debug, info};

/// State of the replayer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    /// Not started
    Idle,
    /// Some entries delivered
    Playing,
    /// Every entry delivered
    Finished,
}

/// Replays a recording into a network
pub struct Replayer<'a> {
    recording: &'a Recording,
    position: usize,
    state: ReplayState,
}

impl<'a> Replayer<'a> {
    /// Create a new replayer for a recording
    pub fn new(recording: &'a Recording) -> Self {
        Self {
            recording,
            position: 0,
            state: ReplayState::Idle,
        }
    }

    /// Get the current state
    pub fn state(&self) -> ReplayState {
        self.state
    }

    /// Number of entries delivered so far
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of entries still to deliver
    pub fn remaining(&self) -> usize {
        self.recording.len() - self.position
    }

    /// Deliver the next entry and run the network until idle
    ///
    /// Returns `false` once the recording is exhausted.
    pub fn step(&mut self, network: &mut Network) -> Result<bool> {
        let Some(entry) = self.recording.entries().get(self.position) else {
            self.state = ReplayState::Finished;
            return Ok(false);
        };
        let input = network.input(entry.port)?;
        let mut batch = entry.batch.clone();
        let mut drained = false;
        loop {
            match input.try_push(batch) {
                Ok(()) => break,
                Err(PushError::Full(rejected)) if !drained => {
                    network.run_until_idle()?;
                    batch = rejected;
                    drained = true;
                }
                Err(PushError::Full(_)) => {
                    return Err(Error::Replay(format!(
                        "input {} stays full after draining the network",
                        entry.port
                    )));
                }
                Err(PushError::Closed(_)) => {
                    return Err(Error::Replay(format!(
                        "input {} no longer accepts batches (entry #{})",
                        entry.port, entry.seq
                    )));
                }
            }
        }
        let rounds = network.run_until_idle()?;
        debug!(seq = entry.seq, port = entry.port, rounds, "replayed entry");

        self.position += 1;
        self.state = if self.position == self.recording.len() {
            ReplayState::Finished
        } else {
            ReplayState::Playing
        };
        Ok(true)
    }

    /// Deliver every remaining entry; returns how many were delivered
    pub fn replay(&mut self, network: &mut Network) -> Result<usize> {
        let mut delivered = 0;
        while self.step(network)? {
            delivered += 1;
        }
        info!(delivered, "replay finished");
        Ok(delivered)
    }

    /// Replay the rest of the recording and compare against its outputs
    pub fn verify(&mut self, network: &mut Network) -> Result<ReplayReport> {
        self.replay(network)?;
        let actual = OutputCapture::all(network.outputs());
        Ok(compare(self.recording.outputs(), &actual))
    }
}

/// How one output port differs between two runs
#[derive(Debug, Clone, PartialEq)]
pub enum Divergence {
    /// The port exists in only one of the runs
    Missing { port: usize },
    /// Both runs published the port up to different watermarks
    Stability {
        port: usize,
        expected: Watermark,
        actual: Watermark,
    },
    /// The published records differ, starting at `time`
    Records { port: usize, time: Time },
}

impl Divergence {
    pub fn port(&self) -> usize {
        match self {
            Divergence::Missing { port }
            | Divergence::Stability { port, .. }
            | Divergence::Records { port, .. } => *port,
        }
    }
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Divergence::Missing { port } => write!(f, "output[{}] missing", port),
            Divergence::Stability {
                port,
                expected,
                actual,
            } => write!(
                f,
                "output[{}] stable to {} instead of {}",
                port, actual, expected
            ),
            Divergence::Records { port, time } => {
                write!(f, "output[{}] differs from {}", port, time)
            }
        }
    }
}

/// Result of comparing the outputs of two runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    /// Ports present in both runs
    pub compared: usize,
    pub divergences: Vec<Divergence>,
}

impl ReplayReport {
    /// Check if every port matched
    pub fn is_identical(&self) -> bool {
        self.divergences.is_empty()
    }
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_identical() {
            return write!(f, "{} outputs identical", self.compared);
        }
        writeln!(f, "{} of {} outputs diverge:", self.divergences.len(), self.compared)?;
        for divergence in &self.divergences {
            writeln!(f, "  {}", divergence)?;
        }
        Ok(())
    }
}

/// Compare two sets of output captures port by port
pub fn compare(expected: &[OutputCapture], actual: &[OutputCapture]) -> ReplayReport {
    let mut report = ReplayReport::default();
    let mut ports: Vec<usize> = expected.iter().chain(actual).map(|c| c.port).collect();
    ports.sort_unstable();
    ports.dedup();

    for port in ports {
        let find = |captures: &[OutputCapture]| captures.iter().find(|c| c.port == port).cloned();
        let (Some(e), Some(a)) = (find(expected), find(actual)) else {
            report.divergences.push(Divergence::Missing { port });
            continue;
        };
        report.compared += 1;

        let first_difference = e
            .records
            .iter()
            .zip(&a.records)
            .find(|(x, y)| x != y)
            .map(|(x, y)| x.time.min(y.time))
            .or_else(|| match e.records.len().cmp(&a.records.len()) {
                std::cmp::Ordering::Less => a.records.get(e.records.len()).map(|r| r.time),
                std::cmp::Ordering::Greater => e.records.get(a.records.len()).map(|r| r.time),
                std::cmp::Ordering::Equal => None,
            });
        if let Some(time) = first_difference {
            report.divergences.push(Divergence::Records { port, time });
        } else if e.stability != a.stability {
            report.divergences.push(Divergence::Stability {
                port,
                expected: e.stability,
                actual: a.stability,
            });
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::Recorder;
    use crate::{ExportFormat, Exporter};
    use tempora_core::{Batch, Behavior, Catalog, Latency, Record, Shape, Value};
    use tempora_hub::{NetworkConfig, PartitionConfig};

    fn behavior() -> Behavior {
        let scale = Catalog::new()
            .with(
                "double",
                Behavior::map("double", "int", |v: &Value| Value::Int(v.as_int().unwrap_or(0) * 2)),
            )
            .with(
                "negate",
                Behavior::map("negate", "int", |v: &Value| Value::Int(-v.as_int().unwrap_or(0))),
            );
        Behavior::second(Behavior::cross("ctl"))
            .then(Behavior::dynamic(scale, Shape::leaf("ctl", "int"), Latency::new(0, 2)))
    }

    fn input() -> Shape {
        Shape::product(Shape::leaf("ctl", "name"), Shape::leaf("sensor", "int"))
    }

    fn network(config: NetworkConfig) -> Network {
        Network::build(&behavior(), &input(), config).unwrap()
    }

    fn session() -> Recording {
        let mut net = network(NetworkConfig::default());
        let mut recorder = Recorder::labelled("scale");
        let (names, sensor) = (net.input(0).unwrap(), net.input(1).unwrap());

        recorder
            .push(&sensor, Batch::new(vec![Record::of(0, 1), Record::of(4, 2)], Watermark::At(6)))
            .unwrap();
        net.run_until_idle().unwrap();
        recorder
            .push(&names, Batch::new(vec![Record::of(0, "double")], Watermark::At(5)))
            .unwrap();
        net.run_until_idle().unwrap();
        recorder
            .push(&sensor, Batch::new(vec![Record::of(9, 3)], Watermark::Final))
            .unwrap();
        recorder
            .push(&names, Batch::new(vec![Record::of(8, "negate")], Watermark::Final))
            .unwrap();
        net.run_until_idle().unwrap();
        recorder.finish(net.outputs())
    }

    #[test]
    fn test_recorded_outputs() {
        let recording = session();
        assert_eq!(
            recording.outputs()[0].records,
            vec![
                Record::of(2, 2),
                Record::of(6, 4),
                Record::of(10, -2),
                Record::of(11, -3)
            ]
        );
    }

    #[test]
    fn test_replay_reproduces_outputs() {
        let recording = session();
        let mut net = network(NetworkConfig::default());
        let mut replayer = Replayer::new(&recording);
        assert_eq!(replayer.state(), ReplayState::Idle);

        let report = replayer.verify(&mut net).unwrap();
        assert!(report.is_identical(), "{}", report);
        assert_eq!(report.compared, 1);
        assert_eq!(replayer.state(), ReplayState::Finished);
        assert_eq!(replayer.remaining(), 0);
    }

    #[test]
    fn test_replay_after_serialization() {
        let recording = session();
        let bytes = Exporter::new(&recording).export(ExportFormat::Bincode).unwrap();
        let loaded = Recording::load(&bytes, ExportFormat::Bincode).unwrap();

        // single-slot queues change scheduling, not results
        let config = NetworkConfig::default()
            .with_partition("ctl", PartitionConfig::with_queue_capacity(1))
            .with_partition("sensor", PartitionConfig::with_queue_capacity(1));
        let mut net = network(config);
        let report = Replayer::new(&loaded).verify(&mut net).unwrap();
        assert!(report.is_identical(), "{}", report);
    }

    #[test]
    fn test_step_advances_one_entry() {
        let recording = session();
        let mut net = network(NetworkConfig::default());
        let mut replayer = Replayer::new(&recording);

        assert!(replayer.step(&mut net).unwrap());
        assert_eq!(replayer.position(), 1);
        assert_eq!(replayer.state(), ReplayState::Playing);
        assert_eq!(replayer.replay(&mut net).unwrap(), 3);
        assert!(!replayer.step(&mut net).unwrap());
    }

    #[test]
    fn test_replay_into_halted_network_fails() {
        let recording = session();
        let mut net = network(NetworkConfig::default());
        net.halt();
        let err = Replayer::new(&recording).replay(&mut net).unwrap_err();
        assert!(matches!(err, Error::Replay(_)));
    }

    #[test]
    fn test_compare_reports_divergences() {
        let capture = |port, records: Vec<Record<Value>>, stability| OutputCapture {
            port,
            stability,
            records,
        };
        let expected = vec![
            capture(0, vec![Record::of(0, 1), Record::of(5, 2)], Watermark::Final),
            capture(1, vec![Record::of(0, 1)], Watermark::At(10)),
            capture(2, vec![], Watermark::At(3)),
        ];
        let actual = vec![
            capture(0, vec![Record::of(0, 1), Record::of(6, 2)], Watermark::Final),
            capture(1, vec![Record::of(0, 1)], Watermark::At(8)),
            capture(3, vec![], Watermark::At(3)),
        ];

        let report = compare(&expected, &actual);
        assert_eq!(report.compared, 2);
        assert_eq!(
            report.divergences,
            vec![
                Divergence::Records { port: 0, time: 5 },
                Divergence::Stability {
                    port: 1,
                    expected: Watermark::At(10),
                    actual: Watermark::At(8)
                },
                Divergence::Missing { port: 2 },
                Divergence::Missing { port: 3 },
            ]
        );
        assert!(!report.is_identical());
        assert_eq!(report.divergences[2].port(), 2);
    }

    #[test]
    fn test_compare_detects_extra_records() {
        let short = OutputCapture {
            port: 0,
            stability: Watermark::Final,
            records: vec![Record::of(0, 1)],
        };
        let long = OutputCapture {
            records: vec![Record::of(0, 1), Record::inactive(7)],
            ..short.clone()
        };
        let report = compare(&[short], &[long]);
        assert_eq!(report.divergences, vec![Divergence::Records { port: 0, time: 7 }]);
    }
}
