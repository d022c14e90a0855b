//! Capturing the input side of a network session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tempora_core::{Batch, Record, Value, Watermark};
use tempora_hub::{InputHandle, OutputHandle};

/// Current recording format version
pub const FORMAT_VERSION: u32 = 1;

/// One batch delivered to a network input port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Position in the recording
    pub seq: u64,
    /// Input port the batch was pushed to
    pub port: usize,
    /// Wall-clock instant the batch was recorded
    pub at: DateTime<Utc>,
    pub batch: Batch<Value>,
}

/// Published content of one output port at the end of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputCapture {
    pub port: usize,
    pub stability: Watermark,
    pub records: Vec<Record<Value>>,
}

impl OutputCapture {
    /// Capture what `output` has published so far
    pub fn of(output: &OutputHandle) -> Self {
        let signal = output.signal();
        Self {
            port: output.index(),
            stability: signal.stability(),
            records: signal.records().cloned().collect(),
        }
    }

    /// Capture every output of a network, in port order
    pub fn all(outputs: &[OutputHandle]) -> Vec<Self> {
        outputs.iter().map(Self::of).collect()
    }
}

/// A finished recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub version: u32,
    #[serde(default)]
    pub label: Option<String>,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub entries: Vec<JournalEntry>,
    /// Outputs observed when the recording was finished
    #[serde(default)]
    pub outputs: Vec<OutputCapture>,
}

impl Recording {
    /// Recorded entries in delivery order
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Captured outputs
    pub fn outputs(&self) -> &[OutputCapture] {
        &self.outputs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Input ports that received at least one batch
    pub fn ports(&self) -> BTreeSet<usize> {
        self.entries.iter().map(|e| e.port).collect()
    }

    /// Entries delivered to `port`
    pub fn entries_for(&self, port: usize) -> impl Iterator<Item = &JournalEntry> {
        self.entries.iter().filter(move |e| e.port == port)
    }

    /// Wall-clock length of the session
    pub fn duration(&self) -> chrono::Duration {
        self.finished - self.started
    }
}

/// Records the batches pushed into a network
///
/// # Example
///
/// ```
/// use tempora_core::{Batch, Behavior, Record, Shape, Watermark};
/// use tempora_hub::{Network, NetworkConfig};
/// use tempora_journal::Recorder;
///
/// let mut network = Network::build(&Behavior::identity(), &Shape::leaf("a", "int"), NetworkConfig::default()).unwrap();
/// let mut recorder = Recorder::new();
///
/// let input = network.input(0).unwrap();
/// recorder.push(&input, Batch::new(vec![Record::of(0, 1)], Watermark::Final)).unwrap();
/// network.run_until_idle().unwrap();
///
/// let recording = recorder.finish(network.outputs());
/// assert_eq!(recording.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Recorder {
    label: Option<String>,
    started: DateTime<Utc>,
    entries: Vec<JournalEntry>,
    recording: bool,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder {
    /// Create a recorder that starts recording immediately
    pub fn new() -> Self {
        Self {
            label: None,
            started: Utc::now(),
            entries: Vec::new(),
            recording: true,
        }
    }

    /// Create a labelled recorder
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::new()
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Stop recording; pushes still go through
    pub fn pause(&mut self) {
        self.recording = false;
    }

    pub fn resume(&mut self) {
        self.recording = true;
    }

    /// Number of entries recorded so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a batch delivered to `port` by other means
    pub fn record(&mut self, port: usize, batch: &Batch<Value>) {
        if !self.recording {
            return;
        }
        self.entries.push(JournalEntry {
            seq: self.entries.len() as u64,
            port,
            at: Utc::now(),
            batch: batch.clone(),
        });
    }

    /// Push a batch into `input`, recording it if the push succeeds
    pub fn push(&mut self, input: &InputHandle, batch: Batch<Value>) -> tempora_hub::Result<()> {
        let copy = self.recording.then(|| batch.clone());
        input.push(batch)?;
        if let Some(batch) = copy {
            self.record(input.index(), &batch);
        }
        Ok(())
    }

    /// Finish the recording, capturing the outputs' current content
    pub fn finish(self, outputs: &[OutputHandle]) -> Recording {
        Recording {
            version: FORMAT_VERSION,
            label: self.label,
            started: self.started,
            finished: Utc::now(),
            entries: self.entries,
            outputs: OutputCapture::all(outputs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempora_core::{Behavior, Shape};
    use tempora_hub::{Network, NetworkConfig};

    fn network() -> Network {
        let b = Behavior::product(Behavior::identity(), Behavior::delay(3));
        let input = Shape::product(Shape::leaf("a", "int"), Shape::leaf("a", "int"));
        Network::build(&b, &input, NetworkConfig::default()).unwrap()
    }

    #[test]
    fn test_push_records_entries_in_order() {
        let mut net = network();
        let mut recorder = Recorder::labelled("session");
        let (left, right) = (net.input(0).unwrap(), net.input(1).unwrap());

        recorder.push(&right, Batch::new(vec![Record::of(0, 1)], Watermark::At(0))).unwrap();
        recorder.push(&left, Batch::heartbeat(Watermark::At(4))).unwrap();
        net.run_until_idle().unwrap();

        let recording = recorder.finish(net.outputs());
        assert_eq!(recording.label.as_deref(), Some("session"));
        assert_eq!(recording.version, FORMAT_VERSION);
        let ports: Vec<_> = recording.entries().iter().map(|e| (e.seq, e.port)).collect();
        assert_eq!(ports, vec![(0, 1), (1, 0)]);
        assert_eq!(recording.ports().len(), 2);
        assert_eq!(recording.entries_for(1).count(), 1);
        assert!(recording.duration() >= chrono::Duration::zero());
    }

    #[test]
    fn test_pause_skips_recording() {
        let mut net = network();
        let mut recorder = Recorder::new();
        let input = net.input(0).unwrap();

        recorder.pause();
        assert!(!recorder.is_recording());
        recorder.push(&input, Batch::heartbeat(Watermark::At(1))).unwrap();
        recorder.resume();
        recorder.push(&input, Batch::heartbeat(Watermark::At(2))).unwrap();
        assert_eq!(recorder.len(), 1);
        net.run_until_idle().unwrap();
    }

    #[test]
    fn test_failed_push_is_not_recorded() {
        let mut net = network();
        let mut recorder = Recorder::new();
        let input = net.input(0).unwrap();
        net.halt();
        assert!(recorder.push(&input, Batch::heartbeat(Watermark::At(1))).is_err());
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_finish_captures_outputs() {
        let mut net = network();
        let mut recorder = Recorder::new();
        recorder
            .push(&net.input(0).unwrap(), Batch::new(vec![Record::of(0, 7)], Watermark::Final))
            .unwrap();
        recorder
            .push(&net.input(1).unwrap(), Batch::new(vec![Record::of(0, 8)], Watermark::Final))
            .unwrap();
        net.run_until_idle().unwrap();

        let recording = recorder.finish(net.outputs());
        assert_eq!(recording.outputs().len(), 2);
        // both sides are padded to the slower one
        assert_eq!(recording.outputs()[0].records, vec![Record::of(3, 7)]);
        assert_eq!(recording.outputs()[1].records, vec![Record::of(3, 8)]);
        assert_eq!(recording.outputs()[1].stability, Watermark::Final);
    }
}
