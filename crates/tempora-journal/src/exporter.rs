//! Export recordings to various formats and load them back

use crate::recorder::Recording;
use crate::{Error, Result};
use std::io::Write;

/// Export format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// RON format (Rust Object Notation)
    Ron,
    /// Compact binary format
    Bincode,
    /// JSON format (requires serde_json feature)
    Json,
    /// Human-readable text format, export only
    Text,
}

/// Exporter for recordings
pub struct Exporter<'a> {
    recording: &'a Recording,
}

impl<'a> Exporter<'a> {
    /// Create a new exporter
    pub fn new(recording: &'a Recording) -> Self {
        Self { recording }
    }

    /// Export to bytes in the specified format
    pub fn export(&self, format: ExportFormat) -> Result<Vec<u8>> {
        match format {
            ExportFormat::Ron => self.to_ron().map(String::into_bytes),
            ExportFormat::Bincode => self.to_bincode(),
            ExportFormat::Json => self.to_json().map(String::into_bytes),
            ExportFormat::Text => Ok(self.to_text().into_bytes()),
        }
    }

    /// Export to a writer
    pub fn export_to<W: Write>(&self, writer: &mut W, format: ExportFormat) -> Result<()> {
        let content = self.export(format)?;
        writer.write_all(&content)?;
        Ok(())
    }

    /// Export to RON format
    pub fn to_ron(&self) -> Result<String> {
        ron::ser::to_string_pretty(self.recording, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Export to bincode
    pub fn to_bincode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self.recording).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Export to JSON format
    #[cfg(feature = "serde_json")]
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self.recording).map_err(|e| Error::Serialization(e.to_string()))
    }

    #[cfg(not(feature = "serde_json"))]
    pub fn to_json(&self) -> Result<String> {
        Err(Error::Export(
            "JSON export requires the 'serde_json' feature".to_string(),
        ))
    }

    /// Export to human-readable text format
    pub fn to_text(&self) -> String {
        let recording = self.recording;
        let mut output = String::new();

        output.push_str("=== Recording ===\n\n");
        if let Some(label) = &recording.label {
            output.push_str(&format!("Label: {}\n", label));
        }
        output.push_str(&format!("Started: {}\n", recording.started.to_rfc3339()));
        output.push_str(&format!("Entries: {}\n", recording.len()));
        output.push_str(&format!("Outputs: {}\n", recording.outputs().len()));

        output.push_str("\n=== Entries ===\n\n");
        for entry in recording.entries() {
            output.push_str(&format!(
                "  #{} input[{}] stable to {}\n",
                entry.seq, entry.port, entry.batch.stability
            ));
            for record in &entry.batch.records {
                match record.update.value() {
                    Some(v) => output.push_str(&format!("      {} = {}\n", record.time, v)),
                    None => output.push_str(&format!("      {} inactive\n", record.time)),
                }
            }
        }

        if !recording.outputs().is_empty() {
            output.push_str("\n=== Outputs ===\n\n");
            for capture in recording.outputs() {
                output.push_str(&format!(
                    "  output[{}] stable to {}, {} records\n",
                    capture.port,
                    capture.stability,
                    capture.records.len()
                ));
            }
        }

        output
    }
}

impl Recording {
    /// Load a recording from RON
    pub fn from_ron(text: &str) -> Result<Self> {
        ron::from_str(text).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Load a recording from bincode
    pub fn from_bincode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Load a recording from JSON
    #[cfg(feature = "serde_json")]
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Load a recording exported in `format`
    pub fn load(bytes: &[u8], format: ExportFormat) -> Result<Self> {
        match format {
            ExportFormat::Bincode => Self::from_bincode(bytes),
            ExportFormat::Ron => {
                let text = std::str::from_utf8(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
                Self::from_ron(text)
            }
            #[cfg(feature = "serde_json")]
            ExportFormat::Json => {
                let text = std::str::from_utf8(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
                Self::from_json(text)
            }
            #[cfg(not(feature = "serde_json"))]
            ExportFormat::Json => Err(Error::Export(
                "JSON import requires the 'serde_json' feature".to_string(),
            )),
            ExportFormat::Text => Err(Error::Export(
                "text exports cannot be loaded".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{JournalEntry, OutputCapture, FORMAT_VERSION};
    use chrono::{TimeZone, Utc};
    use tempora_core::{Batch, Record, Value, Watermark};

    fn create_test_recording() -> Recording {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        Recording {
            version: FORMAT_VERSION,
            label: Some("sensors".to_string()),
            started: at,
            finished: at,
            entries: vec![
                JournalEntry {
                    seq: 0,
                    port: 0,
                    at,
                    batch: Batch::new(
                        vec![Record::of(0, "double"), Record::inactive(40)],
                        Watermark::At(40),
                    ),
                },
                JournalEntry {
                    seq: 1,
                    port: 1,
                    at,
                    batch: Batch::new(vec![Record::of(5, Value::pair(1.5, true))], Watermark::Final),
                },
            ],
            outputs: vec![OutputCapture {
                port: 0,
                stability: Watermark::Final,
                records: vec![Record::of(10, 3)],
            }],
        }
    }

    #[test]
    fn test_export_ron() {
        let recording = create_test_recording();
        let ron = Exporter::new(&recording).to_ron().unwrap();

        assert!(ron.contains("version"));
        assert!(ron.contains("entries"));
        assert_eq!(Recording::from_ron(&ron).unwrap(), recording);
    }

    #[test]
    fn test_export_bincode() {
        let recording = create_test_recording();
        let bytes = Exporter::new(&recording).export(ExportFormat::Bincode).unwrap();
        assert_eq!(Recording::load(&bytes, ExportFormat::Bincode).unwrap(), recording);
    }

    #[test]
    fn test_export_text() {
        let recording = create_test_recording();
        let text = Exporter::new(&recording).to_text();

        assert!(text.contains("Label: sensors"));
        assert!(text.contains("#1 input[1]"));
        assert!(text.contains("40 inactive"));
        assert!(text.contains("output[0]"));
        assert!(matches!(
            Recording::load(text.as_bytes(), ExportFormat::Text),
            Err(Error::Export(_))
        ));
    }

    #[test]
    fn test_export_to_writer() {
        let recording = create_test_recording();
        let mut buffer = Vec::new();
        Exporter::new(&recording)
            .export_to(&mut buffer, ExportFormat::Ron)
            .unwrap();
        assert_eq!(Recording::load(&buffer, ExportFormat::Ron).unwrap(), recording);
    }

    #[test]
    fn test_corrupt_input_is_a_serialization_error() {
        assert!(matches!(
            Recording::from_bincode(&[1, 2, 3]),
            Err(Error::Serialization(_))
        ));
        assert!(matches!(
            Recording::from_ron("not a recording"),
            Err(Error::Serialization(_))
        ));
    }

    #[cfg(feature = "serde_json")]
    #[test]
    fn test_export_json() {
        let recording = create_test_recording();
        let json = Exporter::new(&recording).to_json().unwrap();
        assert_eq!(Recording::from_json(&json).unwrap(), recording);
    }

    #[cfg(not(feature = "serde_json"))]
    #[test]
    fn test_json_requires_feature() {
        let recording = create_test_recording();
        assert!(matches!(
            Exporter::new(&recording).to_json(),
            Err(Error::Export(_))
        ));
    }
}
