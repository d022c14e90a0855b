//! Summaries of what a recording delivered

use crate::recorder::{JournalEntry, Recording};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use tempora_core::{Time, Watermark};

/// Auditor for querying and analyzing recordings
pub struct Auditor<'a> {
    recording: &'a Recording,
}

impl<'a> Auditor<'a> {
    /// Create a new auditor for a recording
    pub fn new(recording: &'a Recording) -> Self {
        Self { recording }
    }

    /// Generate an audit report
    pub fn generate_report(&self) -> AuditReport {
        let mut ports: BTreeMap<usize, PortSummary> = BTreeMap::new();
        for entry in self.recording.entries() {
            let summary = ports.entry(entry.port).or_default();
            summary.batches += 1;
            if entry.batch.is_heartbeat() {
                summary.heartbeats += 1;
            }
            for record in &entry.batch.records {
                summary.records += 1;
                if !record.update.is_active() {
                    summary.deactivations += 1;
                }
                summary.first_time = Some(summary.first_time.map_or(record.time, |t| t.min(record.time)));
                summary.last_time = Some(summary.last_time.map_or(record.time, |t| t.max(record.time)));
            }
            if entry.batch.stability < summary.stability {
                summary.regressions += 1;
            } else {
                summary.stability = entry.batch.stability;
            }
        }

        AuditReport {
            entries: self.recording.len(),
            records: ports.values().map(|p| p.records).sum(),
            first_at: self.recording.entries().first().map(|e| e.at),
            last_at: self.recording.entries().last().map(|e| e.at),
            ports,
        }
    }

    /// Entries whose batch carries a record in `[from, to)`
    pub fn touching(&self, from: Time, to: Time) -> Vec<&JournalEntry> {
        self.recording
            .entries()
            .iter()
            .filter(|e| e.batch.records.iter().any(|r| r.time >= from && r.time < to))
            .collect()
    }

    /// Entries recorded between two wall-clock instants, inclusive
    pub fn recorded_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<&JournalEntry> {
        self.recording
            .entries()
            .iter()
            .filter(|e| e.at >= from && e.at <= to)
            .collect()
    }
}

/// What one input port received
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortSummary {
    pub batches: usize,
    pub heartbeats: usize,
    pub records: usize,
    pub deactivations: usize,
    pub first_time: Option<Time>,
    pub last_time: Option<Time>,
    /// Highest watermark delivered
    pub stability: Watermark,
    /// Batches whose watermark was behind an earlier one
    pub regressions: usize,
}

/// Audit report of a recording
#[derive(Debug, Clone, PartialEq)]
pub struct AuditReport {
    pub entries: usize,
    pub records: usize,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
    pub ports: BTreeMap<usize, PortSummary>,
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Audit Report ===")?;
        writeln!(f, "Entries: {}", self.entries)?;
        writeln!(f, "Records: {}", self.records)?;
        if let (Some(first), Some(last)) = (self.first_at, self.last_at) {
            writeln!(f, "Recorded: {} - {}", first.to_rfc3339(), last.to_rfc3339())?;
        }
        for (port, summary) in &self.ports {
            writeln!(
                f,
                "input[{}]: {} batches ({} heartbeats), {} records, stable to {}",
                port, summary.batches, summary.heartbeats, summary.records, summary.stability
            )?;
            if summary.regressions > 0 {
                writeln!(f, "  {} watermark regressions", summary.regressions)?;
            }
        }
        Ok(())
    }
}
