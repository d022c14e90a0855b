//! Identity types for partitions and compiled network nodes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a partition: one independent logical thread of control
///
/// Uses a string-based ID so partitions can be named in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(pub String);

impl PartitionId {
    /// Create a new partition ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PartitionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PartitionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Stable index of a link inside a partition's link arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub usize);

impl LinkId {
    /// Get the raw index
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link:{}", self.0)
    }
}

/// Identifier of a leaf wire in a compiled blueprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WireId(pub usize);

impl fmt::Display for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_id() {
        let id = PartitionId::new("sensors");
        assert_eq!(id.as_str(), "sensors");
        assert_eq!(format!("{}", id), "sensors");
        assert_eq!(PartitionId::from("sensors"), id);
    }

    #[test]
    fn test_link_id() {
        let id = LinkId(7);
        assert_eq!(id.index(), 7);
        assert_eq!(format!("{}", id), "link:7");
    }

    #[test]
    fn test_partition_id_serializes_transparently() {
        let id = PartitionId::new("ui");
        let text = ron::to_string(&id).unwrap();
        assert_eq!(text, "\"ui\"");
    }
}
