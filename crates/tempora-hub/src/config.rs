//! Network Configuration - Queue sizes, scheduler timing and partition assignment
//!
//! A [`NetworkConfig`] holds the runtime knobs shared by every partition plus
//! per-partition overrides. It can be written in RON:
//!
//! ```
//! use tempora_hub::NetworkConfig;
//!
//! let config = NetworkConfig::from_ron(
//!     r#"(
//!         default_queue_capacity: 16,
//!         partitions: {
//!             "ui": (queue_capacity: Some(2)),
//!         },
//!     )"#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.queue_capacity(&"ui".into()), 2);
//! assert_eq!(config.queue_capacity(&"sensors".into()), 16);
//! ```

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tempora_compiler::Blueprint;
use tempora_core::{PartitionId, Time};

/// Settings of one partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Capacity of the partition's hand-off queue; `None` uses the network default
    pub queue_capacity: Option<usize>,
}

impl PartitionConfig {
    /// Configuration with an explicit queue capacity
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            queue_capacity: Some(capacity),
        }
    }
}

/// Runtime configuration of a network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Queue capacity of partitions without an override
    pub default_queue_capacity: usize,
    /// How long an idle partition thread waits for input before re-checking
    pub idle_wait_ms: u64,
    /// Longest time both branches of a sum may be active together
    pub sum_overlap_tolerance: Time,
    /// Per-partition overrides
    pub partitions: IndexMap<PartitionId, PartitionConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            default_queue_capacity: 64,
            idle_wait_ms: 5,
            sum_overlap_tolerance: 0,
            partitions: IndexMap::new(),
        }
    }
}

impl NetworkConfig {
    /// Parse a configuration from RON
    pub fn from_ron(text: &str) -> Result<Self> {
        ron::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Serialize the configuration to pretty RON
    pub fn to_ron(&self) -> Result<String> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Add or replace a partition override
    pub fn with_partition(mut self, id: impl Into<PartitionId>, config: PartitionConfig) -> Self {
        self.partitions.insert(id.into(), config);
        self
    }

    /// Effective queue capacity of a partition, never below 1
    pub fn queue_capacity(&self, id: &PartitionId) -> usize {
        self.partitions
            .get(id)
            .and_then(|c| c.queue_capacity)
            .unwrap_or(self.default_queue_capacity)
            .max(1)
    }

    /// Idle wait as a duration
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}

/// Which partitions a network may run, and how
///
/// Building a network fails if its blueprint references a partition that is
/// not assigned here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionAssignment {
    config: NetworkConfig,
}

impl PartitionAssignment {
    /// Assign exactly the partitions listed in the configuration
    pub fn new(config: NetworkConfig) -> Self {
        Self { config }
    }

    /// Assign every partition of `blueprint`, using defaults where `config`
    /// has no override
    pub fn for_blueprint(blueprint: &Blueprint, config: NetworkConfig) -> Self {
        let mut assignment = Self::new(config);
        for partition in blueprint.partitions() {
            if !assignment.contains(partition) {
                assignment = assignment.assign(partition.clone(), PartitionConfig::default());
            }
        }
        assignment
    }

    /// Assign a partition
    pub fn assign(mut self, id: impl Into<PartitionId>, config: PartitionConfig) -> Self {
        self.config.partitions.insert(id.into(), config);
        self
    }

    /// Check whether a partition is assigned
    pub fn contains(&self, id: &PartitionId) -> bool {
        self.config.partitions.contains_key(id)
    }

    /// Assigned partitions in assignment order
    pub fn partitions(&self) -> impl Iterator<Item = &PartitionId> {
        self.config.partitions.keys()
    }

    /// The underlying configuration
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }
}

/// Get the number of partition threads this machine runs in parallel
///
/// This uses the `num_cpus` crate to detect the number of logical CPUs.
pub fn max_threads() -> usize {
    num_cpus::get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempora_core::{Behavior, Shape};

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.default_queue_capacity, 64);
        assert_eq!(config.idle_wait(), Duration::from_millis(5));
        assert_eq!(config.sum_overlap_tolerance, 0);
        assert_eq!(config.queue_capacity(&"any".into()), 64);
    }

    #[test]
    fn test_capacity_clamped_minimum() {
        let config = NetworkConfig::default().with_partition("p", PartitionConfig::with_queue_capacity(0));
        assert_eq!(config.queue_capacity(&"p".into()), 1);
    }

    #[test]
    fn test_ron_roundtrip() {
        let config = NetworkConfig {
            sum_overlap_tolerance: 3,
            ..NetworkConfig::default()
        }
        .with_partition("b", PartitionConfig::with_queue_capacity(2));
        let text = config.to_ron().unwrap();
        assert_eq!(NetworkConfig::from_ron(&text).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = NetworkConfig::from_ron("(idle_wait_ms: 20)").unwrap();
        assert_eq!(config.idle_wait_ms, 20);
        assert_eq!(config.default_queue_capacity, 64);
    }

    #[test]
    fn test_invalid_ron() {
        let err = NetworkConfig::from_ron("(default_queue_capacity: \"many\")").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_assignment_for_blueprint() {
        let input = Shape::product(Shape::leaf("a", "int"), Shape::leaf("b", "int"));
        let bp = tempora_compiler::compile(&Behavior::identity(), &input).unwrap();
        let assignment = PartitionAssignment::for_blueprint(
            &bp,
            NetworkConfig::default().with_partition("b", PartitionConfig::with_queue_capacity(2)),
        );
        assert!(assignment.contains(&"a".into()));
        assert_eq!(assignment.config().queue_capacity(&"b".into()), 2);
        assert_eq!(assignment.partitions().count(), 2);
    }

    #[test]
    fn test_max_threads() {
        assert!(max_threads() >= 1, "max_threads should be at least 1");
    }
}
