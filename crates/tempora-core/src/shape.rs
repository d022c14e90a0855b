//! Structural signal types
//!
//! A [`Shape`] describes how a bundle of leaf signals is composed:
//!
//! - [`Shape::Leaf`]: one signal owned by a partition, carrying values of a [`LeafType`]
//! - [`Shape::Product`]: two structures active together (synchronized parallel)
//! - [`Shape::Sum`]: two structures active at disjoint times (choice)
//!
//! Shapes are pure descriptors used by the compiler and the dynamic installer;
//! they are never runtime values.

use crate::identity::PartitionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of the values carried by a leaf signal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeafType {
    /// An application-named value type, e.g. `"int"` or `"temperature"`
    Named(String),
    /// A synchronized pair, produced by zipping a product of two leaves
    Pair(Box<LeafType>, Box<LeafType>),
}

impl LeafType {
    /// Create a named leaf type
    pub fn named(name: impl Into<String>) -> Self {
        LeafType::Named(name.into())
    }

    /// Create a pair type
    pub fn pair(left: LeafType, right: LeafType) -> Self {
        LeafType::Pair(Box::new(left), Box::new(right))
    }

    /// Components of a pair type
    pub fn as_pair(&self) -> Option<(&LeafType, &LeafType)> {
        match self {
            LeafType::Pair(l, r) => Some((l, r)),
            LeafType::Named(_) => None,
        }
    }
}

impl fmt::Display for LeafType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeafType::Named(name) => write!(f, "{}", name),
            LeafType::Pair(l, r) => write!(f, "({}, {})", l, r),
        }
    }
}

impl From<&str> for LeafType {
    fn from(s: &str) -> Self {
        LeafType::named(s)
    }
}

/// Composition shape of a bundle of signals
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    /// A single signal owned by `partition`
    Leaf { partition: PartitionId, ty: LeafType },
    /// Synchronized parallel composition
    Product(Box<Shape>, Box<Shape>),
    /// Disjoint choice composition
    Sum(Box<Shape>, Box<Shape>),
}

impl Shape {
    /// Create a leaf shape
    pub fn leaf(partition: impl Into<PartitionId>, ty: impl Into<LeafType>) -> Self {
        Shape::Leaf {
            partition: partition.into(),
            ty: ty.into(),
        }
    }

    /// Create a product shape
    pub fn product(left: Shape, right: Shape) -> Self {
        Shape::Product(Box::new(left), Box::new(right))
    }

    /// Create a sum shape
    pub fn sum(left: Shape, right: Shape) -> Self {
        Shape::Sum(Box::new(left), Box::new(right))
    }

    /// Short name of the outermost constructor
    pub fn kind(&self) -> &'static str {
        match self {
            Shape::Leaf { .. } => "leaf",
            Shape::Product(_, _) => "product",
            Shape::Sum(_, _) => "sum",
        }
    }

    /// All leaves, left to right
    pub fn leaves(&self) -> Vec<(&PartitionId, &LeafType)> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<(&'a PartitionId, &'a LeafType)>) {
        match self {
            Shape::Leaf { partition, ty } => out.push((partition, ty)),
            Shape::Product(l, r) | Shape::Sum(l, r) => {
                l.collect_leaves(out);
                r.collect_leaves(out);
            }
        }
    }

    /// Number of leaf signals
    pub fn leaf_count(&self) -> usize {
        match self {
            Shape::Leaf { .. } => 1,
            Shape::Product(l, r) | Shape::Sum(l, r) => l.leaf_count() + r.leaf_count(),
        }
    }

    /// Distinct partitions referenced by the leaves, in first-seen order
    pub fn partitions(&self) -> Vec<&PartitionId> {
        let mut out: Vec<&PartitionId> = Vec::new();
        for (partition, _) in self.leaves() {
            if !out.contains(&partition) {
                out.push(partition);
            }
        }
        out
    }

    /// The same shape with every leaf moved to `partition`
    pub fn relocated(&self, partition: &PartitionId) -> Shape {
        match self {
            Shape::Leaf { ty, .. } => Shape::Leaf {
                partition: partition.clone(),
                ty: ty.clone(),
            },
            Shape::Product(l, r) => Shape::product(l.relocated(partition), r.relocated(partition)),
            Shape::Sum(l, r) => Shape::sum(l.relocated(partition), r.relocated(partition)),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Leaf { partition, ty } => write!(f, "{}@{}", ty, partition),
            Shape::Product(l, r) => write!(f, "({} * {})", l, r),
            Shape::Sum(l, r) => write!(f, "({} + {})", l, r),
        }
    }
}
