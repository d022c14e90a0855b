//! Behavior descriptions
//!
//! A [`Behavior`] is an immutable, composable description of a transformation
//! from one signal [`Shape`] to another. It is not a running object: the
//! network compiler turns it into linked, stateful update processors.
//!
//! Behaviors compose by:
//! - sequencing (`a.then(b)`)
//! - parallel product (`Behavior::product(a, b)`, applied to each side of a product)
//! - choice (`Behavior::choice(a, b)`, applied to each side of a sum)
//! - dynamic instantiation (`Behavior::dynamic`, resolved from a runtime value)
//!
//! Every behavior carries declared `(min, max)` latency bounds that the compiler
//! reconciles across composed branches.
//!
//! # Example
//!
//! ```
//! use tempora_core::{Behavior, LeafType, Value};
//!
//! // Duplicate a signal, delay one copy, then pair the copies up again.
//! let b = Behavior::dup()
//!     .then(Behavior::second(Behavior::delay(10)))
//!     .then(Behavior::zip());
//! assert_eq!(b.latency_bounds().max, 10);
//!
//! let double = Behavior::map("double", LeafType::named("int"), |v: &Value| {
//!     Value::Int(v.as_int().unwrap_or(0) * 2)
//! });
//! assert_eq!(double.kind(), "map");
//! ```

use crate::identity::PartitionId;
use crate::observer::Observer;
use crate::shape::{LeafType, Shape};
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Pure function applied to every active value of a leaf
pub type MapFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Routing predicate: `true` goes to the left branch of the sum
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Declared latency bounds in logical time
///
/// Bounds are signed so that descriptions can be written before validation;
/// the compiler rejects negative or inverted bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Latency {
    /// Earliest effect of an input on the output
    pub min: i64,
    /// Logical delay applied to the output
    pub max: i64,
}

impl Latency {
    /// Create latency bounds
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Bounds of an exact delay
    pub fn exact(delay: i64) -> Self {
        Self::new(delay, delay)
    }

    /// Bounds of two behaviors run one after the other
    pub fn then(self, next: Latency) -> Self {
        Self::new(
            self.min.saturating_add(next.min),
            self.max.saturating_add(next.max),
        )
    }

    /// Bounds of two branches after the smaller one is delayed to match
    pub fn synchronized(self, other: Latency) -> Self {
        let max = self.max.max(other.max);
        let lift = |l: Latency| l.min.saturating_add(max - l.max);
        Self::new(lift(self).min(lift(other)), max)
    }
}

impl fmt::Display for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Resolves runtime names to behaviors for dynamic installation
pub trait BehaviorLibrary: Send + Sync {
    /// The behavior named by `name`, if any
    fn resolve(&self, name: &Value) -> Option<Behavior>;
}

/// A behavior library keyed by string names
#[derive(Clone, Default)]
pub struct Catalog {
    entries: IndexMap<String, Behavior>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a behavior under `name`, replacing any previous entry
    pub fn insert(&mut self, name: impl Into<String>, behavior: Behavior) {
        self.entries.insert(name.into(), behavior);
    }

    /// Builder-style registration
    pub fn with(mut self, name: impl Into<String>, behavior: Behavior) -> Self {
        self.insert(name, behavior);
        self
    }

    /// Registered names, in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of registered behaviors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl BehaviorLibrary for Catalog {
    fn resolve(&self, name: &Value) -> Option<Behavior> {
        name.as_str().and_then(|n| self.entries.get(n)).cloned()
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("names", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Description of a signal transformation
#[derive(Clone)]
pub enum Behavior {
    /// Pass the input through unchanged
    Identity,
    /// Run the first behavior, then feed its output to the second
    Then(Arc<Behavior>, Arc<Behavior>),
    /// Apply one behavior to each side of a product
    Product(Arc<Behavior>, Arc<Behavior>),
    /// Apply one behavior to each side of a sum
    Choice(Arc<Behavior>, Arc<Behavior>),
    /// `X -> X * X`
    Dup,
    /// `X * Y -> X`
    Fst,
    /// `X * Y -> Y`
    Snd,
    /// `X * Y -> Y * X`
    Swap,
    /// `X + Y -> Y + X`
    Mirror,
    /// Apply a pure function to every value of a leaf
    Map {
        name: String,
        output: LeafType,
        f: MapFn,
    },
    /// `Leaf a * Leaf b -> Leaf (a, b)`, active when both sides are
    Zip,
    /// `Leaf (a, b) -> Leaf a * Leaf b`
    Unzip,
    /// `Leaf a -> Leaf a + Leaf a`, routing each value by a predicate
    Split { name: String, predicate: Predicate },
    /// `X + X -> X`
    Merge,
    /// Shift every update by a logical delay
    Delay(i64),
    /// Declare latency bounds for an inner behavior; output is padded to `max`
    Latency {
        inner: Arc<Behavior>,
        bounds: Latency,
    },
    /// Delay every leaf to the largest delay among them
    Synch,
    /// Move every leaf to another partition through the hand-off protocol
    Cross(PartitionId),
    /// Assert that every leaf lives on a partition
    At(PartitionId),
    /// Assert the exact input shape
    Expect(Shape),
    /// `Leaf name * X -> Y`: install the behavior named by the left signal
    Dynamic {
        library: Arc<dyn BehaviorLibrary>,
        output: Shape,
        latency: Latency,
    },
    /// Attach a side-effecting observer to a leaf, passing it through
    Observe {
        name: String,
        observer: Arc<dyn Observer>,
    },
}

impl Behavior {
    // ========================================================================
    // Composition
    // ========================================================================

    /// The identity behavior
    pub fn identity() -> Self {
        Behavior::Identity
    }

    /// Sequence this behavior with `next`
    pub fn then(self, next: Behavior) -> Self {
        Behavior::Then(Arc::new(self), Arc::new(next))
    }

    /// Apply `left` and `right` to the two sides of a product
    pub fn product(left: Behavior, right: Behavior) -> Self {
        Behavior::Product(Arc::new(left), Arc::new(right))
    }

    /// Apply `b` to the left side of a product
    pub fn first(b: Behavior) -> Self {
        Self::product(b, Behavior::Identity)
    }

    /// Apply `b` to the right side of a product
    pub fn second(b: Behavior) -> Self {
        Self::product(Behavior::Identity, b)
    }

    /// Apply `left` and `right` to the two sides of a sum
    pub fn choice(left: Behavior, right: Behavior) -> Self {
        Behavior::Choice(Arc::new(left), Arc::new(right))
    }

    /// Apply `b` to the left side of a sum
    pub fn left(b: Behavior) -> Self {
        Self::choice(b, Behavior::Identity)
    }

    /// Apply `b` to the right side of a sum
    pub fn right(b: Behavior) -> Self {
        Self::choice(Behavior::Identity, b)
    }

    // ========================================================================
    // Structure
    // ========================================================================

    /// `X -> X * X`
    pub fn dup() -> Self {
        Behavior::Dup
    }

    /// `X * Y -> X`
    pub fn fst() -> Self {
        Behavior::Fst
    }

    /// `X * Y -> Y`
    pub fn snd() -> Self {
        Behavior::Snd
    }

    /// `X * Y -> Y * X`
    pub fn swap() -> Self {
        Behavior::Swap
    }

    /// `X + Y -> Y + X`
    pub fn mirror() -> Self {
        Behavior::Mirror
    }

    /// `Leaf a * Leaf b -> Leaf (a, b)`
    pub fn zip() -> Self {
        Behavior::Zip
    }

    /// `Leaf (a, b) -> Leaf a * Leaf b`
    pub fn unzip() -> Self {
        Behavior::Unzip
    }

    /// `X + X -> X`
    pub fn merge() -> Self {
        Behavior::Merge
    }

    // ========================================================================
    // Leaf primitives
    // ========================================================================

    /// Apply a named pure function to a leaf, producing values of `output`
    pub fn map<F>(name: impl Into<String>, output: impl Into<LeafType>, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Behavior::Map {
            name: name.into(),
            output: output.into(),
            f: Arc::new(f),
        }
    }

    /// Route a leaf into a sum by a named predicate
    pub fn split<P>(name: impl Into<String>, predicate: P) -> Self
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Behavior::Split {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Attach a side-effecting observer to a leaf
    pub fn observe(name: impl Into<String>, observer: impl Observer + 'static) -> Self {
        Behavior::Observe {
            name: name.into(),
            observer: Arc::new(observer),
        }
    }

    // ========================================================================
    // Timing
    // ========================================================================

    /// Delay every leaf by `delay`
    pub fn delay(delay: i64) -> Self {
        Behavior::Delay(delay)
    }

    /// Declare latency bounds for this behavior
    pub fn latency(self, min: i64, max: i64) -> Self {
        Behavior::Latency {
            inner: Arc::new(self),
            bounds: Latency::new(min, max),
        }
    }

    /// Delay every leaf to the slowest one
    pub fn synch() -> Self {
        Behavior::Synch
    }

    // ========================================================================
    // Placement and types
    // ========================================================================

    /// Cross every leaf into `partition`
    pub fn cross(partition: impl Into<PartitionId>) -> Self {
        Behavior::Cross(partition.into())
    }

    /// Assert every leaf is on `partition`
    pub fn at(partition: impl Into<PartitionId>) -> Self {
        Behavior::At(partition.into())
    }

    /// Assert the input shape
    pub fn expect(shape: Shape) -> Self {
        Behavior::Expect(shape)
    }

    /// Install behaviors named at runtime by the left leaf of the input
    ///
    /// Installed behaviors must map the right side of the input to `output`
    /// within `latency`; they are padded to exactly `latency.max`.
    pub fn dynamic(
        library: impl BehaviorLibrary + 'static,
        output: Shape,
        latency: Latency,
    ) -> Self {
        Behavior::Dynamic {
            library: Arc::new(library),
            output,
            latency,
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Short name of the outermost combinator
    pub fn kind(&self) -> &'static str {
        match self {
            Behavior::Identity => "identity",
            Behavior::Then(_, _) => "then",
            Behavior::Product(_, _) => "product",
            Behavior::Choice(_, _) => "choice",
            Behavior::Dup => "dup",
            Behavior::Fst => "fst",
            Behavior::Snd => "snd",
            Behavior::Swap => "swap",
            Behavior::Mirror => "mirror",
            Behavior::Map { .. } => "map",
            Behavior::Zip => "zip",
            Behavior::Unzip => "unzip",
            Behavior::Split { .. } => "split",
            Behavior::Merge => "merge",
            Behavior::Delay(_) => "delay",
            Behavior::Latency { .. } => "latency",
            Behavior::Synch => "synch",
            Behavior::Cross(_) => "cross",
            Behavior::At(_) => "at",
            Behavior::Expect(_) => "expect",
            Behavior::Dynamic { .. } => "dynamic",
            Behavior::Observe { .. } => "observe",
        }
    }

    /// Declared latency bounds, independent of the input shape
    pub fn latency_bounds(&self) -> Latency {
        match self {
            Behavior::Then(a, b) => a.latency_bounds().then(b.latency_bounds()),
            Behavior::Product(a, b) | Behavior::Choice(a, b) => {
                a.latency_bounds().synchronized(b.latency_bounds())
            }
            Behavior::Delay(d) => Latency::exact(*d),
            Behavior::Latency { bounds, .. } => *bounds,
            Behavior::Dynamic { latency, .. } => *latency,
            _ => Latency::default(),
        }
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Behavior::Then(a, b) => f.debug_tuple("Then").field(a).field(b).finish(),
            Behavior::Product(a, b) => f.debug_tuple("Product").field(a).field(b).finish(),
            Behavior::Choice(a, b) => f.debug_tuple("Choice").field(a).field(b).finish(),
            Behavior::Map { name, output, .. } => f
                .debug_struct("Map")
                .field("name", name)
                .field("output", output)
                .finish(),
            Behavior::Split { name, .. } => f.debug_struct("Split").field("name", name).finish(),
            Behavior::Delay(d) => f.debug_tuple("Delay").field(d).finish(),
            Behavior::Latency { inner, bounds } => f
                .debug_struct("Latency")
                .field("inner", inner)
                .field("bounds", bounds)
                .finish(),
            Behavior::Cross(p) => f.debug_tuple("Cross").field(p).finish(),
            Behavior::At(p) => f.debug_tuple("At").field(p).finish(),
            Behavior::Expect(s) => f.debug_tuple("Expect").field(s).finish(),
            Behavior::Dynamic {
                output, latency, ..
            } => f
                .debug_struct("Dynamic")
                .field("output", output)
                .field("latency", latency)
                .finish(),
            Behavior::Observe { name, .. } => {
                f.debug_struct("Observe").field("name", name).finish()
            }
            other => write!(f, "{}", other.kind()),
        }
    }
}
