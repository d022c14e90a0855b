//! Tempora Core - Temporal signals and behavior descriptions
//!
//! This crate provides the value-level model of the tempora runtime:
//! - Temporal signals with a discrete update encoding (`Signal`, `Record`, `Update`)
//! - Batches and idempotent admission (`Batch`, `admit`)
//! - Stability watermarks and logical time (`Watermark`, `Time`, `Clock`)
//! - Dynamic values carried by leaf signals (`Value`)
//! - Structural signal shapes (`Shape`, `LeafType`)
//! - Composable behavior descriptions (`Behavior`, `Latency`, `BehaviorLibrary`)
//!
//! ## Collaborators
//!
//! The running network consumes two external capabilities, both defined here
//! at their interface only:
//! - `Registry` - find-or-create shared resources per partition space
//! - `Observer` - side-effecting consumers attached to a leaf signal
//!
//! Compiling behaviors into link networks lives in `tempora-compiler`;
//! running them across partitions lives in `tempora-hub`.

pub mod batch;
pub mod behavior;
mod error;
mod identity;
mod observer;
mod registry;
mod shape;
pub mod signal;
pub mod time;
mod value;

pub use batch::{admit, Admission, Batch};
pub use behavior::{Behavior, BehaviorLibrary, Catalog, Latency, MapFn, Predicate};
pub use error::{Error, ProtocolViolation, Result};
pub use identity::{LinkId, PartitionId, WireId};
pub use observer::{ObserveContext, Observer};
pub use registry::{Registry, Resource};
pub use shape::{LeafType, Shape};
pub use signal::{merge, split, unzip, zip, Record, Signal, Update};
pub use time::{Clock, Delay, ManualClock, MonotonicClock, Time, Watermark};
pub use value::Value;
