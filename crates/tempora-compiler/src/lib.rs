//! Tempora Compiler - Behavior descriptions to link blueprints
//!
//! The compiler turns a [`Behavior`](tempora_core::Behavior) plus the
//! [`Shape`](tempora_core::Shape) of its input into a [`Blueprint`]: a
//! validated, partitioned list of links ready to be instantiated by
//! `tempora-hub`.
//!
//! ## Guarantees of a compiled blueprint
//!
//! - Every primitive was applied to the structural type it requires
//! - Both sides of every product and choice carry identical delay
//! - Links that read several leaves only read leaves of their own partition
//! - Partition crossings are explicit sender/receiver pairs joined by a channel
//! - Links are listed in topological order
//!
//! A failing build returns [`CompileErrors`] listing every offending
//! composition site.

mod blueprint;
mod compiler;
mod error;

pub use blueprint::{
    Blueprint, Bundle, ChannelId, ChannelSpec, LinkKind, LinkSpec, Port, Timing, WireSpec,
};
pub use compiler::compile;
pub use error::{CompileError, CompileErrors, Result, Site};
