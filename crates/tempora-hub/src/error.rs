//! Error types for tempora-hub

use crate::partition::PartitionState;
use tempora_compiler::CompileErrors;
use tempora_core::PartitionId;
use thiserror::Error;

/// Result type for tempora-hub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tempora-hub
#[derive(Debug, Error)]
pub enum Error {
    /// The behavior failed to compile
    #[error("compile error: {0}")]
    Compile(#[from] CompileErrors),

    /// Core error outside of a running partition
    #[error("core error: {0}")]
    Core(#[from] tempora_core::Error),

    /// The blueprint references a partition the assignment does not cover
    #[error("partition {0} has no assignment")]
    UnassignedPartition(PartitionId),

    /// Partition not found
    #[error("partition {0} not found")]
    UnknownPartition(PartitionId),

    /// Input or output port not found
    #[error("port {0} not found")]
    UnknownPort(usize),

    /// The partition no longer accepts external input
    #[error("partition {0} is draining and accepts no external input")]
    Draining(PartitionId),

    /// A lifecycle transition the state machine does not allow
    #[error("partition {partition} cannot go from {from} to {to}")]
    InvalidTransition {
        partition: PartitionId,
        from: PartitionState,
        to: PartitionState,
    },

    /// A hand-off target stopped while batches were still addressed to it
    #[error("hand-off queue of partition {0} is closed")]
    QueueClosed(PartitionId),

    /// A protocol violation stopped a partition
    ///
    /// These indicate a compiler or link bug; the partition is `Stopped`
    /// once this is returned.
    #[error("partition {partition} faulted: {source}")]
    Fault {
        partition: PartitionId,
        #[source]
        source: tempora_core::Error,
    },

    /// A partition thread panicked
    #[error("thread of partition {0} panicked")]
    ThreadPanicked(PartitionId),

    /// A partition thread could not be started
    #[error("failed to spawn partition thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// The underlying protocol violation if this is a partition fault
    pub fn violation(&self) -> Option<&tempora_core::ProtocolViolation> {
        match self {
            Error::Fault {
                source: tempora_core::Error::Protocol(v),
                ..
            } => Some(v),
            _ => None,
        }
    }
}

// Compile-time check that Error is Send + Sync for thread-safe error propagation.
// This function is never called but will fail to compile if the bound is not satisfied.
fn _assert_error_send_sync<T: Send + Sync>() {}
fn _error_is_send_sync() {
    _assert_error_send_sync::<Error>();
}
