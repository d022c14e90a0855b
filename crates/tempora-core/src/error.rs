//! Error types for tempora-core

use crate::time::{Time, Watermark};
use thiserror::Error;

/// A breach of the update protocol between a producer and its consumers
///
/// These indicate a compiler or link bug rather than a normal runtime
/// condition. The hub treats them as fatal to the partition that sees them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("stability watermark regressed from {current} to {proposed}")]
    WatermarkRegression {
        current: Watermark,
        proposed: Watermark,
    },

    #[error("update at {time} delivered at or behind stability {watermark}")]
    UpdateBehindWatermark { time: Time, watermark: Watermark },

    #[error("update at {time} does not follow previous update at {previous}")]
    UpdateOutOfOrder { time: Time, previous: Time },

    #[error("conflicting updates for the same instant {time}")]
    ConflictingUpdate { time: Time },

    #[error("both branches of a sum active from {since} to {time}")]
    SumOverlap { since: Time, time: Time },
}

/// Core error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("signal has no state at {time}: no update at or before it")]
    Undefined { time: Time },

    #[error("cannot sample at {time}: signal is only stable up to {watermark}")]
    Unstable { time: Time, watermark: Watermark },

    #[error("history at {time} has been compacted away")]
    Compacted { time: Time },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
