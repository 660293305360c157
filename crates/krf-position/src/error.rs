//! Tracker error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// The tracker task has stopped; no further events can be applied.
    #[error("Tracker channel closed")]
    ChannelClosed,
}

pub type TrackerResult<T> = Result<T, TrackerError>;
