//! Order lifecycle and position tracking.
//!
//! A single-writer actor converges REST acknowledgements and
//! WebSocket events, which arrive out of order, into one consistent
//! order and position state.

pub mod assignment;
pub mod error;
pub mod feed;
pub mod tracker;

pub use assignment::{Assignment, InitialState, PositionAssignmentAdapter};
pub use error::{TrackerError, TrackerResult};
pub use feed::position_from_ws;
pub use tracker::{
    spawn_tracker, FillEvent, LifecycleState, OrderRef, SubmitOutcome, TrackerHandle, TrackerMsg,
    TrackerTask,
};
