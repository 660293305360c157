//! Structured logging for the Kraken Futures connectivity stack.

pub mod error;
pub mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
