//! Book error types.

use krf_core::Symbol;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookError {
    /// A delta skipped sequence numbers; book state was discarded and
    /// must be rebuilt from a fresh snapshot.
    #[error("Sequence gap on {symbol}: expected {expected}, got {got}")]
    SequenceGap {
        symbol: Symbol,
        expected: u64,
        got: u64,
    },

    /// A delta arrived for a symbol without a snapshot.
    #[error("No snapshot for {symbol}")]
    NoSnapshot { symbol: Symbol },
}

pub type BookResult<T> = Result<T, BookError>;
