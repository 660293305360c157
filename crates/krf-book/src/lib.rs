//! Order book aggregation from snapshot and delta feeds.

pub mod book;
pub mod error;
pub mod feed;

pub use book::{DeltaOutcome, OrderBookAggregator, TopOfBook};
pub use error::{BookError, BookResult};
