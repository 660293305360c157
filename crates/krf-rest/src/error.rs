//! REST error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestError {
    /// Reservation would exceed the pool budget (fail-fast callers only).
    #[error("Rate limited: pool {pool} needs {cost}, {available} available")]
    RateLimited {
        pool: &'static str,
        cost: u32,
        available: u32,
    },

    #[error("Authentication error: {0}")]
    Auth(#[from] krf_auth::AuthError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error: {0}")]
    Api(String),
}

pub type RestResult<T> = Result<T, RestError>;
