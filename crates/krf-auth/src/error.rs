//! Authentication error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// The API secret is not valid base64. Fatal, surfaced at startup.
    #[error("Invalid API secret: {0}")]
    InvalidSecret(String),

    #[error("Invalid API key format")]
    InvalidApiKey,

    #[error("Empty challenge string")]
    EmptyChallenge,
}

pub type AuthResult<T> = Result<T, AuthError>;
