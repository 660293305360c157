//! Authentication for Kraken Futures REST and WebSocket surfaces.
//!
//! Provides the `Signer`, which owns the credentials and produces:
//! - REST auth headers (`APIKey`, `Authent`, `Nonce`)
//! - WebSocket challenge signatures for private feed subscriptions

pub mod error;
pub mod signer;

pub use error::{AuthError, AuthResult};
pub use signer::{AuthHeaders, Credentials, Signer};
