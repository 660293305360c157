//! Request and challenge signing.
//!
//! Kraken Futures authentication, bit-exact:
//! 1. REST: SHA-256(`postData + nonce + endpointPath`), then HMAC-SHA-512
//!    keyed with the base64-decoded API secret, base64-encoded -> `Authent`.
//! 2. WS challenge: SHA-256(raw challenge), same HMAC, base64 ->
//!    `signed_challenge`.
//!
//! The `/derivatives` prefix is stripped from the path before hashing.

use crate::error::{AuthError, AuthResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use std::sync::atomic::{AtomicI64, Ordering};
use zeroize::Zeroizing;

type HmacSha512 = Hmac<Sha512>;

/// API credentials.
///
/// The decoded secret lives in a zeroized buffer and is owned exclusively
/// by the `Signer`. Never log key material.
pub struct Credentials {
    api_key: String,
    secret: Zeroizing<Vec<u8>>,
}

impl Credentials {
    /// Build credentials from the API key and the base64-encoded secret.
    ///
    /// # Errors
    /// `AuthError::InvalidSecret` if the secret is not valid base64. This
    /// is fatal and must be surfaced at startup, not retried.
    pub fn new(api_key: impl Into<String>, secret_b64: &str) -> AuthResult<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(AuthError::InvalidApiKey);
        }
        let secret = BASE64
            .decode(secret_b64.trim())
            .map_err(|e| AuthError::InvalidSecret(e.to_string()))?;
        Ok(Self {
            api_key,
            secret: Zeroizing::new(secret),
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key_len", &self.api_key.len())
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Header set for an authenticated REST request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeaders {
    pub api_key: String,
    pub authent: String,
    pub nonce: String,
}

/// Signs REST requests and WebSocket challenges.
///
/// Signing never fails once the `Signer` is constructed; a malformed
/// secret is rejected in `Credentials::new`.
pub struct Signer {
    credentials: Credentials,
    /// Prebuilt MAC keyed with the decoded secret, cloned per signature.
    mac: HmacSha512,
    last_nonce: AtomicI64,
}

impl Signer {
    pub fn new(credentials: Credentials) -> Self {
        let mac = HmacSha512::new_from_slice(&credentials.secret)
            .expect("HMAC accepts keys of any length");
        Self {
            credentials,
            mac,
            last_nonce: AtomicI64::new(0),
        }
    }

    pub fn api_key(&self) -> &str {
        self.credentials.api_key()
    }

    /// Next monotonic millisecond nonce.
    ///
    /// Falls back to `last + 1` when the clock has not advanced so the
    /// exchange never sees a duplicate or decreasing nonce.
    pub fn next_nonce(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.last_nonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .map(|last| now.max(last + 1))
            .unwrap_or(now)
    }

    /// Sign a REST request.
    ///
    /// `post_data` is the `key=value&...` concatenation of the parameters
    /// in the order they are sent; `path` is the endpoint path, with or
    /// without the `/derivatives` prefix.
    pub fn sign_rest(&self, post_data: &str, nonce: &str, path: &str) -> String {
        let path = path.strip_prefix("/derivatives").unwrap_or(path);
        let mut message = String::with_capacity(post_data.len() + nonce.len() + path.len());
        message.push_str(post_data);
        message.push_str(nonce);
        message.push_str(path);
        self.hmac_b64(Sha256::digest(message.as_bytes()).as_slice())
    }

    /// Produce the full header set for a REST call, consuming a nonce.
    pub fn auth_headers(&self, post_data: &str, path: &str) -> AuthHeaders {
        let nonce = self.next_nonce().to_string();
        let authent = self.sign_rest(post_data, &nonce, path);
        AuthHeaders {
            api_key: self.credentials.api_key.clone(),
            authent,
            nonce,
        }
    }

    /// Sign a WebSocket challenge string.
    pub fn sign_challenge(&self, challenge: &str) -> AuthResult<String> {
        if challenge.is_empty() {
            return Err(AuthError::EmptyChallenge);
        }
        Ok(self.hmac_b64(Sha256::digest(challenge.as_bytes()).as_slice()))
    }

    fn hmac_b64(&self, digest: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(digest);
        BASE64.encode(mac.finalize().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Demo secret from Kraken's public API documentation.
    const DOC_SECRET: &str =
        "7zxMEF5p/Z8l2p2U7Ghv6x14Af+Fx+92tPgUdVQ748FOIrEoT9bgT+bTRfXc5pz8na+hL/QdrCVG7bh9KpT0eMTm";

    fn doc_signer() -> Signer {
        Signer::new(Credentials::new("api_key", DOC_SECRET).unwrap())
    }

    #[test]
    fn test_sign_challenge_matches_documented_example() {
        let signer = doc_signer();
        let signed = signer
            .sign_challenge("c100b894-1729-464d-ace1-52dbce11db42")
            .unwrap();
        assert_eq!(
            signed,
            "4JEpF3ix66GA2B+ooK128Ift4XQVtc137N9yeg4Kqsn9PI0Kpzbysl9M1IeCEdjg0zl00wkVqcsnG4bmnlMb3A=="
        );
    }

    #[test]
    fn test_sign_rest_deterministic() {
        let signer = doc_signer();
        let authent = signer.sign_rest(
            "orderType=lmt&symbol=PF_XBTUSD&side=buy&size=1&limitPrice=9400",
            "1415957147987",
            "/derivatives/api/v3/sendorder",
        );
        assert_eq!(
            authent,
            "tVaKjZ9qIdiBtoa6hXPaROB6dPDCXfJ+CmRiJqdzzVKoFZ1ZSpkL82sakVHhlfZH2UJtYHWD4t2t35Ms9aHNfw=="
        );
    }

    #[test]
    fn test_derivatives_prefix_stripped() {
        let signer = doc_signer();
        let a = signer.sign_rest("", "1", "/derivatives/api/v3/accounts");
        let b = signer.sign_rest("", "1", "/api/v3/accounts");
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_secret_is_fatal() {
        let err = Credentials::new("key", "not base64!!!").unwrap_err();
        assert!(matches!(err, AuthError::InvalidSecret(_)));
    }

    #[test]
    fn test_empty_challenge_rejected() {
        let signer = doc_signer();
        assert!(matches!(
            signer.sign_challenge(""),
            Err(AuthError::EmptyChallenge)
        ));
    }

    #[test]
    fn test_nonce_monotonic() {
        let signer = doc_signer();
        let mut last = 0;
        for _ in 0..1000 {
            let n = signer.next_nonce();
            assert!(n > last);
            last = n;
        }
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials::new("key", DOC_SECRET).unwrap();
        let debug = format!("{creds:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("7zxMEF5p"));
    }
}
