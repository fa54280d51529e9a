//! Webhook signature verification.
//!
//! The upstream producer signs every webhook body with HMAC-SHA256 over the
//! exact raw bytes of the request and sends the hex-encoded MAC in the
//! `X-Webhook-Signature` header. This module decides authenticity: the same
//! MAC is recomputed with the shared secret and compared in constant time.
//!
//! A missing secret is an operator error, not an authentication failure. It
//! surfaces as [`SignatureError::SecretNotConfigured`] so callers can map it
//! to a 500 instead of a 401 and operators can tell "you are not authorized"
//! apart from "the service cannot authorize anyone right now".
//!
//! # Example
//!
//! ```rust
//! use syncwave_server::signature::{sign, verify_signature};
//!
//! let body = br#"{"event":"order:created","data":{}}"#;
//! let mac = sign("s3cret", body);
//!
//! assert!(verify_signature(Some("s3cret"), Some(&mac), body).is_ok());
//! assert!(verify_signature(Some("s3cret"), Some(&mac), b"tampered").is_err());
//! ```

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur during webhook signature verification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// The signature header was absent or empty.
    #[error("missing webhook signature")]
    MissingSignature,

    /// The supplied signature did not match the computed MAC. This also
    /// covers malformed hex and wrong-length signatures, which are treated
    /// as mismatches rather than distinct errors.
    #[error("invalid webhook signature")]
    InvalidSignature,

    /// No webhook secret is configured. Operator error; no caller can
    /// succeed until configuration is fixed.
    #[error("webhook secret not configured")]
    SecretNotConfigured,
}

impl SignatureError {
    /// Returns true if this error indicates the caller failed to
    /// authenticate, as opposed to a server-side misconfiguration.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::MissingSignature | Self::InvalidSignature)
    }
}

/// Computes the hex-encoded HMAC-SHA256 of `payload` under `secret`.
///
/// This is the signature producers must send; tests use it to build valid
/// headers.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a webhook signature against the raw request body.
///
/// # Arguments
///
/// * `secret` - The shared webhook secret, if configured.
/// * `signature` - The hex signature from the `X-Webhook-Signature` header,
///   if present.
/// * `payload` - The exact raw bytes of the request body.
///
/// # Errors
///
/// - [`SignatureError::MissingSignature`] - no signature was supplied
/// - [`SignatureError::SecretNotConfigured`] - the server has no secret
/// - [`SignatureError::InvalidSignature`] - decode failure, length mismatch,
///   or MAC mismatch
///
/// Comparison is constant-time; length is checked first and a mismatch is
/// reported as an invalid signature, never as a panic or a distinct error.
pub fn verify_signature(
    secret: Option<&str>,
    signature: Option<&str>,
    payload: &[u8],
) -> Result<(), SignatureError> {
    let signature = match signature {
        Some(sig) if !sig.is_empty() => sig,
        _ => return Err(SignatureError::MissingSignature),
    };

    let secret = secret.ok_or(SignatureError::SecretNotConfigured)?;

    let supplied = hex::decode(signature).map_err(|_| SignatureError::InvalidSignature)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    if supplied.len() != expected.len() {
        return Err(SignatureError::InvalidSignature);
    }

    if bool::from(supplied.ct_eq(&expected)) {
        Ok(())
    } else {
        Err(SignatureError::InvalidSignature)
    }
}
