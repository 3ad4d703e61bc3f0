//! HMAC-SHA256 signatures on webhook deliveries.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{WebhookError, WebhookResult};

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

/// Computes the hex-encoded HMAC-SHA256 of `payload` under `secret`.
///
/// # Panics
///
/// Never in practice: HMAC keys may have any length.
#[must_use]
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a delivery signature against the raw request body.
///
/// `header` is the hex digest, optionally prefixed with `sha256=`. The
/// comparison runs in constant time; malformed hex never matches.
#[must_use]
pub fn verify_signature(secret: &str, payload: &[u8], header: &str) -> bool {
    let digest = header.trim();
    let digest = digest.strip_prefix(PREFIX).unwrap_or(digest);
    let Ok(expected) = hex::decode(digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Like [`verify_signature`], but reports a mismatch as an error.
///
/// # Errors
///
/// Returns [`WebhookError::InvalidSignature`] when the signature does not
/// match.
pub fn check_signature(secret: &str, payload: &[u8], header: &str) -> WebhookResult<()> {
    if verify_signature(secret, payload, header) {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature)
    }
}
