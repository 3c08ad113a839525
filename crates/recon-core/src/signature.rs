//! GitHub webhook signature verification (`X-Hub-Signature-256`).
//!
//! Verification is opt-in: with an empty secret every payload is accepted. That keeps local
//! development with smee.io forwarding working out of the box, but it also means an
//! unconfigured deployment accepts unauthenticated webhooks. Set `GITHUB_WEBHOOK_SECRET`
//! anywhere the webhook endpoint is reachable by others.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// `sha256=` + lowercase hex HMAC-SHA256 of `body` keyed by `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(body);
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

/// True when `signature_header` authenticates `raw_body` under `secret`.
///
/// An empty `secret` disables checking and always returns true.
pub fn verify(secret: &str, raw_body: &[u8], signature_header: Option<&str>) -> bool {
    if secret.is_empty() {
        return true;
    }
    let Some(header) = signature_header else {
        return false;
    };
    if !header.starts_with(SIGNATURE_PREFIX) {
        return false;
    }
    let expected = sign(secret, raw_body);
    // ct_eq on slices of different length returns false without comparing contents.
    bool::from(expected.as_bytes().ct_eq(header.as_bytes()))
}
