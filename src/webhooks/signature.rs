//! Webhook signature verification using HMAC-SHA256.
//!
//! GitHub signs each delivery with HMAC-SHA256 over the raw body using the
//! app's shared webhook secret, sent as `X-Hub-Signature-256: sha256=<hex>`.
//! Verification is the gate in front of everything else: a payload is never
//! parsed, logged, or enqueued until its signature checks out.
//!
//! Malformed headers (missing prefix, bad hex) verify as invalid rather than
//! raising a distinct error, so the rejection path is uniform regardless of
//! why the header is unusable.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Parses a `sha256=<hex>` signature header into raw bytes.
///
/// Returns `None` for malformed headers (missing prefix, wrong algorithm,
/// invalid hex). Never panics.
///
/// # Examples
///
/// ```
/// use workflow_router::webhooks::parse_signature_header;
///
/// assert!(parse_signature_header("sha256=abcd1234").is_some());
/// assert!(parse_signature_header("abcd1234").is_none());
/// assert!(parse_signature_header("sha1=abcd1234").is_none());
/// assert!(parse_signature_header("sha256=xyz").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix("sha256=")?;
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA256 signature of a payload under the given secret.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a raw signature as a `sha256=<hex>` header value.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

/// Verifies a webhook signature against the payload and secret.
///
/// Returns `true` only for a well-formed header whose decoded signature
/// matches the payload's HMAC-SHA256 under `secret`. The comparison is
/// constant-time via the HMAC library's own verify path; neither the secret
/// nor the computed digest is ever surfaced on failure.
///
/// # Examples
///
/// ```
/// use workflow_router::webhooks::{compute_signature, format_signature_header, verify_signature};
///
/// let payload = b"{\"action\":\"requested\"}";
/// let secret = b"shared-secret";
/// let header = format_signature_header(&compute_signature(payload, secret));
///
/// assert!(verify_signature(payload, &header, secret));
/// assert!(!verify_signature(payload, &header, b"other-secret"));
/// ```
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let claimed = match parse_signature_header(signature_header) {
        Some(sig) => sig,
        None => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    // Constant-time comparison via the HMAC library
    mac.verify_slice(&claimed).is_ok()
}
