//! Webhook signature verification using HMAC-SHA256.
//!
//! Senders sign the raw request body with a shared secret and send the
//! digest in the `x-webhook-signature` header as `sha256=<hex>`. Any other
//! header shape fails closed, and so does a deployment with no secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Required prefix of the signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Computes the hex-encoded HMAC-SHA256 of `body` keyed with `secret`.
///
/// # Panics
///
/// Never: HMAC accepts keys of any length.
#[allow(clippy::expect_used)]
#[must_use]
pub fn compute_signature(body: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Formats a hex digest as a header value, `sha256=<hex>`.
#[must_use]
pub fn format_signature_header(hex_digest: &str) -> String {
    format!("{SIGNATURE_PREFIX}{hex_digest}")
}

/// Parses a `sha256=<hex>` header into raw digest bytes.
///
/// Returns `None` for a missing or different prefix and for invalid hex.
///
/// # Examples
///
/// ```
/// use lifelog_gateway::auth::parse_signature_header;
///
/// assert!(parse_signature_header("sha256=abcd1234").is_some());
/// assert!(parse_signature_header("abcd1234").is_none());
/// assert!(parse_signature_header("sha1=abcd1234").is_none());
/// assert!(parse_signature_header("sha256=xyz").is_none());
/// ```
#[must_use]
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix(SIGNATURE_PREFIX)?;
    hex::decode(hex_sig).ok()
}

/// Verifies `signature_header` against `body` and `secret`.
///
/// The digest comparison is constant-time.
///
/// # Examples
///
/// ```
/// use lifelog_gateway::auth::{compute_signature, format_signature_header, validate_signature};
///
/// let body = br#"{"type":"ping","source":"test","payload":{}}"#;
/// let header = format_signature_header(&compute_signature(body, b"s3cret"));
///
/// assert!(validate_signature(body, &header, b"s3cret"));
/// assert!(!validate_signature(body, &header, b"rotated"));
/// ```
#[must_use]
pub fn validate_signature(body: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(provided) = parse_signature_header(signature_header) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&provided).is_ok()
}

/// Applies the deployment policy around [`validate_signature`].
///
/// # Errors
///
/// - [`AuthError::SecretNotConfigured`] when `secret` is `None`; the
///   request is rejected whatever it carries.
/// - [`AuthError::MissingSignature`] when no header was sent.
/// - [`AuthError::InvalidSignature`] when the header does not verify.
pub fn authenticate(
    body: &[u8],
    signature_header: Option<&str>,
    secret: Option<&[u8]>,
) -> Result<(), AuthError> {
    let secret = secret.ok_or(AuthError::SecretNotConfigured)?;
    let header = signature_header.ok_or(AuthError::MissingSignature)?;
    if validate_signature(body, header, secret) {
        Ok(())
    } else {
        Err(AuthError::InvalidSignature)
    }
}
