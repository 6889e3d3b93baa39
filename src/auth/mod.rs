//! Request authentication for signed endpoints.

pub mod middleware;
pub mod signature;

pub use middleware::require_signature;
pub use signature::{
    SIGNATURE_HEADER, authenticate, compute_signature, format_signature_header,
    parse_signature_header, validate_signature,
};
