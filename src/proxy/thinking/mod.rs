//! Thinking-signature resilience.
//!
//! Providers reject a request outright when a thinking block from an earlier
//! turn carries a signature they no longer accept. This module turns that
//! rejection into at most one corrected retry.
//!
//! # Architecture
//!
//! ```text
//!   SignatureRecovery ── Transport (trait)
//!      │     │     │
//!      │     │     └── classifier   (is it a signature error? where?)
//!      │     └──────── sanitize     (replace blocks with a placeholder)
//!      └────────────── blacklist    (session → rejected signatures, TTL)
//!                        ▲
//!                     session       (first user turn → session key)
//!
//!   fallback: non-streaming response → synthetic provider stream
//! ```

mod blacklist;
mod classifier;
mod context;
mod error;
mod fallback;
mod recovery;
mod sanitize;
mod session;
mod traits;

pub use blacklist::{SignatureBlacklist, INVALID_SIGNATURE_TTL, SWEEP_INTERVAL};
pub use classifier::{
    extract_coordinate, extract_error_message, is_signature_error, is_signature_error_text,
    Coordinate,
};
pub use context::{RecoveryOutcome, RecoveryReport, SanitizeResult};
pub use error::RecoveryError;
pub use fallback::{
    build_final_only_stream, clone_request_without_stream, is_stream_request,
    should_fallback_to_non_stream, StreamFormat,
};
pub use recovery::{Recovered, RecoveringTransport, SignatureRecovery};
pub use sanitize::{
    is_placeholder_block, placeholder_block, signature_at, strip_all_thinking,
    strip_blacklisted_thinking, THINKING_PLACEHOLDER,
};
pub use session::derive_session_id;
pub use traits::{ByteStream, Transport, UpstreamBody, UpstreamResponse};
