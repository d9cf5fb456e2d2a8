//! Error type for orchestrated requests.

use thiserror::Error;

/// Why an orchestrated request produced no response.
///
/// Classification and sanitization never fail; the only errors are the
/// transport's own and cancellation.
#[derive(Debug, Error)]
pub enum RecoveryError<E> {
    /// The caller cancelled while an attempt was in flight or before the
    /// retry was issued.
    #[error("request cancelled")]
    Cancelled,

    /// The transport failed; passed through untouched.
    #[error(transparent)]
    Transport(E),
}

impl<E> RecoveryError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RecoveryError::Cancelled)
    }
}
