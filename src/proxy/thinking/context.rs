//! Result and report types for sanitization and recovery.

/// Result of a sanitization pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SanitizeResult {
    /// Whether the payload was modified
    pub changed: bool,
    /// Number of thinking blocks replaced by the placeholder
    pub replaced: u32,
}

impl SanitizeResult {
    /// Create a result indicating no changes were made.
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn from_count(replaced: u32) -> Self {
        Self {
            changed: replaced > 0,
            replaced,
        }
    }
}

/// How the final response of an orchestrated request was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The first attempt's response was returned as-is.
    FirstAttempt,
    /// The rejected signature was blacklisted and only blacklisted blocks
    /// were replaced before the retry.
    RetriedSelective,
    /// No usable coordinate: every thinking block was replaced before the
    /// retry.
    RetriedFullStrip,
}

impl RecoveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryOutcome::FirstAttempt => "first_attempt",
            RecoveryOutcome::RetriedSelective => "retried_selective",
            RecoveryOutcome::RetriedFullStrip => "retried_full_strip",
        }
    }

    /// Whether a second upstream call was made.
    pub fn retried(&self) -> bool {
        !matches!(self, RecoveryOutcome::FirstAttempt)
    }
}

impl std::fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the orchestrator did for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Derived session key; empty when tracking was disabled.
    pub session_id: String,
    /// Whether already-blacklisted signatures were replaced before the
    /// first attempt.
    pub pre_sanitized: bool,
    pub outcome: RecoveryOutcome,
    /// Whether a signature was written to the blacklist.
    pub signature_recorded: bool,
}

impl RecoveryReport {
    pub(crate) fn new(session_id: String, pre_sanitized: bool) -> Self {
        Self {
            session_id,
            pre_sanitized,
            outcome: RecoveryOutcome::FirstAttempt,
            signature_recorded: false,
        }
    }
}
