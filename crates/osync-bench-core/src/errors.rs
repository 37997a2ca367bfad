//! Error taxonomy. Named structs for configuration/ledger failures (abort the run);
//! `InferenceError` classifies transport-level failures as retryable or not for `retry::retry`.

use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub struct ConfigError(pub String);

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}
impl std::error::Error for ConfigError {}

#[derive(Debug)]
pub struct LedgerError(pub String);

impl Display for LedgerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ledger error: {}", self.0)
    }
}
impl std::error::Error for LedgerError {}

/// Signals that the cancellation token fired. Checked first in the retry wrapper so it is
/// rethrown immediately and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl Display for Cancelled {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "run cancelled")
    }
}
impl std::error::Error for Cancelled {}

/// Transport/protocol-level error from the inference or registry client.
#[derive(Debug)]
pub enum InferenceError {
    /// 5xx, transport failure, timeout, or an empty payload. Retried by `retry::retry`.
    Transient(String),
    /// 4xx other than 404. Not retried.
    Client(u16, String),
    /// e.g. `logprobs` requested but the server returned an empty array. Not retried;
    /// aborts the variant with a user-visible remediation hint.
    Unsupported(String),
    /// 404, or a registry miss. Not retried, but distinct from `Client` so callers can
    /// treat it as "doesn't exist" rather than "server rejected request".
    NotFound(String),
}

impl InferenceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, InferenceError::Transient(_))
    }
}

impl Display for InferenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceError::Transient(msg) => write!(f, "transient error: {msg}"),
            InferenceError::Client(code, msg) => write!(f, "client error ({code}): {msg}"),
            InferenceError::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            InferenceError::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}
impl std::error::Error for InferenceError {}

/// A user-facing remediation-style error: a short message plus ordered fix steps.
/// Used for orchestrator-level aborts (missing variants, incompatible ledger) where a
/// plain `anyhow::Error` would lose the actionable hint.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: &'static str,
    pub message: String,
    pub fix_steps: Vec<String>,
}

impl Diagnostic {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fix_steps: Vec::new(),
        }
    }

    pub fn with_fix_step(mut self, step: impl Into<String>) -> Self {
        self.fix_steps.push(step.into());
        self
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "[{}] {}", self.code, self.message)?;
        for (i, step) in self.fix_steps.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, step)?;
        }
        Ok(())
    }
}
impl std::error::Error for Diagnostic {}

pub mod codes {
    pub const E_MISSING_VARIANTS: &str = "E_MISSING_VARIANTS";
    pub const E_LEDGER_MISMATCH: &str = "E_LEDGER_MISMATCH";
    pub const E_JUDGE_MISSING: &str = "E_JUDGE_MISSING";
    pub const E_LOGPROBS_UNSUPPORTED: &str = "E_LOGPROBS_UNSUPPORTED";
    pub const E_FAMILY_MISMATCH: &str = "E_FAMILY_MISMATCH";
}
