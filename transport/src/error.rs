//! Typed errors shared across the transport core.
//!
//! Production code paths stay fatal-by-default (`assert!`/`panic!`) the way
//! the original does; these types exist so a test harness can observe the
//! same failures as values instead of aborting the process.

use thiserror::Error;

/// A single error currency for every fallible core operation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("timing violation: {0}")]
    TimingViolation(String),

    #[error("backpressure violation: {0}")]
    BackpressureViolation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// How a producer-side enqueue failure is handled.
///
/// `Fatal` preserves the original's assert-and-abort contract: a silent drop
/// must never corrupt a sequence the consumer assumes is complete. `Discard`
/// is available for call sites that can tolerate loss (diagnostics, best-
/// effort telemetry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnqueuePolicy {
    #[default]
    Fatal,
    Discard,
}

impl EnqueuePolicy {
    /// Applies this policy to a failed enqueue attempt.
    ///
    /// Returns `Ok(())` if the failure should be treated as a no-op (discard
    /// policy); returns the error otherwise, for the caller to propagate,
    /// assert on, or panic on as fits the call site.
    pub fn handle(self, err: TransportError) -> Result<()> {
        match self {
            EnqueuePolicy::Fatal => Err(err),
            EnqueuePolicy::Discard => Ok(()),
        }
    }
}
