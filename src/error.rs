//! Error types for pitchtrack.

use thiserror::Error;

/// Result type alias using pitchtrack's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during pitch extraction.
///
/// Internal invariant violations (an NCCF outside its mathematical bounds,
/// a NaN in the forward cost) are bugs in this crate, not caller errors;
/// they fail fatally through assertions rather than appearing here.
#[derive(Error, Debug)]
pub enum Error {
    /// Impossible option combination, detected at construction.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The caller broke the streaming contract (wrong sample rate,
    /// accepting waveform after the input was finished, or reading a frame
    /// that is not ready).
    #[error("Usage violation: {0}")]
    UsageViolation(String),
}
