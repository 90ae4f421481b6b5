// =============================================================================
// Error taxonomy
// =============================================================================
//
//   InvalidInput:        price series failed validation; no bundle produced
//   InsufficientHistory: one statistic lacks samples; callers degrade locally
//   Configuration:       malformed weights / parameters
//   Persistence:         hysteresis memory unreadable or unwritable
//   DataUnavailable:     the price collaborator could not supply a series

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegimeError {
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("insufficient history for {statistic}: need {required}, have {actual}")]
    InsufficientHistory {
        statistic: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("data unavailable: {0}")]
    DataUnavailable(String),
}

impl RegimeError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn insufficient(statistic: &'static str, required: usize, actual: usize) -> Self {
        Self::InsufficientHistory {
            statistic,
            required,
            actual,
        }
    }
}

pub type Result<T> = std::result::Result<T, RegimeError>;
