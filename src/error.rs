//! # Planner Errors
//!
//! Every entry point returns [`PlannerError`]. Only `InvalidInput` ever
//! reaches a caller of the forecast and port stages; upstream failures are
//! absorbed there and degrade to estimates or high-risk verdicts.

use thiserror::Error;

/// Errors raised by the weather-routing pipeline.
///
/// The enum is `Clone` because one failed upstream fetch is shared by every
/// position that waited on the same coordinate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlannerError {
    /// Malformed or out-of-range request. Fatal, never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Transient provider failure (network, timeout, HTTP 5xx/429)
    #[error("forecast provider unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Provider answered with a shape that cannot be used
    #[error("unusable forecast response: {0}")]
    StructuralResponse(String),
}

impl PlannerError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        PlannerError::InvalidInput(msg.into())
    }

    /// Only transient upstream failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlannerError::UpstreamUnavailable(_))
    }
}

impl From<reqwest::Error> for PlannerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return PlannerError::StructuralResponse(err.to_string());
        }
        if let Some(status) = err.status() {
            if status.is_client_error() && status.as_u16() != 429 {
                return PlannerError::StructuralResponse(format!("HTTP {status}"));
            }
        }
        PlannerError::UpstreamUnavailable(err.to_string())
    }
}
