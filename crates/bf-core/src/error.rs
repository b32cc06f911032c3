//! Error types for binfit

use thiserror::Error;

/// binfit error type
///
/// Only construction-time and session-level failures are errors. Per-toy
/// numerical trouble (non-convergence, singular covariance, negative variances)
/// is reported through [`FitStatus`](crate::FitStatus) and the fit diagnostics.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Model configuration error (e.g. unsupported systematic kind)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The reference Hessian could not be used to build the whitening rotation
    #[error("Preconditioning error: {0}")]
    Preconditioning(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = Error::Configuration("Unsupported systematic type 'gmN'".into());
        assert_eq!(e.to_string(), "Configuration error: Unsupported systematic type 'gmN'");

        let e = Error::Preconditioning("singular".into());
        assert!(e.to_string().starts_with("Preconditioning error"));
    }

    #[test]
    fn test_json_error_converts() {
        let err: Result<serde_json::Value> = serde_json::from_str("{").map_err(Error::from);
        assert!(matches!(err, Err(Error::Json(_))));
    }
}
