//! Error types for the fusion pipeline
//!
//! Pure computational components (the Earth model, the error-state model)
//! either return a mathematically valid result or a precise error for
//! out-of-domain input; they never catch. The integration loop wraps any
//! component failure with the step index and timestamp at which it occurred
//! and halts the run. A failure in this deterministic offline pipeline
//! indicates a modeling or data defect, not a transient fault, so there is no
//! retry path anywhere.

use thiserror::Error;

/// Errors surfaced by the navigation core.
#[derive(Debug, Error)]
pub enum NavError {
    /// Inconsistent or invalid configuration (noise PSDs, correlation times,
    /// model-shape mismatches).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An input range cannot satisfy the requested operation, e.g. the
    /// Allan-variance curve cannot bracket the 1 s time constant.
    #[error("range error: {0}")]
    Range(String),

    /// A matrix that must be invertible is singular or near-singular, or a
    /// geometric quantity was evaluated at a pole. Indicates filter
    /// divergence or a degenerate measurement and must not be ignored.
    #[error("singular {what}")]
    Singularity { what: String },

    /// The covariance lost positive semi-definiteness after an update,
    /// signaling filter instability.
    #[error("covariance not positive semi-definite (min eigenvalue {min_eigenvalue:e})")]
    Divergence { min_eigenvalue: f64 },

    /// A component error annotated with the failing step of the integration
    /// loop.
    #[error("step {step} (t = {elapsed_s:.3} s): {source}")]
    AtStep {
        step: usize,
        elapsed_s: f64,
        #[source]
        source: Box<NavError>,
    },

    /// Record I/O failure while loading or writing time series.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parse failure while loading a time series.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl NavError {
    /// Attach the integration-loop step index and timestamp to an error.
    pub fn at_step(self, step: usize, elapsed_s: f64) -> NavError {
        NavError::AtStep {
            step,
            elapsed_s,
            source: Box::new(self),
        }
    }
}
