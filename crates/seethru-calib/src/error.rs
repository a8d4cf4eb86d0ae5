//! Error taxonomy of the calibration session.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for eyewear user calibration.
///
/// Every variant is recoverable: a calibration flow reacts by asking the user
/// for more or better readings, or by fixing its configuration.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum CalibrationError {
    /// An operation was requested before a successful `init`.
    #[error("calibration session is not initialized")]
    NotInitialized,

    /// `init` was called on a session that is already initialized.
    #[error("calibration session is already initialized")]
    AlreadyInitialized,

    /// Non-positive, non-finite or otherwise unusable configuration values.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Too few readings to constrain the eye model.
    #[error("calibration requires at least {required} readings, got {actual}")]
    InsufficientData {
        /// Minimum number of readings required by the solver
        required: usize,
        /// Number of readings provided
        actual: usize,
    },

    /// The readings are too similar to determine every eye parameter.
    #[error("readings do not constrain the eye model (reciprocal condition {reciprocal_condition:.3e})")]
    IllConditioned {
        /// Reciprocal condition number of the normalized normal equations,
        /// zero when the target poses themselves are indistinguishable. A
        /// regular value means a parameter's standard error exceeded its limit.
        reciprocal_condition: f64,
    },

    /// The iterative solver produced non-finite values or did not converge.
    #[error("solver diverged: {0}")]
    SolverDivergence(String),

    /// A reading is malformed or belongs to the wrong eye.
    #[error("invalid reading {index}: {reason}")]
    InvalidReading {
        /// Position of the reading in the supplied slice
        index: usize,
        /// Why the reading was rejected
        reason: String,
    },
}
