#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Seethru Calibration
//!
//! User calibration for optical see-through eyewear. The user aligns an
//! on-screen shape with a physical target tracked by the eyewear camera; every
//! confirmed alignment becomes a [`CalibrationReading`]. From a handful of
//! readings the solver recovers, per eye, the camera-to-eye transform and the
//! projection matrix that make rendered content overlay the real world.
//!
//! ## Key Features
//!
//! - **Single-eye fit**: Levenberg-Marquardt over a seven parameter eye model
//! - **Stereo consistency**: graded agreement between and within the eyes
//! - **Device profiles**: per-device constants as data, loadable from JSON
//! - **Synthetic readings**: seeded simulation of a user for tests and demos
//!
//! ## Example: Single eye
//!
//! ```rust
//! use seethru_calib::{
//!     synthetic::{default_shape_schedule, SyntheticRig},
//!     CalibrationSession, DeviceProfile, Eye, EyeParameters, LengthUnit,
//! };
//!
//! let mut session = CalibrationSession::new(DeviceProfile::default())?;
//! // an 8x5 cm target, sizes given in metres
//! session.init(1920, 1080, 0.08, 0.05)?;
//! assert_eq!(session.config().map(|c| c.unit), Some(LengthUnit::Meters));
//!
//! let truth = EyeParameters {
//!     focal_scale: 1.0,
//!     principal_point: [0.0, 0.0],
//!     translation: [0.063, 0.0, 0.0],
//!     roll: 0.0,
//! };
//! let rig = SyntheticRig::new(&session, truth, truth)?;
//! let schedule = default_shape_schedule(
//!     5,
//!     session.get_min_scale_hint()?,
//!     session.get_max_scale_hint()?,
//! );
//! let readings = rig.readings(Eye::Left, &schedule)?;
//!
//! let fit = session.get_projection_matrix(&readings)?;
//! let t = fit.calibration.camera_to_eye_pose;
//! assert!((t[0][3] - 0.063).abs() < 1e-3);
//! # Ok::<(), seethru_calib::CalibrationError>(())
//! ```
//!
//! ## Example: Stereo with consistency grade
//!
//! ```rust
//! use seethru_calib::{
//!     synthetic::{default_shape_schedule, SyntheticRig},
//!     CalibrationSession, ConsistencyGrade, DeviceProfile, Eye,
//! };
//!
//! let mut session = CalibrationSession::new(DeviceProfile::default())?;
//! session.init(1280, 720, 80.0, 50.0)?;
//! let left = session.default_calibration(Eye::Left)?.parameters;
//! let right = session.default_calibration(Eye::Right)?.parameters;
//! let rig = SyntheticRig::new(&session, left, right)?;
//!
//! let schedule = default_shape_schedule(6, 0.2, 0.8);
//! let stereo = session.get_projection_matrices(
//!     &rig.readings(Eye::Left, &schedule)?,
//!     &rig.readings(Eye::Right, &schedule)?,
//! )?;
//! assert_eq!(stereo.grade, ConsistencyGrade::Good);
//! # Ok::<(), seethru_calib::CalibrationError>(())
//! ```

/// Grading of stereo calibrations by internal and cross-eye agreement.
pub mod consistency;

/// Error types for the calibration session.
pub mod error;

/// Eye model parameters and the rendering matrices built from them.
pub mod model;

/// Per-device constants and the device profile table.
pub mod profile;

/// Session lifecycle and the public calibration operations.
pub mod session;

/// Levenberg-Marquardt eye fit.
pub mod solver;

/// Simulated readings for tests, benchmarks and demos.
pub mod synthetic;

/// Readings, eyes, grades and viewports.
pub mod types;

pub use consistency::{
    ConsistencyMetrics, ConsistencyPolicy, EyeOutcome, EyeStatus, StereoCalibration,
};
pub use error::CalibrationError;
pub use model::{EyeCalibration, EyeIntrinsics, EyeParameters};
pub use profile::{DeviceProfile, DeviceProfileTable};
pub use session::{CalibrationSession, LengthUnit, SessionConfig, SessionState};
pub use solver::{EyeFit, FitReport, SolverParams, Termination};
pub use types::{CalibrationReading, ConsistencyGrade, Eye, Viewport};
