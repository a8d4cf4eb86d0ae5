//! Calibration session: configuration lifecycle and the public operations.

use serde::{Deserialize, Serialize};

use crate::consistency::{self, ConsistencyPolicy, StereoCalibration};
use crate::error::CalibrationError;
use crate::model::{DisplayModel, EyeCalibration};
use crate::profile::DeviceProfile;
use crate::solver::{self, EyeFit, SolverParams};
use crate::types::{CalibrationReading, Eye, Viewport};

/// Length unit of target sizes, target poses and recovered translations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LengthUnit {
    /// Millimetres.
    Millimeters,
    /// Metres.
    Meters,
}

impl LengthUnit {
    /// Guess the unit from the physical target size.
    ///
    /// A printed target below one millimetre on both sides is implausible, so
    /// sizes below 1.0 are taken to be metres.
    pub fn infer(target_width: f64, target_height: f64) -> Self {
        if target_width < 1.0 && target_height < 1.0 {
            LengthUnit::Meters
        } else {
            LengthUnit::Millimeters
        }
    }

    /// Express a length given in millimetres in this unit.
    pub fn convert_millimeters(self, mm: f64) -> f64 {
        match self {
            LengthUnit::Millimeters => mm,
            LengthUnit::Meters => mm * 1e-3,
        }
    }
}

/// Surface and target configuration of an initialized session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Rendering surface width in pixels.
    pub surface_width: usize,
    /// Rendering surface height in pixels.
    pub surface_height: usize,
    /// Physical target width.
    pub target_width: f64,
    /// Physical target height.
    pub target_height: f64,
    /// Unit of the target size and of every pose.
    pub unit: LengthUnit,
}

impl SessionConfig {
    /// Surface width over height.
    pub fn display_aspect(&self) -> f64 {
        self.surface_width as f64 / self.surface_height as f64
    }

    /// Target width over height.
    pub fn target_aspect(&self) -> f64 {
        self.target_width / self.target_height
    }

    fn validate(&self) -> Result<(), CalibrationError> {
        if self.surface_width == 0 || self.surface_height == 0 {
            return Err(CalibrationError::InvalidConfiguration(format!(
                "surface size must be positive, got {}x{}",
                self.surface_width, self.surface_height
            )));
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !(positive(self.target_width) && positive(self.target_height)) {
            return Err(CalibrationError::InvalidConfiguration(format!(
                "target size must be finite and positive, got {}x{}",
                self.target_width, self.target_height
            )));
        }
        Ok(())
    }
}

/// Lifecycle state of a [`CalibrationSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// `init` has not succeeded yet.
    Uninitialized,
    /// Configured; hints and fits are available.
    Ready,
}

#[derive(Debug, Clone)]
struct Ready {
    config: SessionConfig,
    model: DisplayModel,
}

/// A user calibration session for one device.
///
/// The session is configured once through [`CalibrationSession::init`]; every
/// other operation fails with [`CalibrationError::NotInitialized`] before that.
/// Fits take `&self` and keep no state between calls.
///
/// # Example
///
/// ```
/// use seethru_calib::{CalibrationSession, DeviceProfile, SessionState};
///
/// let mut session = CalibrationSession::new(DeviceProfile::default())?;
/// assert_eq!(session.state(), SessionState::Uninitialized);
///
/// session.init(1920, 1080, 80.0, 50.0)?;
/// let min = session.get_min_scale_hint()?;
/// let max = session.get_max_scale_hint()?;
/// assert!(0.0 <= min && min <= max && max <= 1.0);
/// # Ok::<(), seethru_calib::CalibrationError>(())
/// ```
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    profile: DeviceProfile,
    solver: SolverParams,
    policy: ConsistencyPolicy,
    ready: Option<Ready>,
}

impl CalibrationSession {
    /// Create an uninitialized session for a device.
    pub fn new(profile: DeviceProfile) -> Result<Self, CalibrationError> {
        profile.validate()?;
        Ok(Self {
            profile,
            solver: SolverParams::default(),
            policy: ConsistencyPolicy::default(),
            ready: None,
        })
    }

    /// Replace the solver parameters.
    pub fn with_solver_params(mut self, params: SolverParams) -> Result<Self, CalibrationError> {
        params.validate()?;
        self.solver = params;
        Ok(self)
    }

    /// Replace the consistency policy.
    pub fn with_consistency_policy(
        mut self,
        policy: ConsistencyPolicy,
    ) -> Result<Self, CalibrationError> {
        policy.validate()?;
        self.policy = policy;
        Ok(self)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        match self.ready {
            Some(_) => SessionState::Ready,
            None => SessionState::Uninitialized,
        }
    }

    /// The device profile.
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// The solver parameters.
    pub fn solver_params(&self) -> &SolverParams {
        &self.solver
    }

    /// The consistency policy.
    pub fn consistency_policy(&self) -> &ConsistencyPolicy {
        &self.policy
    }

    /// The configuration given to `init`, once initialized.
    pub fn config(&self) -> Option<&SessionConfig> {
        self.ready.as_ref().map(|r| &r.config)
    }

    /// Configure the session with the surface size in pixels and the physical
    /// target size. The length unit is inferred from the target size.
    pub fn init(
        &mut self,
        surface_width: usize,
        surface_height: usize,
        target_width: f64,
        target_height: f64,
    ) -> Result<(), CalibrationError> {
        let unit = LengthUnit::infer(target_width, target_height);
        self.init_with_unit(surface_width, surface_height, target_width, target_height, unit)
    }

    /// Like [`CalibrationSession::init`] with an explicit length unit.
    pub fn init_with_unit(
        &mut self,
        surface_width: usize,
        surface_height: usize,
        target_width: f64,
        target_height: f64,
        unit: LengthUnit,
    ) -> Result<(), CalibrationError> {
        if self.ready.is_some() {
            return Err(CalibrationError::AlreadyInitialized);
        }
        let config = SessionConfig {
            surface_width,
            surface_height,
            target_width,
            target_height,
            unit,
        };
        config.validate()?;

        log::info!(
            "calibration session ready: device {}, surface {}x{}, target {}x{} {:?}",
            self.profile.id,
            surface_width,
            surface_height,
            target_width,
            target_height,
            unit
        );

        let model = DisplayModel::new(&config, &self.profile);
        self.ready = Some(Ready { config, model });
        Ok(())
    }

    fn ready(&self) -> Result<&Ready, CalibrationError> {
        self.ready.as_ref().ok_or(CalibrationError::NotInitialized)
    }

    pub(crate) fn model(&self) -> Result<&DisplayModel, CalibrationError> {
        Ok(&self.ready()?.model)
    }

    /// Smallest practical shape scale for this device.
    pub fn get_min_scale_hint(&self) -> Result<f64, CalibrationError> {
        self.ready()?;
        Ok(self.profile.min_scale_hint)
    }

    /// Largest shape scale before display-edge effects dominate.
    pub fn get_max_scale_hint(&self) -> Result<f64, CalibrationError> {
        self.ready()?;
        Ok(self.profile.max_scale_hint)
    }

    /// Horizontal over vertical half extent, in NDC, of a shape that looks like
    /// the target on a `width` x `height` pixel surface.
    pub fn get_drawing_aspect_ratio(
        &self,
        width: usize,
        height: usize,
    ) -> Result<f64, CalibrationError> {
        let ready = self.ready()?;
        if width == 0 || height == 0 {
            return Err(CalibrationError::InvalidConfiguration(format!(
                "drawing surface must be positive, got {width}x{height}"
            )));
        }
        Ok(ready.config.target_aspect() / self.profile.aspect_correction * height as f64
            / width as f64)
    }

    /// Whether the device renders stereo into one horizontally joined surface.
    pub fn is_stereo_stretched(&self) -> Result<bool, CalibrationError> {
        self.ready()?;
        Ok(self.profile.stereo_stretched)
    }

    /// Pixel rectangle an eye renders into.
    pub fn eye_viewport(&self, eye: Eye) -> Result<Viewport, CalibrationError> {
        let config = &self.ready()?.config;
        let (w, h) = (config.surface_width, config.surface_height);
        if !self.profile.stereo_stretched {
            return Ok(Viewport {
                x: 0,
                y: 0,
                width: w,
                height: h,
            });
        }
        let half = w / 2;
        Ok(match eye {
            Eye::Left => Viewport {
                x: 0,
                y: 0,
                width: half,
                height: h,
            },
            Eye::Right => Viewport {
                x: half,
                y: 0,
                width: w - half,
                height: h,
            },
        })
    }

    /// The manufacturer calibration of an eye.
    pub fn default_calibration(&self, eye: Eye) -> Result<EyeCalibration, CalibrationError> {
        let model = &self.ready()?.model;
        Ok(model.calibration(eye, model.default_parameters(eye)))
    }

    /// Fit one eye to its readings.
    ///
    /// All readings must belong to the same eye.
    pub fn get_projection_matrix(
        &self,
        readings: &[CalibrationReading],
    ) -> Result<EyeFit, CalibrationError> {
        let ready = self.ready()?;
        solver::fit_eye(&ready.model, readings, None, &self.solver)
    }

    /// Fit both eyes and grade how consistent the pair is.
    ///
    /// Only fails when the session is not initialized. When either eye cannot
    /// be fitted the grade is `None` and both eyes get their default
    /// calibration; [`StereoCalibration`] records what happened to each eye.
    pub fn get_projection_matrices(
        &self,
        left: &[CalibrationReading],
        right: &[CalibrationReading],
    ) -> Result<StereoCalibration, CalibrationError> {
        let ready = self.ready()?;
        Ok(consistency::evaluate_stereo(
            &ready.model,
            left,
            right,
            &self.solver,
            &self.policy,
        ))
    }
}
