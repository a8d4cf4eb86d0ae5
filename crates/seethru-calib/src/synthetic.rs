//! Synthetic alignment readings from a known eye model.
//!
//! The rig places the target fronto-parallel to the eye at exactly the pose
//! where it covers a requested shape, then reports that pose in the camera
//! frame, the way a tracker would when a perfect user confirms the alignment.
//! Recorded shapes can then be perturbed with seeded Gaussian noise.

use glam::DVec3;
use rand::Rng;
use seethru_lie::SE3;
use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;
use crate::model::{DisplayModel, EyeParameters};
use crate::session::CalibrationSession;
use crate::types::{CalibrationReading, Eye};

/// Shape centres visited by [`default_shape_schedule`], as fractions of the
/// room left around a shape.
const CENTER_PATTERN: [[f64; 2]; 5] = [
    [0.0, 0.0],
    [0.3, -0.2],
    [-0.3, 0.2],
    [0.25, 0.25],
    [-0.25, -0.25],
];

/// Smallest recorded shape scale after noise.
const MIN_NOISY_SCALE: f64 = 1e-3;

/// One shape shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapeSample {
    /// Horizontal half extent in NDC.
    pub scale: f64,
    /// Centre in NDC.
    pub center: [f64; 2],
}

/// Standard deviations of the user's alignment error, in NDC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NoiseModel {
    /// Noise on the recorded shape scale.
    pub scale_sigma: f64,
    /// Noise on each coordinate of the recorded shape centre.
    pub center_sigma: f64,
}

impl NoiseModel {
    /// The same standard deviation on scale and centre.
    pub fn uniform(sigma: f64) -> Self {
        Self {
            scale_sigma: sigma,
            center_sigma: sigma,
        }
    }
}

/// `count` shapes with scales spread evenly over `[min_scale, max_scale]`
/// and centres cycling through a fixed pattern.
pub fn default_shape_schedule(count: usize, min_scale: f64, max_scale: f64) -> Vec<ShapeSample> {
    (0..count)
        .map(|i| {
            let t = if count > 1 {
                i as f64 / (count - 1) as f64
            } else {
                0.0
            };
            let scale = min_scale + (max_scale - min_scale) * t;
            let room = 1.0 - scale;
            let [cx, cy] = CENTER_PATTERN[i % CENTER_PATTERN.len()];
            ShapeSample {
                scale,
                center: [cx * room, cy * room],
            }
        })
        .collect()
}

/// Standard normal sample by the Box-Muller transform.
fn standard_normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// A simulated device with known eye models.
#[derive(Debug, Clone)]
pub struct SyntheticRig {
    model: DisplayModel,
    left: EyeParameters,
    right: EyeParameters,
}

impl SyntheticRig {
    /// Create a rig for an initialized session with the given true eye models.
    pub fn new(
        session: &CalibrationSession,
        left: EyeParameters,
        right: EyeParameters,
    ) -> Result<Self, CalibrationError> {
        let model = session.model()?.clone();
        for (eye, p) in [(Eye::Left, &left), (Eye::Right, &right)] {
            if !p.is_finite() || p.focal_scale <= 0.0 {
                return Err(CalibrationError::InvalidConfiguration(format!(
                    "{eye:?} eye parameters must be finite with a positive focal scale"
                )));
            }
        }
        Ok(Self { model, left, right })
    }

    /// The true model of an eye.
    pub fn truth(&self, eye: Eye) -> &EyeParameters {
        match eye {
            Eye::Left => &self.left,
            Eye::Right => &self.right,
        }
    }

    /// The noise-free reading for a shape at `scale` around `center`.
    pub fn reading(
        &self,
        eye: Eye,
        scale: f64,
        center: [f64; 2],
    ) -> Result<CalibrationReading, CalibrationError> {
        if !(scale.is_finite() && scale > 0.0 && scale <= 1.0) {
            return Err(CalibrationError::InvalidConfiguration(format!(
                "shape scale {scale} outside (0, 1]"
            )));
        }
        if !center.iter().all(|c| c.is_finite()) {
            return Err(CalibrationError::InvalidConfiguration(
                "non-finite shape center".to_string(),
            ));
        }

        let p = self.truth(eye);
        let fx = p.focal_scale * self.model.fx0;
        let fy = p.focal_scale * self.model.fy0;
        let [px, py] = p.principal_point;

        // depth at which the target half width projects onto the shape half width
        let z = fx * self.model.target_half[0] / scale;
        let eye_from_target = SE3::from_translation(DVec3::new(
            (center[0] - px) * z / fx,
            (center[1] - py) * z / fy,
            z,
        ));
        let camera_from_target = p.camera_to_eye().inverse() * eye_from_target;

        Ok(
            CalibrationReading::new(eye, camera_from_target.to_matrix34(), scale)
                .with_center(center),
        )
    }

    /// Readings for a schedule of shapes, with the recorded shapes perturbed
    /// by Gaussian noise drawn from `rng`.
    ///
    /// The draws do not depend on the noise levels, so the same seed gives the
    /// same perturbation pattern scaled by the standard deviations.
    pub fn noisy_readings(
        &self,
        eye: Eye,
        schedule: &[ShapeSample],
        noise: &NoiseModel,
        rng: &mut impl Rng,
    ) -> Result<Vec<CalibrationReading>, CalibrationError> {
        schedule
            .iter()
            .map(|sample| {
                let mut reading = self.reading(eye, sample.scale, sample.center)?;
                let [ns, nx, ny] = [
                    standard_normal(rng),
                    standard_normal(rng),
                    standard_normal(rng),
                ];
                reading.shape_scale =
                    (reading.shape_scale + noise.scale_sigma * ns).clamp(MIN_NOISY_SCALE, 1.0);
                reading.shape_center[0] += noise.center_sigma * nx;
                reading.shape_center[1] += noise.center_sigma * ny;
                Ok(reading)
            })
            .collect()
    }

    /// Noise-free readings for a schedule of shapes.
    pub fn readings(
        &self,
        eye: Eye,
        schedule: &[ShapeSample],
    ) -> Result<Vec<CalibrationReading>, CalibrationError> {
        schedule
            .iter()
            .map(|s| self.reading(eye, s.scale, s.center))
            .collect()
    }
}
