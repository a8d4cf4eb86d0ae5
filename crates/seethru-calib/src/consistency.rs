//! Stereo consistency evaluation.
//!
//! Both eyes are fitted independently and the fits are graded by how well
//! they agree with their own readings, with halves of their own readings, and
//! with each other. Every signal is a multiple of a tolerance from the
//! [`ConsistencyPolicy`]; the worst one decides the grade.

use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;
use crate::model::{DisplayModel, EyeCalibration, EyeParameters};
use crate::solver::{self, FitReport, Observation, SolverParams};
use crate::types::{CalibrationReading, ConsistencyGrade, Eye};

/// Tolerances and grade thresholds of the consistency evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyPolicy {
    /// Expected alignment error of a careful user, in NDC.
    pub alignment_noise_ndc: f64,
    /// Tolerated focal scale difference between the eyes.
    pub focal_scale_tolerance: f64,
    /// Tolerated principal point asymmetry between the eyes, in NDC.
    pub principal_point_tolerance: f64,
    /// Tolerated eye height and depth difference, in millimeters.
    pub translation_tolerance_mm: f64,
    /// Tolerated roll asymmetry, in degrees.
    pub roll_tolerance_deg: f64,
    /// Largest score graded [`ConsistencyGrade::Good`].
    pub good_max: f64,
    /// Largest score graded [`ConsistencyGrade::Ok`].
    pub ok_max: f64,
    /// Largest score graded [`ConsistencyGrade::Bad`]; anything above is `VeryBad`.
    pub bad_max: f64,
}

impl Default for ConsistencyPolicy {
    fn default() -> Self {
        Self {
            alignment_noise_ndc: 0.01,
            focal_scale_tolerance: 0.02,
            principal_point_tolerance: 0.02,
            translation_tolerance_mm: 3.0,
            roll_tolerance_deg: 1.0,
            good_max: 1.5,
            ok_max: 3.0,
            bad_max: 6.0,
        }
    }
}

impl ConsistencyPolicy {
    /// Check that tolerances are positive and thresholds increasing.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        let tolerances = [
            self.alignment_noise_ndc,
            self.focal_scale_tolerance,
            self.principal_point_tolerance,
            self.translation_tolerance_mm,
            self.roll_tolerance_deg,
        ];
        if tolerances.iter().any(|t| !(t.is_finite() && *t > 0.0)) {
            return Err(CalibrationError::InvalidConfiguration(
                "consistency tolerances must be finite and positive".to_string(),
            ));
        }
        if !(self.good_max > 0.0 && self.good_max < self.ok_max && self.ok_max < self.bad_max)
            || !self.bad_max.is_finite()
        {
            return Err(CalibrationError::InvalidConfiguration(
                "grade thresholds must satisfy 0 < good_max < ok_max < bad_max".to_string(),
            ));
        }
        Ok(())
    }

    /// Grade a combined score. Non-finite scores are graded `VeryBad`.
    pub fn grade(&self, score: f64) -> ConsistencyGrade {
        if !score.is_finite() {
            ConsistencyGrade::VeryBad
        } else if score <= self.good_max {
            ConsistencyGrade::Good
        } else if score <= self.ok_max {
            ConsistencyGrade::Ok
        } else if score <= self.bad_max {
            ConsistencyGrade::Bad
        } else {
            ConsistencyGrade::VeryBad
        }
    }
}

/// The signals behind a consistency grade, each in multiples of its tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyMetrics {
    /// Left eye fit residual over the expected alignment noise.
    pub left_residual: f64,
    /// Right eye fit residual over the expected alignment noise.
    pub right_residual: f64,
    /// Disagreement between fits of the even and odd left readings, when available.
    pub left_split_half: Option<f64>,
    /// Disagreement between fits of the even and odd right readings, when available.
    pub right_split_half: Option<f64>,
    /// Mirror asymmetry between the two eye models.
    pub symmetry: f64,
    /// Worst of the available signals.
    pub score: f64,
}

/// Outcome of one eye in a stereo calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EyeStatus {
    /// The eye was fitted and its calibration returned.
    Fitted(FitReport),
    /// No readings were supplied for the eye.
    NoReadings,
    /// Readings were supplied but not fitted, because the other eye had none.
    Skipped,
    /// The eye could not be fitted.
    Failed(CalibrationError),
    /// The eye was fitted, but defaults were returned because the other eye was not.
    Discarded(FitReport),
}

/// Calibration returned for one eye together with how it was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeOutcome {
    /// Fitted or default calibration.
    pub calibration: EyeCalibration,
    /// How `calibration` was obtained.
    pub status: EyeStatus,
}

/// Result of a stereo calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoCalibration {
    /// Confidence in the pair; `None` when either eye could not be fitted.
    pub grade: ConsistencyGrade,
    /// Left eye outcome.
    pub left: EyeOutcome,
    /// Right eye outcome.
    pub right: EyeOutcome,
    /// The signals behind `grade`, absent when the grade is `None`.
    pub metrics: Option<ConsistencyMetrics>,
}

impl StereoCalibration {
    /// The calibration returned for `eye`.
    pub fn calibration(&self, eye: Eye) -> &EyeCalibration {
        match eye {
            Eye::Left => &self.left.calibration,
            Eye::Right => &self.right.calibration,
        }
    }
}

struct EyeSolution {
    observations: Vec<Observation>,
    parameters: EyeParameters,
    report: FitReport,
}

fn solve_eye(
    model: &DisplayModel,
    eye: Eye,
    readings: &[CalibrationReading],
    params: &SolverParams,
) -> Result<EyeSolution, CalibrationError> {
    let fit = || -> Result<EyeSolution, CalibrationError> {
        solver::check_count(readings.len(), params)?;
        let (_, observations) = solver::prepare_observations(model, readings, Some(eye))?;
        let (parameters, report) = solver::fit_observations(model, eye, &observations, params)?;
        Ok(EyeSolution {
            observations,
            parameters,
            report,
        })
    };
    fit().inspect_err(|err| log::warn!("{eye:?} eye calibration failed: {err}"))
}

fn default_outcome(model: &DisplayModel, eye: Eye, status: EyeStatus) -> EyeOutcome {
    EyeOutcome {
        calibration: model.calibration(eye, model.default_parameters(eye)),
        status,
    }
}

/// Disagreement between fits of the even- and odd-indexed readings, in NDC.
fn split_half_distance(
    model: &DisplayModel,
    eye: Eye,
    observations: &[Observation],
    params: &SolverParams,
) -> Option<f64> {
    if observations.len() < 2 * params.min_readings {
        return None;
    }
    let even: Vec<Observation> = observations.iter().step_by(2).cloned().collect();
    let odd: Vec<Observation> = observations.iter().skip(1).step_by(2).cloned().collect();

    let sub_fit = |half: &[Observation]| match solver::fit_observations(model, eye, half, params) {
        Ok((parameters, _)) => Some(parameters),
        Err(err) => {
            log::debug!("{eye:?} eye split-half fit failed: {err}");
            None
        }
    };
    let even_params = sub_fit(&even)?;
    let odd_params = sub_fit(&odd)?;

    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for obs in observations {
        let a = model.predict_shape(&even_params, &obs.target_pose)?;
        let b = model.predict_shape(&odd_params, &obs.target_pose)?;
        for (p, q) in a.iter().zip(b.iter()) {
            sum_sq += (p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2);
            count += 1;
        }
    }
    Some((sum_sq / count as f64).sqrt())
}

/// RMS of the mirror asymmetries between the eyes, each over its tolerance.
///
/// Horizontal principal point offset and roll mirror between the eyes; focal
/// scale, vertical principal point, eye height and eye depth match.
fn symmetry_score(
    model: &DisplayModel,
    left: &EyeParameters,
    right: &EyeParameters,
    policy: &ConsistencyPolicy,
) -> f64 {
    let tol_t = model.unit.convert_millimeters(policy.translation_tolerance_mm);
    let tol_roll = policy.roll_tolerance_deg.to_radians();
    let terms = [
        (left.focal_scale - right.focal_scale) / policy.focal_scale_tolerance,
        (left.principal_point[0] + right.principal_point[0]) / policy.principal_point_tolerance,
        (left.principal_point[1] - right.principal_point[1]) / policy.principal_point_tolerance,
        (left.translation[1] - right.translation[1]) / tol_t,
        (left.translation[2] - right.translation[2]) / tol_t,
        (left.roll + right.roll) / tol_roll,
    ];
    (terms.iter().map(|t| t * t).sum::<f64>() / terms.len() as f64).sqrt()
}

fn compute_metrics(
    model: &DisplayModel,
    left: &EyeSolution,
    right: &EyeSolution,
    params: &SolverParams,
    policy: &ConsistencyPolicy,
) -> ConsistencyMetrics {
    let noise = policy.alignment_noise_ndc;
    let left_residual = left.report.rmse / noise;
    let right_residual = right.report.rmse / noise;
    let left_split_half =
        split_half_distance(model, Eye::Left, &left.observations, params).map(|d| d / noise);
    let right_split_half =
        split_half_distance(model, Eye::Right, &right.observations, params).map(|d| d / noise);
    let symmetry = symmetry_score(model, &left.parameters, &right.parameters, policy);

    // f64::max drops NaN, which must instead propagate to the grade
    let score = [
        Some(left_residual),
        Some(right_residual),
        left_split_half,
        right_split_half,
        Some(symmetry),
    ]
    .into_iter()
    .flatten()
    .fold(0.0f64, |acc, s| {
        if acc.is_nan() || s.is_nan() {
            f64::NAN
        } else {
            acc.max(s)
        }
    });

    ConsistencyMetrics {
        left_residual,
        right_residual,
        left_split_half,
        right_split_half,
        symmetry,
        score,
    }
}

/// Fit both eyes and grade the pair.
pub(crate) fn evaluate_stereo(
    model: &DisplayModel,
    left_readings: &[CalibrationReading],
    right_readings: &[CalibrationReading],
    params: &SolverParams,
    policy: &ConsistencyPolicy,
) -> StereoCalibration {
    if left_readings.is_empty() || right_readings.is_empty() {
        log::warn!("stereo calibration needs readings for both eyes, returning defaults");
        let status = |readings: &[CalibrationReading]| {
            if readings.is_empty() {
                EyeStatus::NoReadings
            } else {
                EyeStatus::Skipped
            }
        };
        return StereoCalibration {
            grade: ConsistencyGrade::None,
            left: default_outcome(model, Eye::Left, status(left_readings)),
            right: default_outcome(model, Eye::Right, status(right_readings)),
            metrics: None,
        };
    }

    let left = solve_eye(model, Eye::Left, left_readings, params);
    let right = solve_eye(model, Eye::Right, right_readings, params);

    match (left, right) {
        (Ok(left), Ok(right)) => {
            let metrics = compute_metrics(model, &left, &right, params, policy);
            let grade = policy.grade(metrics.score);
            log::debug!(
                "consistency: residual {:.2}/{:.2}, split-half {:?}/{:?}, symmetry {:.2}, score {:.2} -> {:?}",
                metrics.left_residual,
                metrics.right_residual,
                metrics.left_split_half,
                metrics.right_split_half,
                metrics.symmetry,
                metrics.score,
                grade
            );
            StereoCalibration {
                grade,
                left: EyeOutcome {
                    calibration: model.calibration(Eye::Left, left.parameters),
                    status: EyeStatus::Fitted(left.report),
                },
                right: EyeOutcome {
                    calibration: model.calibration(Eye::Right, right.parameters),
                    status: EyeStatus::Fitted(right.report),
                },
                metrics: Some(metrics),
            }
        }
        (left, right) => {
            log::warn!("stereo calibration incomplete, returning default calibrations");
            let fallback = |eye: Eye, result: Result<EyeSolution, CalibrationError>| {
                let status = match result {
                    Ok(solution) => EyeStatus::Discarded(solution.report),
                    Err(err) => EyeStatus::Failed(err),
                };
                default_outcome(model, eye, status)
            };
            StereoCalibration {
                grade: ConsistencyGrade::None,
                left: fallback(Eye::Left, left),
                right: fallback(Eye::Right, right),
                metrics: None,
            }
        }
    }
}
