//! Levenberg-Marquardt fit of the eye model to alignment readings.
//!
//! Each reading contributes eight residuals: the NDC offsets between the four
//! corners of the drawn shape and the projection of the matching target
//! corners through the eye model. The solver starts from the device's default
//! calibration and minimizes the squared residuals over the seven eye
//! parameters, see [`EyeParameters`].

use faer::prelude::SpSolver;
use glam::DVec3;
use seethru_lie::SE3;
use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;
use crate::model::{DisplayModel, EyeCalibration, EyeParameters, NUM_PARAMS};
use crate::types::{CalibrationReading, Eye};

/// Residuals per reading: four corners, two coordinates each.
const RESIDUALS_PER_READING: usize = 8;

/// Cost below which the fit is exact up to rounding.
const COST_FLOOR: f64 = 1e-20;

/// Relative step size, per parameter scale, below which the solve stops.
const STEP_TOLERANCE: f64 = 1e-12;

/// Relative perturbation used for the central-difference Jacobian.
const JACOBIAN_STEP: f64 = 1e-6;

/// Typical magnitude of a translation correction.
const TRANSLATION_SCALE_MM: f64 = 10.0;

const PARAMETER_NAMES: [&str; NUM_PARAMS] = [
    "focal scale",
    "principal point x",
    "principal point y",
    "translation x",
    "translation y",
    "translation z",
    "roll",
];

/// Parameters controlling the eye fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    /// Maximum number of LM iterations.
    pub max_iters: usize,
    /// Convergence threshold on the decrease of the squared residual sum.
    pub eps: f64,
    /// Initial damping factor (lambda).
    pub lambda_init: f64,
    /// Multiplicative factor to increase/decrease lambda.
    pub lambda_mul: f64,
    /// Damping above which no step can improve the estimate.
    pub lambda_max: f64,
    /// Minimum number of readings per fit.
    pub min_readings: usize,
    /// Reciprocal condition number of the normalized normal equations below
    /// which the readings are rejected as ill-conditioned.
    pub min_reciprocal_condition: f64,
    /// Target position spread, in millimeters, below which the readings are
    /// considered taken from one place.
    pub min_translation_spread_mm: f64,
    /// Target orientation spread, in degrees, below which the readings are
    /// considered taken from one orientation.
    pub min_rotation_spread_deg: f64,
    /// Assumed standard deviation of a user's alignment, in NDC. Propagated
    /// through the normal equations to judge how well the reading geometry
    /// determines each parameter.
    pub alignment_noise_ndc: f64,
    /// Largest tolerated standard error of the focal scale.
    pub max_focal_scale_std: f64,
    /// Largest tolerated standard error of the principal point, in NDC.
    pub max_principal_point_std: f64,
    /// Largest tolerated standard error of the eye translation, in millimeters.
    pub max_translation_std_mm: f64,
    /// Largest tolerated standard error of the roll, in degrees.
    pub max_roll_std_deg: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_iters: 100,
            eps: 1e-14,
            lambda_init: 1e-3,
            lambda_mul: 10.0,
            lambda_max: 1e10,
            min_readings: 3,
            min_reciprocal_condition: 1e-12,
            min_translation_spread_mm: 1.0,
            min_rotation_spread_deg: 0.5,
            alignment_noise_ndc: 0.003,
            max_focal_scale_std: 0.05,
            max_principal_point_std: 0.05,
            max_translation_std_mm: 10.0,
            max_roll_std_deg: 2.0,
        }
    }
}

impl SolverParams {
    /// Check that the parameters describe a usable solver.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        let invalid = |what: &str| Err(CalibrationError::InvalidConfiguration(what.to_string()));

        if self.max_iters == 0 {
            return invalid("max_iters must be positive");
        }
        if self.min_readings == 0 {
            return invalid("min_readings must be positive");
        }
        if !(self.eps.is_finite() && self.eps >= 0.0) {
            return invalid("eps must be finite and non-negative");
        }
        if !(self.lambda_init.is_finite() && self.lambda_init > 0.0) {
            return invalid("lambda_init must be finite and positive");
        }
        if !(self.lambda_mul.is_finite() && self.lambda_mul > 1.0) {
            return invalid("lambda_mul must be greater than one");
        }
        if !(self.lambda_max.is_finite() && self.lambda_max > self.lambda_init) {
            return invalid("lambda_max must exceed lambda_init");
        }
        if !(0.0..1.0).contains(&self.min_reciprocal_condition) {
            return invalid("min_reciprocal_condition must lie in [0, 1)");
        }
        if !(self.min_translation_spread_mm.is_finite() && self.min_translation_spread_mm >= 0.0)
            || !(self.min_rotation_spread_deg.is_finite() && self.min_rotation_spread_deg >= 0.0)
        {
            return invalid("pose spread thresholds must be finite and non-negative");
        }
        let uncertainty = [
            self.alignment_noise_ndc,
            self.max_focal_scale_std,
            self.max_principal_point_std,
            self.max_translation_std_mm,
            self.max_roll_std_deg,
        ];
        if uncertainty.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
            return invalid("alignment noise and standard error limits must be finite and positive");
        }
        Ok(())
    }
}

/// Reason why the solver stopped.
///
/// Running out of iterations is not a termination but a
/// [`CalibrationError::SolverDivergence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Cost reached its floor or stopped decreasing.
    CostConverged,
    /// Accepted steps became negligible.
    StepConverged,
    /// Damping exceeded its maximum: no step improves the estimate, which is
    /// a minimum up to rounding.
    Stalled,
}

/// Diagnostics of a successful eye fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    /// RMS NDC distance between drawn and predicted shape corners.
    pub rmse: f64,
    /// Number of LM iterations performed.
    pub iterations: usize,
    /// Why the solver stopped.
    pub termination: Termination,
    /// Reciprocal condition number of the normalized normal equations at the solution.
    pub reciprocal_condition: f64,
    /// Standard error of each parameter for the assumed alignment noise,
    /// see [`SolverParams::alignment_noise_ndc`].
    pub standard_errors: EyeParameters,
    /// Number of readings the fit used.
    pub num_readings: usize,
}

/// Calibration of one eye with its fit diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeFit {
    /// The recovered calibration.
    pub calibration: EyeCalibration,
    /// How well the readings were explained.
    pub report: FitReport,
}

/// A validated reading, resolved into the camera frame.
#[derive(Debug, Clone)]
pub(crate) struct Observation {
    pub(crate) target_pose: SE3,
    corners: [DVec3; 4],
    shape: [[f64; 2]; 4],
}

/// Validate readings and resolve them against the display model.
///
/// Readings must all belong to `expected_eye`, or to the eye of the first
/// reading when no eye is expected.
pub(crate) fn prepare_observations(
    model: &DisplayModel,
    readings: &[CalibrationReading],
    expected_eye: Option<Eye>,
) -> Result<(Eye, Vec<Observation>), CalibrationError> {
    let eye = match (expected_eye, readings.first()) {
        (Some(eye), _) => eye,
        (None, Some(first)) => first.eye,
        (None, None) => {
            return Err(CalibrationError::InsufficientData {
                required: 1,
                actual: 0,
            })
        }
    };

    let mut observations = Vec::with_capacity(readings.len());
    for (index, reading) in readings.iter().enumerate() {
        let invalid = |reason: String| CalibrationError::InvalidReading { index, reason };

        if reading.eye != eye {
            return Err(invalid(format!(
                "reading is for the {:?} eye, expected the {:?} eye",
                reading.eye, eye
            )));
        }
        let scale = reading.shape_scale;
        if !(scale.is_finite() && scale > 0.0 && scale <= 1.0) {
            return Err(invalid(format!("shape scale {scale} outside (0, 1]")));
        }
        if !reading.shape_center.iter().all(|c| c.is_finite()) {
            return Err(invalid("non-finite shape center".to_string()));
        }
        let target_pose = SE3::from_matrix34(&reading.target_pose)
            .ok_or_else(|| invalid("target pose is not a finite rigid transform".to_string()))?;

        observations.push(Observation {
            target_pose,
            corners: model.target_corners(&target_pose),
            shape: model.shape_corners(scale, reading.shape_center),
        });
    }

    Ok((eye, observations))
}

/// Fit the eye model to raw readings.
pub(crate) fn fit_eye(
    model: &DisplayModel,
    readings: &[CalibrationReading],
    expected_eye: Option<Eye>,
    params: &SolverParams,
) -> Result<EyeFit, CalibrationError> {
    check_count(readings.len(), params)?;
    let (eye, observations) = prepare_observations(model, readings, expected_eye)?;
    let (parameters, report) = fit_observations(model, eye, &observations, params)?;
    Ok(EyeFit {
        calibration: model.calibration(eye, parameters),
        report,
    })
}

/// Fit the eye model to already validated observations.
pub(crate) fn fit_observations(
    model: &DisplayModel,
    eye: Eye,
    observations: &[Observation],
    params: &SolverParams,
) -> Result<(EyeParameters, FitReport), CalibrationError> {
    check_count(observations.len(), params)?;
    check_pose_diversity(model, observations, params)?;

    let (parameters, report) =
        refine_eye_lm(model, observations, model.default_parameters(eye), params)?;

    log::debug!(
        "{:?} eye fit: {} readings, {} iterations, rmse {:.3e}, rcond {:.3e}, {:?}",
        eye,
        report.num_readings,
        report.iterations,
        report.rmse,
        report.reciprocal_condition,
        report.termination
    );

    Ok((parameters, report))
}

pub(crate) fn check_count(actual: usize, params: &SolverParams) -> Result<(), CalibrationError> {
    if actual < params.min_readings {
        return Err(CalibrationError::InsufficientData {
            required: params.min_readings,
            actual,
        });
    }
    Ok(())
}

/// Reject readings whose target poses are all the same within tolerance.
fn check_pose_diversity(
    model: &DisplayModel,
    observations: &[Observation],
    params: &SolverParams,
) -> Result<(), CalibrationError> {
    let Some(first) = observations.first() else {
        return Ok(());
    };

    let (translation_spread, rotation_spread) =
        observations
            .iter()
            .fold((0.0f64, 0.0f64), |(dt, dr), o| {
                (
                    dt.max(o.target_pose.translation.distance(first.target_pose.translation)),
                    dr.max(o.target_pose.rotation.angle_to(&first.target_pose.rotation)),
                )
            });

    let min_translation = model.unit.convert_millimeters(params.min_translation_spread_mm);
    let min_rotation = params.min_rotation_spread_deg.to_radians();
    if translation_spread < min_translation && rotation_spread < min_rotation {
        log::debug!(
            "target poses do not vary: translation spread {translation_spread:.3e}, rotation spread {rotation_spread:.3e} rad"
        );
        return Err(CalibrationError::IllConditioned {
            reciprocal_condition: 0.0,
        });
    }
    Ok(())
}

/// Typical magnitude of each parameter, used for finite differences and step tests.
fn parameter_scales(model: &DisplayModel) -> [f64; NUM_PARAMS] {
    let t = model.unit.convert_millimeters(TRANSLATION_SCALE_MM);
    [1.0, 0.05, 0.05, t, t, t, 0.02]
}

/// Write the residuals for the parameter vector `x` into `out`.
///
/// Returns the sum of squared residuals, or `None` when a target corner does
/// not project.
fn evaluate_residuals(
    model: &DisplayModel,
    observations: &[Observation],
    x: &[f64; NUM_PARAMS],
    out: &mut [f64],
) -> Option<f64> {
    let params = EyeParameters::from_vector(x);
    let camera_to_eye = params.camera_to_eye();

    let mut sum_sq = 0.0;
    for (obs, r) in observations
        .iter()
        .zip(out.chunks_exact_mut(RESIDUALS_PER_READING))
    {
        for (k, (corner, drawn)) in obs.corners.iter().zip(obs.shape.iter()).enumerate() {
            let [u, v] = model.project(&params, &camera_to_eye, *corner)?;
            let du = u - drawn[0];
            let dv = v - drawn[1];
            r[2 * k] = du;
            r[2 * k + 1] = dv;
            sum_sq += du.mul_add(du, dv * dv);
        }
    }
    sum_sq.is_finite().then_some(sum_sq)
}

/// Central-difference Jacobian of the residuals, row-major with `NUM_PARAMS` columns.
fn evaluate_jacobian(
    model: &DisplayModel,
    observations: &[Observation],
    x: &[f64; NUM_PARAMS],
    scales: &[f64; NUM_PARAMS],
    jacobian: &mut [f64],
    residuals_p: &mut [f64],
    residuals_m: &mut [f64],
) -> Result<(), CalibrationError> {
    for k in 0..NUM_PARAMS {
        let h = JACOBIAN_STEP * x[k].abs().max(scales[k]);
        let mut x_plus = *x;
        let mut x_minus = *x;
        x_plus[k] += h;
        x_minus[k] -= h;
        evaluate_residuals(model, observations, &x_plus, residuals_p)
            .zip(evaluate_residuals(model, observations, &x_minus, residuals_m))
            .ok_or_else(|| {
                CalibrationError::SolverDivergence(
                    "target left the field of view while differentiating".to_string(),
                )
            })?;
        for (i, (p, m)) in residuals_p.iter().zip(residuals_m.iter()).enumerate() {
            jacobian[i * NUM_PARAMS + k] = (p - m) / (2.0 * h);
        }
    }
    Ok(())
}

/// `J^T J` of a row-major Jacobian with `NUM_PARAMS` columns.
fn normal_matrix(jacobian: &[f64]) -> [[f64; NUM_PARAMS]; NUM_PARAMS] {
    let mut a = [[0.0f64; NUM_PARAMS]; NUM_PARAMS];
    for row in jacobian.chunks_exact(NUM_PARAMS) {
        for (a_row, jc) in a.iter_mut().zip(row) {
            for (a_cd, jd) in a_row.iter_mut().zip(row) {
                *a_cd += jc * jd;
            }
        }
    }
    a
}

/// Normal matrix with unit diagonal, and the column norms it was scaled by.
///
/// `None` when a parameter has no influence on the residuals.
fn normalized_normal_matrix(
    jacobian: &[f64],
) -> Option<([[f64; NUM_PARAMS]; NUM_PARAMS], [f64; NUM_PARAMS])> {
    let mut normal = normal_matrix(jacobian);
    let norms: [f64; NUM_PARAMS] = std::array::from_fn(|k| normal[k][k].sqrt());
    if norms.iter().any(|n| !(*n > 0.0 && n.is_finite())) {
        return None;
    }
    for (c, row) in normal.iter_mut().enumerate() {
        for (d, v) in row.iter_mut().enumerate() {
            *v /= norms[c] * norms[d];
        }
    }
    Some((normal, norms))
}

/// Reciprocal condition number of the column-normalized normal equations.
///
/// A parameter with no influence on the residuals yields zero.
fn reciprocal_condition(jacobian: &[f64]) -> f64 {
    let Some((normal, _)) = normalized_normal_matrix(jacobian) else {
        return 0.0;
    };

    let mat = faer::Mat::<f64>::from_fn(NUM_PARAMS, NUM_PARAMS, |i, j| normal[i][j]);
    let singular_values = mat.singular_values();
    let (smin, smax) = singular_values
        .iter()
        .fold((f64::INFINITY, 0.0f64), |(lo, hi), &s| (lo.min(s), hi.max(s)));
    if smax > 0.0 && smin.is_finite() {
        smin / smax
    } else {
        0.0
    }
}

/// Standard error of each parameter when every residual has standard
/// deviation `noise`: the square roots of the diagonal of `noise^2 (J^T J)^-1`.
///
/// Parameters the equations cannot determine get an infinite or NaN error.
fn standard_errors(jacobian: &[f64], noise: f64) -> [f64; NUM_PARAMS] {
    let Some((normal, norms)) = normalized_normal_matrix(jacobian) else {
        return [f64::INFINITY; NUM_PARAMS];
    };

    let mat = faer::Mat::<f64>::from_fn(NUM_PARAMS, NUM_PARAMS, |i, j| normal[i][j]);
    let covariance = mat
        .partial_piv_lu()
        .solve(faer::Mat::<f64>::identity(NUM_PARAMS, NUM_PARAMS));
    std::array::from_fn(|k| noise * covariance.read(k, k).sqrt() / norms[k])
}

/// Reject a Jacobian whose normal equations are near singular, or that leaves
/// a parameter poorly determined by the readings.
///
/// Returns the reciprocal condition number and the standard errors.
fn check_conditioning(
    model: &DisplayModel,
    jacobian: &[f64],
    params: &SolverParams,
) -> Result<(f64, [f64; NUM_PARAMS]), CalibrationError> {
    let condition = reciprocal_condition(jacobian);
    if condition < params.min_reciprocal_condition {
        return Err(CalibrationError::IllConditioned {
            reciprocal_condition: condition,
        });
    }

    let errors = standard_errors(jacobian, params.alignment_noise_ndc);
    let t = model.unit.convert_millimeters(params.max_translation_std_mm);
    let pp = params.max_principal_point_std;
    let limits = [
        params.max_focal_scale_std,
        pp,
        pp,
        t,
        t,
        t,
        params.max_roll_std_deg.to_radians(),
    ];
    for (name, (error, limit)) in PARAMETER_NAMES.iter().zip(errors.iter().zip(limits)) {
        if error.is_nan() || *error > limit {
            log::debug!(
                "{name} is not determined by the readings: standard error {error:.3e}, limit {limit:.3e}"
            );
            return Err(CalibrationError::IllConditioned {
                reciprocal_condition: condition,
            });
        }
    }
    Ok((condition, errors))
}

/// Marquardt damping factor and its growth limit.
#[derive(Debug, Clone, Copy)]
struct Damping {
    lambda: f64,
    mul: f64,
    max: f64,
}

impl Damping {
    fn new(params: &SolverParams) -> Self {
        Self {
            lambda: params.lambda_init,
            mul: params.lambda_mul,
            max: params.lambda_max,
        }
    }

    fn accept(&mut self) {
        self.lambda = (self.lambda / self.mul).max(1e-12);
    }

    /// Increase the damping after a rejected step. Returns `false` once the
    /// damping exceeds its maximum.
    fn reject(&mut self) -> bool {
        self.lambda *= self.mul;
        self.lambda <= self.max
    }
}

/// Solve the damped normal equations `a * delta = b`.
fn solve_normal_equations(
    a: &[[f64; NUM_PARAMS]; NUM_PARAMS],
    b: &[f64; NUM_PARAMS],
) -> Option<[f64; NUM_PARAMS]> {
    let mat_a = faer::Mat::<f64>::from_fn(NUM_PARAMS, NUM_PARAMS, |i, j| a[i][j]);
    let rhs = faer::Mat::<f64>::from_fn(NUM_PARAMS, 1, |i, _| b[i]);
    let x = mat_a.partial_piv_lu().solve(rhs);
    let delta: [f64; NUM_PARAMS] = std::array::from_fn(|i| x.read(i, 0));
    delta.iter().all(|v| v.is_finite()).then_some(delta)
}

/// Refine eye parameters with Levenberg–Marquardt to minimize the NDC alignment error.
///
/// - `observations`: validated readings of one eye
/// - `seed`: initial estimate, usually the device default
///
/// Fails with [`CalibrationError::IllConditioned`] when the readings do not
/// determine every parameter, checked at the seed and at the solution, and
/// with [`CalibrationError::SolverDivergence`] when the seed does not project
/// or the iteration budget runs out.
fn refine_eye_lm(
    model: &DisplayModel,
    observations: &[Observation],
    seed: EyeParameters,
    params: &SolverParams,
) -> Result<(EyeParameters, FitReport), CalibrationError> {
    let n = observations.len();
    let m = RESIDUALS_PER_READING * n;
    let scales = parameter_scales(model);

    let mut x = seed.to_vector();
    let mut residuals = vec![0.0f64; m];
    let mut residuals_trial = vec![0.0f64; m];
    let mut residuals_p = vec![0.0f64; m];
    let mut residuals_m = vec![0.0f64; m];
    let mut jacobian = vec![0.0f64; m * NUM_PARAMS];

    let mut cost = evaluate_residuals(model, observations, &x, &mut residuals).ok_or_else(|| {
        CalibrationError::SolverDivergence(
            "target is behind the eye at the initial estimate".to_string(),
        )
    })?;

    evaluate_jacobian(
        model,
        observations,
        &x,
        &scales,
        &mut jacobian,
        &mut residuals_p,
        &mut residuals_m,
    )?;
    check_conditioning(model, &jacobian, params)?;

    let mut damping = Damping::new(params);
    let mut iters = 0usize;
    let mut termination = None;
    let mut jacobian_stale = false;

    while iters < params.max_iters {
        if cost <= COST_FLOOR {
            termination = Some(Termination::CostConverged);
            break;
        }
        iters += 1;

        if jacobian_stale {
            evaluate_jacobian(
                model,
                observations,
                &x,
                &scales,
                &mut jacobian,
                &mut residuals_p,
                &mut residuals_m,
            )?;
            jacobian_stale = false;
        }

        // Build normal equations: J^T J delta = -J^T r
        let mut a = normal_matrix(&jacobian);
        let mut b = [0.0f64; NUM_PARAMS];
        for (row, r_val) in jacobian.chunks_exact(NUM_PARAMS).zip(residuals.iter()) {
            for (bc, jc) in b.iter_mut().zip(row) {
                *bc -= jc * r_val;
            }
        }
        // Marquardt damping scales with the curvature of each parameter
        for (d, a_row) in a.iter_mut().enumerate() {
            a_row[d] *= 1.0 + damping.lambda;
        }

        let step = solve_normal_equations(&a, &b).and_then(|delta| {
            let mut x_new = x;
            for (xi, di) in x_new.iter_mut().zip(delta.iter()) {
                *xi += di;
            }
            let cost_new = evaluate_residuals(model, observations, &x_new, &mut residuals_trial)?;
            (cost_new < cost).then_some((x_new, delta, cost_new))
        });

        match step {
            Some((x_new, delta, cost_new)) => {
                let decrease = cost - cost_new;
                x = x_new;
                cost = cost_new;
                std::mem::swap(&mut residuals, &mut residuals_trial);
                jacobian_stale = true;

                let relative_step = delta
                    .iter()
                    .zip(scales.iter())
                    .fold(0.0f64, |acc, (d, s)| acc.max(d.abs() / s));
                if decrease < params.eps {
                    termination = Some(Termination::CostConverged);
                    break;
                }
                if relative_step < STEP_TOLERANCE {
                    termination = Some(Termination::StepConverged);
                    break;
                }
                damping.accept();
            }
            None => {
                if !damping.reject() {
                    termination = Some(Termination::Stalled);
                    break;
                }
            }
        }
    }

    let rmse = (cost / (4 * n) as f64).sqrt();
    let termination = match termination {
        Some(termination) => termination,
        None if cost <= COST_FLOOR => Termination::CostConverged,
        None => {
            return Err(CalibrationError::SolverDivergence(format!(
                "no convergence within {iters} iterations (rmse {rmse:.3e})"
            )))
        }
    };

    if jacobian_stale {
        evaluate_jacobian(
            model,
            observations,
            &x,
            &scales,
            &mut jacobian,
            &mut residuals_p,
            &mut residuals_m,
        )?;
    }
    let (condition, errors) = check_conditioning(model, &jacobian, params)?;

    let parameters = EyeParameters::from_vector(&x);
    if !parameters.is_finite() {
        return Err(CalibrationError::SolverDivergence(
            "non-finite eye parameters".to_string(),
        ));
    }

    let report = FitReport {
        rmse,
        iterations: iters,
        termination,
        reciprocal_condition: condition,
        standard_errors: EyeParameters::from_vector(&errors),
        num_readings: n,
    };
    Ok((parameters, report))
}
