//! Eye model: fitted parameters, display geometry and the output matrices.
//!
//! Frames use x right, y down, z forward. Display positions are normalized
//! display coordinates (NDC) in [-1, 1] with y pointing down.

use glam::DVec3;
use seethru_lie::{SE3, SO3};
use serde::{Deserialize, Serialize};

use crate::profile::DeviceProfile;
use crate::session::{LengthUnit, SessionConfig};
use crate::types::Eye;

/// Number of fitted eye parameters.
pub(crate) const NUM_PARAMS: usize = 7;

/// Points closer to the eye than this fraction of the target half width do not project.
const MIN_DEPTH_RATIO: f64 = 1e-6;

/// Target corner signs, paired with the shape corners of the same signs.
const CORNER_SIGNS: [[f64; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];

/// The optical parameters recovered for one eye.
///
/// Yaw and pitch misalignment between camera and combiner shift the image
/// like the principal point does, so they are carried by `principal_point`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeParameters {
    /// Multiplier on the device's nominal focal lengths.
    pub focal_scale: f64,
    /// Principal point offset in NDC.
    pub principal_point: [f64; 2],
    /// Translation of the camera-to-eye transform, in the session's length unit.
    pub translation: [f64; 3],
    /// Rotation of the eye about its optical axis, in radians.
    pub roll: f64,
}

impl EyeParameters {
    /// Rigid transform from the tracking camera frame to the eye frame.
    pub fn camera_to_eye(&self) -> SE3 {
        SE3::new(
            SO3::from_rotation_z(self.roll),
            DVec3::from_array(self.translation),
        )
    }

    /// Whether every parameter is finite.
    pub fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|v| v.is_finite())
    }

    pub(crate) fn to_vector(&self) -> [f64; NUM_PARAMS] {
        let [px, py] = self.principal_point;
        let [tx, ty, tz] = self.translation;
        [self.focal_scale, px, py, tx, ty, tz, self.roll]
    }

    pub(crate) fn from_vector(x: &[f64; NUM_PARAMS]) -> Self {
        Self {
            focal_scale: x[0],
            principal_point: [x[1], x[2]],
            translation: [x[3], x[4], x[5]],
            roll: x[6],
        }
    }
}

/// Pinhole intrinsics of an eye in NDC plus its clip planes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeIntrinsics {
    /// Horizontal focal length in NDC units.
    pub fx: f64,
    /// Vertical focal length in NDC units.
    pub fy: f64,
    /// Horizontal principal point in NDC.
    pub px: f64,
    /// Vertical principal point in NDC (y down).
    pub py: f64,
    /// Near clip plane distance.
    pub near: f64,
    /// Far clip plane distance.
    pub far: f64,
}

impl EyeIntrinsics {
    /// OpenGL-convention projection matrix (row-major).
    ///
    /// Maps eye-frame points to clip space with y up, `w = z` and depth in
    /// [-1, 1] between the near and far planes. Points behind the eye end up
    /// with a negative `w` and are clipped by the rasterizer.
    pub fn projection_matrix(&self) -> [[f64; 4]; 4] {
        let (n, f) = (self.near, self.far);
        [
            [self.fx, 0.0, self.px, 0.0],
            [0.0, -self.fy, -self.py, 0.0],
            [0.0, 0.0, (f + n) / (f - n), -2.0 * f * n / (f - n)],
            [0.0, 0.0, 1.0, 0.0],
        ]
    }
}

/// Calibration of one eye as consumed by the rendering layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeCalibration {
    /// Eye this calibration belongs to.
    pub eye: Eye,
    /// Parameters the matrices were built from.
    pub parameters: EyeParameters,
    /// Intrinsics the projection matrix was built from.
    pub intrinsics: EyeIntrinsics,
    /// Row-major 3x4 camera-to-eye transform `[R | t]`.
    pub camera_to_eye_pose: [[f64; 4]; 3],
    /// Row-major 4x4 projection matrix, see [`EyeIntrinsics::projection_matrix`].
    pub eye_projection: [[f64; 4]; 4],
}

impl EyeCalibration {
    /// Project a point given in the camera frame to NDC (y down).
    ///
    /// Returns `None` for points behind the eye.
    pub fn project(&self, point_camera: [f64; 3]) -> Option<[f64; 2]> {
        let pe = self
            .parameters
            .camera_to_eye()
            .transform(DVec3::from_array(point_camera));
        if pe.z <= 0.0 {
            return None;
        }
        let i = &self.intrinsics;
        Some([i.fx * pe.x / pe.z + i.px, i.fy * pe.y / pe.z + i.py])
    }
}

/// Session constants resolved from the surface, target and device profile.
#[derive(Debug, Clone)]
pub(crate) struct DisplayModel {
    /// Nominal focal lengths in NDC units.
    pub(crate) fx0: f64,
    pub(crate) fy0: f64,
    /// Vertical over horizontal half extent of a drawn shape.
    pub(crate) shape_aspect: f64,
    pub(crate) target_half: [f64; 2],
    pub(crate) near: f64,
    pub(crate) far: f64,
    pub(crate) unit: LengthUnit,
    default_translation: [[f64; 3]; 2],
}

impl DisplayModel {
    pub(crate) fn new(config: &SessionConfig, profile: &DeviceProfile) -> Self {
        let unit = config.unit;
        let fx0 = 1.0 / (0.5 * profile.horizontal_fov_deg.to_radians()).tan();
        let fy0 = fx0 * config.display_aspect() * profile.aspect_correction;
        let to_unit = |t: [f64; 3]| t.map(|v| unit.convert_millimeters(v));

        Self {
            fx0,
            fy0,
            shape_aspect: config.display_aspect() * profile.aspect_correction
                / config.target_aspect(),
            target_half: [0.5 * config.target_width, 0.5 * config.target_height],
            near: unit.convert_millimeters(profile.near_clip_mm),
            far: unit.convert_millimeters(profile.far_clip_mm),
            unit,
            default_translation: [
                to_unit(profile.left_eye_translation_mm),
                to_unit(profile.right_eye_translation_mm),
            ],
        }
    }

    /// The manufacturer calibration the solver starts from.
    pub(crate) fn default_parameters(&self, eye: Eye) -> EyeParameters {
        let translation = match eye {
            Eye::Left => self.default_translation[0],
            Eye::Right => self.default_translation[1],
        };
        EyeParameters {
            focal_scale: 1.0,
            principal_point: [0.0, 0.0],
            translation,
            roll: 0.0,
        }
    }

    /// Target corners expressed in the camera frame.
    pub(crate) fn target_corners(&self, target_pose: &SE3) -> [DVec3; 4] {
        let [hw, hh] = self.target_half;
        CORNER_SIGNS.map(|[sx, sy]| target_pose.transform(DVec3::new(sx * hw, sy * hh, 0.0)))
    }

    /// Corners of a shape drawn at `scale` around `center`.
    pub(crate) fn shape_corners(&self, scale: f64, center: [f64; 2]) -> [[f64; 2]; 4] {
        let hx = scale;
        let hy = scale * self.shape_aspect;
        CORNER_SIGNS.map(|[sx, sy]| [center[0] + sx * hx, center[1] + sy * hy])
    }

    /// Project a camera-frame point through an eye with the given parameters.
    ///
    /// `camera_to_eye` must be `params.camera_to_eye()`; it is passed in so hot
    /// loops build it once.
    pub(crate) fn project(
        &self,
        params: &EyeParameters,
        camera_to_eye: &SE3,
        p: DVec3,
    ) -> Option<[f64; 2]> {
        let pe = camera_to_eye.transform(p);
        if pe.z <= MIN_DEPTH_RATIO * self.target_half[0] {
            return None;
        }
        let inv_z = 1.0 / pe.z;
        let [px, py] = params.principal_point;
        let u = params.focal_scale * self.fx0 * pe.x * inv_z + px;
        let v = params.focal_scale * self.fy0 * pe.y * inv_z + py;
        (u.is_finite() && v.is_finite()).then_some([u, v])
    }

    /// Where an eye with `params` sees the target corners for a given target pose.
    pub(crate) fn predict_shape(
        &self,
        params: &EyeParameters,
        target_pose: &SE3,
    ) -> Option<[[f64; 2]; 4]> {
        let camera_to_eye = params.camera_to_eye();
        let corners = self.target_corners(target_pose);
        let mut out = [[0.0; 2]; 4];
        for (o, c) in out.iter_mut().zip(corners) {
            *o = self.project(params, &camera_to_eye, c)?;
        }
        Some(out)
    }

    /// Output matrices for a set of parameters.
    pub(crate) fn calibration(&self, eye: Eye, parameters: EyeParameters) -> EyeCalibration {
        let intrinsics = EyeIntrinsics {
            fx: parameters.focal_scale * self.fx0,
            fy: parameters.focal_scale * self.fy0,
            px: parameters.principal_point[0],
            py: parameters.principal_point[1],
            near: self.near,
            far: self.far,
        };
        EyeCalibration {
            eye,
            parameters,
            intrinsics,
            camera_to_eye_pose: parameters.camera_to_eye().to_matrix34(),
            eye_projection: intrinsics.projection_matrix(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn model() -> DisplayModel {
        let config = SessionConfig {
            surface_width: 1280,
            surface_height: 720,
            target_width: 80.0,
            target_height: 50.0,
            unit: LengthUnit::Millimeters,
        };
        DisplayModel::new(&config, &DeviceProfile::default())
    }

    fn sample_params() -> EyeParameters {
        EyeParameters {
            focal_scale: 1.04,
            principal_point: [0.02, -0.01],
            translation: [30.0, 3.0, -5.0],
            roll: 0.02,
        }
    }

    fn mul4(m: &[[f64; 4]; 4], v: [f64; 4]) -> [f64; 4] {
        m.map(|row| row.iter().zip(v).map(|(a, b)| a * b).sum())
    }

    #[test]
    fn test_vector_roundtrip() {
        let p = sample_params();
        assert_eq!(EyeParameters::from_vector(&p.to_vector()), p);
        assert!(p.is_finite());
    }

    #[test]
    fn test_projection_matrix_matches_project() {
        let m = model();
        let calib = m.calibration(Eye::Left, sample_params());
        let p_cam = [25.0, -40.0, 450.0];
        let [u, v] = calib.project(p_cam).expect("in front of the eye");

        let pe = sample_params()
            .camera_to_eye()
            .transform(DVec3::from_array(p_cam));
        let clip = mul4(&calib.eye_projection, [pe.x, pe.y, pe.z, 1.0]);
        assert_relative_eq!(clip[0] / clip[3], u, epsilon = 1e-12);
        // the GL matrix flips y to point up
        assert_relative_eq!(clip[1] / clip[3], -v, epsilon = 1e-12);
    }

    #[test]
    fn test_projection_clip_planes() {
        let m = model();
        let calib = m.calibration(Eye::Right, m.default_parameters(Eye::Right));
        let proj = calib.eye_projection;

        let at = |z: f64| {
            let clip = mul4(&proj, [0.0, 0.0, z, 1.0]);
            clip[2] / clip[3]
        };
        assert_relative_eq!(at(m.near), -1.0, epsilon = 1e-12);
        assert_relative_eq!(at(m.far), 1.0, epsilon = 1e-9);

        let behind = mul4(&proj, [0.0, 0.0, -100.0, 1.0]);
        assert!(behind[3] < 0.0);
        assert!(calib.project([0.0, 0.0, -500.0]).is_none());
    }

    #[test]
    fn test_fronto_parallel_target_matches_shape() {
        // a target facing the eye projects onto a shape of the drawn aspect
        let m = model();
        let params = EyeParameters {
            roll: 0.0,
            ..sample_params()
        };
        let eye_from_target = SE3::from_translation(DVec3::new(10.0, -20.0, 500.0));
        let target_pose = params.camera_to_eye().inverse() * eye_from_target;

        let seen = m.predict_shape(&params, &target_pose).expect("visible");
        let hx = 0.5 * (seen[1][0] - seen[0][0]);
        let hy = 0.5 * (seen[2][1] - seen[1][1]);
        assert_relative_eq!(hy / hx, m.shape_aspect, epsilon = 1e-12);

        let center = [0.5 * (seen[0][0] + seen[2][0]), 0.5 * (seen[0][1] + seen[2][1])];
        let drawn = m.shape_corners(hx, center);
        for (a, b) in drawn.iter().zip(seen.iter()) {
            assert_relative_eq!(a[0], b[0], epsilon = 1e-12);
            assert_relative_eq!(a[1], b[1], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_default_parameters_follow_unit() {
        let config = SessionConfig {
            surface_width: 1920,
            surface_height: 1080,
            target_width: 0.08,
            target_height: 0.05,
            unit: LengthUnit::Meters,
        };
        let m = DisplayModel::new(&config, &DeviceProfile::default());
        let left = m.default_parameters(Eye::Left);
        assert_relative_eq!(left.translation[0], 0.0315, epsilon = 1e-12);
        assert_relative_eq!(m.near, 0.01, epsilon = 1e-12);
        assert_relative_eq!(m.far, 5.0, epsilon = 1e-12);
    }
}
