use std::ops::Mul;

use glam::{DMat3, DVec3};

use crate::so3::SO3;

/// Maximum deviation from orthonormality accepted by [`SE3::from_matrix34`].
const ORTHONORMAL_TOL: f64 = 1e-3;

/// A rigid body transformation `p' = R * p + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    /// Rotation part.
    pub rotation: SO3,
    /// Translation part.
    pub translation: DVec3,
}

impl SE3 {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        rotation: SO3::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Create a transform from its rotation and translation.
    pub fn new(rotation: SO3, translation: DVec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Pure translation.
    pub fn from_translation(translation: DVec3) -> Self {
        Self::new(SO3::IDENTITY, translation)
    }

    /// Create a transform from a row-major 3x4 matrix `[R | t]`.
    ///
    /// Returns `None` when the matrix holds non-finite values or its left 3x3
    /// block is not a proper rotation.
    pub fn from_matrix34(m: &[[f64; 4]; 3]) -> Option<Self> {
        if m.iter().flatten().any(|v| !v.is_finite()) {
            return None;
        }

        let r = DMat3::from_cols(
            DVec3::new(m[0][0], m[1][0], m[2][0]),
            DVec3::new(m[0][1], m[1][1], m[2][1]),
            DVec3::new(m[0][2], m[1][2], m[2][2]),
        );

        let rtr = r.transpose() * r;
        let off_identity = (rtr.x_axis - DVec3::X).length()
            + (rtr.y_axis - DVec3::Y).length()
            + (rtr.z_axis - DVec3::Z).length();
        if off_identity > ORTHONORMAL_TOL || r.determinant() <= 0.0 {
            return None;
        }

        Some(Self {
            rotation: SO3::from_matrix(&r),
            translation: DVec3::new(m[0][3], m[1][3], m[2][3]),
        })
    }

    /// Row-major 3x4 matrix `[R | t]`.
    pub fn to_matrix34(&self) -> [[f64; 4]; 3] {
        let r = self.rotation.matrix();
        let t = self.translation;
        let row = |i: usize| {
            let row = r.row(i);
            [row.x, row.y, row.z, t[i]]
        };
        [row(0), row(1), row(2)]
    }

    /// Inverse transform.
    pub fn inverse(&self) -> Self {
        let inv_rot = self.rotation.inverse();
        let inv_trans = -inv_rot.transform(self.translation);
        Self {
            rotation: inv_rot,
            translation: inv_trans,
        }
    }

    /// Composition `self * other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.translation + self.rotation.transform(other.translation),
        }
    }

    /// Transform a point.
    pub fn transform(&self, p: DVec3) -> DVec3 {
        self.rotation.transform(p) + self.translation
    }
}

impl Mul for SE3 {
    type Output = SE3;

    fn mul(self, rhs: Self) -> Self::Output {
        self.compose(&rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_pose() -> SE3 {
        SE3::new(
            SO3::from_matrix(&DMat3::from_euler(glam::EulerRot::XYZ, 0.2, -0.4, 0.1)),
            DVec3::new(12.0, -3.5, 480.0),
        )
    }

    #[test]
    fn test_identity() {
        let p = DVec3::new(1.0, 2.0, 3.0);
        assert_eq!(SE3::IDENTITY.transform(p), p);
    }

    #[test]
    fn test_inverse() {
        let pose = sample_pose();
        let p = DVec3::new(-40.0, 25.0, 0.0);
        let back = pose.inverse().transform(pose.transform(p));
        assert!((back - p).length() < 1e-9);

        let id = pose * pose.inverse();
        assert_relative_eq!(id.translation.length(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(id.rotation.angle(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_compose_order() {
        let a = SE3::from_translation(DVec3::new(1.0, 0.0, 0.0));
        let b = SE3::new(SO3::from_rotation_z(std::f64::consts::FRAC_PI_2), DVec3::ZERO);
        // rotate first, then translate
        let p = (a * b).transform(DVec3::X);
        assert!((p - DVec3::new(1.0, 1.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_matrix34_roundtrip() {
        let pose = sample_pose();
        let m = pose.to_matrix34();
        assert_eq!(m[2][3], 480.0);
        let back = SE3::from_matrix34(&m).expect("valid rotation");
        assert_relative_eq!(back.rotation.angle_to(&pose.rotation), 0.0, epsilon = 1e-9);
        assert!((back.translation - pose.translation).length() < 1e-12);
    }

    #[test]
    fn test_from_matrix34_rejects_invalid() {
        let scaled = [
            [2.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ];
        assert!(SE3::from_matrix34(&scaled).is_none());

        let reflection = [
            [-1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ];
        assert!(SE3::from_matrix34(&reflection).is_none());

        let mut nan = SE3::IDENTITY.to_matrix34();
        nan[1][3] = f64::NAN;
        assert!(SE3::from_matrix34(&nan).is_none());
    }
}
