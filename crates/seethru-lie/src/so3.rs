use std::ops::Mul;

use glam::{DMat3, DQuat, DVec3};

/// Below this half-angle sine the log map switches to its Taylor form.
const SMALL_ANGLE: f64 = 1e-10;

/// A 3D rotation stored as a unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SO3 {
    /// Unit quaternion.
    pub q: DQuat,
}

impl SO3 {
    /// The identity rotation.
    pub const IDENTITY: Self = Self { q: DQuat::IDENTITY };

    /// Create a rotation from a rotation matrix.
    pub fn from_matrix(mat: &DMat3) -> Self {
        Self {
            q: DQuat::from_mat3(mat).normalize(),
        }
    }

    /// Rotation of `angle` radians around the z (optical) axis.
    pub fn from_rotation_z(angle: f64) -> Self {
        Self {
            q: DQuat::from_rotation_z(angle),
        }
    }

    /// Rotation matrix.
    pub fn matrix(&self) -> DMat3 {
        DMat3::from_quat(self.q)
    }

    /// Inverse rotation.
    pub fn inverse(&self) -> Self {
        Self {
            q: self.q.conjugate(),
        }
    }

    /// Rotate a point.
    pub fn transform(&self, p: DVec3) -> DVec3 {
        self.q * p
    }

    /// Lie group -> Lie algebra
    pub fn log(&self) -> DVec3 {
        // q and -q encode the same rotation; pick the short way round
        let q = if self.q.w < 0.0 { -self.q } else { self.q };
        let vec = DVec3::new(q.x, q.y, q.z);
        let sin_half = vec.length();

        if sin_half > SMALL_ANGLE {
            let theta = 2.0 * sin_half.atan2(q.w);
            vec * (theta / sin_half)
        } else {
            vec * (2.0 / q.w)
        }
    }

    /// Rotation angle in radians, in [0, pi].
    pub fn angle(&self) -> f64 {
        self.log().length()
    }

    /// Angle of the relative rotation between `self` and `other`.
    pub fn angle_to(&self, other: &SO3) -> f64 {
        (self.inverse() * *other).angle()
    }
}

impl Mul for SO3 {
    type Output = SO3;

    fn mul(self, rhs: Self) -> Self::Output {
        Self {
            q: (self.q * rhs.q).normalize(),
        }
    }
}
