use std::ops::Mul;

use glam::{DMat3, DQuat, DVec3};

/// Rotation in 3D backed by a unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SO3 {
    /// The unit quaternion representing the rotation.
    pub q: DQuat,
}

impl Default for SO3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl SO3 {
    /// The identity rotation.
    pub const IDENTITY: Self = Self { q: DQuat::IDENTITY };

    /// Create a rotation from a quaternion. The quaternion is normalized.
    pub fn from_quaternion(quat: DQuat) -> Self {
        Self {
            q: quat.normalize(),
        }
    }

    /// Create a rotation from a 3x3 rotation matrix.
    pub fn from_matrix(mat: &DMat3) -> Self {
        Self {
            q: DQuat::from_mat3(mat).normalize(),
        }
    }

    /// Create a rotation from a unit axis and an angle in radians.
    pub fn from_axis_angle(axis: DVec3, angle: f64) -> Self {
        Self {
            q: DQuat::from_axis_angle(axis.normalize(), angle),
        }
    }

    /// Returns the rotation matrix.
    pub fn matrix(&self) -> DMat3 {
        DMat3::from_quat(self.q)
    }

    /// Returns the inverse rotation.
    pub fn inverse(&self) -> Self {
        Self {
            q: self.q.conjugate(),
        }
    }

    /// Rotate a point.
    pub fn transform(&self, point: DVec3) -> DVec3 {
        self.q * point
    }

    /// Lie algebra -> Lie group.
    ///
    /// `omega` is the rotation vector (theta-u) of the rotation.
    pub fn exp(omega: DVec3) -> Self {
        let theta = omega.length();
        let half = 0.5 * theta;

        // sin(theta / 2) / theta tends to 1/2 near zero
        let (w, b) = if theta > 1e-10 {
            (half.cos(), half.sin() / theta)
        } else {
            (1.0 - theta * theta / 8.0, 0.5 - theta * theta / 48.0)
        };
        let xyz = omega * b;

        Self {
            q: DQuat::from_xyzw(xyz.x, xyz.y, xyz.z, w).normalize(),
        }
    }

    /// Lie group -> Lie algebra.
    ///
    /// Returns the rotation vector (theta-u) with theta in `[0, pi]`.
    pub fn log(&self) -> DVec3 {
        // keep the scalar part positive so that theta stays in [0, pi]
        let q = if self.q.w < 0.0 { -self.q } else { self.q };
        let vec = DVec3::new(q.x, q.y, q.z);
        let sin_half = vec.length();

        if sin_half < 1e-10 {
            return vec * 2.0 / q.w;
        }

        let theta = 2.0 * sin_half.atan2(q.w);
        vec * (theta / sin_half)
    }

    /// Vector space -> Lie algebra (skew-symmetric matrix).
    pub fn hat(v: DVec3) -> DMat3 {
        DMat3::from_cols(
            DVec3::new(0.0, v.z, -v.y),
            DVec3::new(-v.z, 0.0, v.x),
            DVec3::new(v.y, -v.x, 0.0),
        )
    }

    /// Lie algebra -> vector space.
    pub fn vee(omega: DMat3) -> DVec3 {
        DVec3::new(omega.y_axis.z, omega.z_axis.x, omega.x_axis.y)
    }

    /// Left Jacobian of SO(3), the `V` matrix of the SE(3) exponential.
    pub fn left_jacobian(omega: DVec3) -> DMat3 {
        let theta = omega.length();
        let skew = Self::hat(omega);

        let (a, b) = if theta > 1e-6 {
            let theta_sq = theta * theta;
            (
                (1.0 - theta.cos()) / theta_sq,
                (theta - theta.sin()) / (theta_sq * theta),
            )
        } else {
            (0.5 - theta * theta / 24.0, 1.0 / 6.0 - theta * theta / 120.0)
        };

        DMat3::IDENTITY + skew * a + (skew * skew) * b
    }

    /// Inverse of the left Jacobian of SO(3).
    pub fn left_jacobian_inverse(omega: DVec3) -> DMat3 {
        let theta = omega.length();
        let skew = Self::hat(omega);

        let c = if theta > 1e-6 {
            let half = 0.5 * theta;
            (1.0 - half * half.cos() / half.sin()) / (theta * theta)
        } else {
            1.0 / 12.0 + theta * theta / 720.0
        };

        DMat3::IDENTITY - skew * 0.5 + (skew * skew) * c
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

impl Mul<DVec3> for SO3 {
    type Output = DVec3;

    fn mul(self, rhs: DVec3) -> Self::Output {
        self.transform(rhs)
    }
}
