use std::ops::Mul;

use glam::{DMat3, DMat4, DVec3, DVec4};

use crate::so3::SO3;

/// Rigid body transformation in 3D.
///
/// Maps points from a source frame `a` into a destination frame `b`: `p_b = R * p_a + t`.
/// Following the naming used across kornia, a transform written `b_m_a` maps frame `a`
/// coordinates into frame `b`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SE3 {
    /// The rotation part.
    pub rotation: SO3,
    /// The translation part.
    pub translation: DVec3,
}

impl SE3 {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        rotation: SO3::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Create a transform from a rotation and a translation.
    pub fn new(rotation: SO3, translation: DVec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Create a transform from a rotation matrix and a translation.
    pub fn from_matrix_parts(rotation: &DMat3, translation: DVec3) -> Self {
        Self::new(SO3::from_matrix(rotation), translation)
    }

    /// Create a transform from a rotation vector (theta-u) and a translation.
    pub fn from_rotation_vector(theta_u: DVec3, translation: DVec3) -> Self {
        Self::new(SO3::exp(theta_u), translation)
    }

    /// Returns the rotation matrix.
    pub fn rotation_matrix(&self) -> DMat3 {
        self.rotation.matrix()
    }

    /// Returns the homogeneous 4x4 matrix.
    pub fn matrix(&self) -> DMat4 {
        let r = self.rotation.matrix();
        DMat4::from_cols(
            r.x_axis.extend(0.0),
            r.y_axis.extend(0.0),
            r.z_axis.extend(0.0),
            DVec4::new(self.translation.x, self.translation.y, self.translation.z, 1.0),
        )
    }

    /// Returns the inverse transform.
    pub fn inverse(&self) -> Self {
        let inv_rot = self.rotation.inverse();
        let inv_trans = -(inv_rot * self.translation);
        Self::new(inv_rot, inv_trans)
    }

    /// Compose two transforms: `self * other`.
    pub fn compose(&self, other: &SE3) -> Self {
        Self::new(
            self.rotation * other.rotation,
            self.translation + self.rotation * other.translation,
        )
    }

    /// Apply the transform to a point.
    pub fn transform(&self, point: DVec3) -> DVec3 {
        self.rotation * point + self.translation
    }

    /// Lie algebra -> Lie group.
    ///
    /// The twist is ordered `[vx, vy, vz, wx, wy, wz]`, translational part first, and is
    /// integrated over a unit time step.
    pub fn exp(twist: &[f64; 6]) -> Self {
        let v = DVec3::new(twist[0], twist[1], twist[2]);
        let omega = DVec3::new(twist[3], twist[4], twist[5]);

        let rotation = SO3::exp(omega);
        let translation = SO3::left_jacobian(omega) * v;

        Self::new(rotation, translation)
    }

    /// Lie group -> Lie algebra, the inverse of [`SE3::exp`].
    pub fn log(&self) -> [f64; 6] {
        let omega = self.rotation.log();
        let v = SO3::left_jacobian_inverse(omega) * self.translation;
        [v.x, v.y, v.z, omega.x, omega.y, omega.z]
    }

    /// Returns the 6x6 adjoint (velocity twist) matrix as row-major arrays.
    ///
    /// `[[R, [t]x R], [0, R]]`, which maps a twist expressed in the source frame into the
    /// destination frame.
    pub fn adjoint(&self) -> [[f64; 6]; 6] {
        let r = self.rotation.matrix();
        let tr = SO3::hat(self.translation) * r;

        let mut adj = [[0.0; 6]; 6];
        for (i, row) in adj.iter_mut().enumerate().take(3) {
            for j in 0..3 {
                row[j] = r.col(j)[i];
                row[j + 3] = tr.col(j)[i];
            }
        }
        for i in 0..3 {
            for j in 0..3 {
                adj[i + 3][j + 3] = r.col(j)[i];
            }
        }
        adj
    }
}

impl Mul for SE3 {
    type Output = SE3;

    fn mul(self, rhs: Self) -> Self::Output {
        self.compose(&rhs)
    }
}

impl Mul<DVec3> for SE3 {
    type Output = DVec3;

    fn mul(self, rhs: DVec3) -> Self::Output {
        self.transform(rhs)
    }
}
