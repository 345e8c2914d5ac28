//! Small dense linear algebra helpers on top of `nalgebra`.

use glam::DVec3;
use nalgebra::{DMatrix, Matrix3};

use crate::error::MbtError;

/// Moore-Penrose pseudo-inverse with a tolerance relative to the largest singular value.
///
/// Singular values below `max(rows, cols) * EPS * sigma_max` are treated as zero.
pub fn pseudo_inverse(m: &DMatrix<f64>) -> Result<DMatrix<f64>, MbtError> {
    let (rows, cols) = m.shape();
    if rows == 0 || cols == 0 {
        return Ok(DMatrix::zeros(cols, rows));
    }

    let svd = m.clone().svd(true, true);
    let sigma_max = svd.singular_values.max();
    let tol = rows.max(cols) as f64 * f64::EPSILON * sigma_max;

    svd.pseudo_inverse(tol)
        .map_err(|e| MbtError::LinearAlgebra(e.to_string()))
}

/// Stack rows of six entries into an `n x 6` matrix.
pub fn rows_to_matrix(rows: &[[f64; 6]]) -> DMatrix<f64> {
    DMatrix::from_fn(rows.len(), 6, |i, j| rows[i][j])
}

/// Convert a row-major `6 x 6` array.
pub fn array6_to_matrix(a: &[[f64; 6]; 6]) -> DMatrix<f64> {
    DMatrix::from_fn(6, 6, |i, j| a[i][j])
}

/// Convert a `6 x 6` matrix to a row-major array.
pub fn matrix_to_array6(m: &DMatrix<f64>) -> [[f64; 6]; 6] {
    let mut a = [[0.0; 6]; 6];
    for (i, row) in a.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = m[(i, j)];
        }
    }
    a
}

/// Skew-symmetric matrix `[v]x` such that `[v]x w = v x w`.
pub fn skew(v: DVec3) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pseudo_inverse_full_rank() -> Result<(), MbtError> {
        let m = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 2.0, 0.0, 0.0]);
        let p = pseudo_inverse(&m)?;
        assert_eq!(p.shape(), (2, 3));
        assert_relative_eq!(p[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(p[(1, 1)], 0.5, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_pseudo_inverse_rank_deficient() -> Result<(), MbtError> {
        // rank one, the pseudo-inverse must stay finite
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let p = pseudo_inverse(&m)?;
        assert!(p.iter().all(|v| v.is_finite()));
        assert_relative_eq!(p[(0, 0)], 0.25, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_skew() {
        let v = DVec3::new(1.0, 2.0, 3.0);
        let w = DVec3::new(-0.5, 0.1, 2.0);
        let c = v.cross(w);
        let s = skew(v) * nalgebra::Vector3::new(w.x, w.y, w.z);
        assert_relative_eq!(s.x, c.x, epsilon = 1e-12);
        assert_relative_eq!(s.y, c.y, epsilon = 1e-12);
        assert_relative_eq!(s.z, c.z, epsilon = 1e-12);
    }
}
