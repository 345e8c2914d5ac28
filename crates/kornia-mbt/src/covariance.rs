//! Pose covariance of a visual servoing estimate.

use kornia_lie::SE3;
use nalgebra::{DMatrix, DVector, Matrix3};

use crate::error::MbtError;
use crate::linalg::{pseudo_inverse, skew};

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-8 {
        1.0 - x * x / 6.0
    } else {
        x.sin() / x
    }
}

/// Inverse of the interaction matrix of the pose parameters `(t, theta u)`.
fn pose_interaction_inverse(c_m_o: &SE3) -> DMatrix<f64> {
    let theta_u = c_m_o.rotation.log();
    let theta = theta_u.length();
    let u = if theta > f64::EPSILON {
        theta_u / theta
    } else {
        theta_u
    };

    let half = sinc(theta / 2.0);
    let skew_u = skew(u);
    let l_theta_u_inv = -Matrix3::identity()
        - (skew(theta_u / 2.0) * (half * half) - skew_u * skew_u * (1.0 - sinc(theta)));

    let t_skew = skew(c_m_o.translation);
    let upper_right = t_skew * l_theta_u_inv;

    let mut lp_inv = DMatrix::zeros(6, 6);
    for i in 0..3 {
        lp_inv[(i, i)] = -1.0;
        for j in 0..3 {
            lp_inv[(i, j + 3)] = upper_right[(i, j)];
            lp_inv[(i + 3, j + 3)] = l_theta_u_inv[(i, j)];
        }
    }
    lp_inv
}

/// Covariance of the pose estimated by virtual visual servoing.
///
/// # Arguments
///
/// * `c_m_o` - Pose at which the interaction matrix was evaluated.
/// * `delta_s` - Unweighted residual vector.
/// * `ls` - Unweighted interaction matrix, one row per residual.
/// * `weights` - Robust weights, one per residual.
///
/// # Returns
///
/// The `6 x 6` covariance in the `(t, theta u)` parameterization.
pub fn covariance_vvs(
    c_m_o: &SE3,
    delta_s: &DVector<f64>,
    ls: &DMatrix<f64>,
    weights: &[f64],
) -> Result<DMatrix<f64>, MbtError> {
    let m = delta_s.len();
    if ls.nrows() != m || weights.len() != m || ls.ncols() != 6 {
        return Err(MbtError::LinearAlgebra(format!(
            "covariance inputs disagree: {} residuals, {}x{} jacobian, {} weights",
            m,
            ls.nrows(),
            ls.ncols(),
            weights.len()
        )));
    }
    if m <= 6 {
        return Err(MbtError::InsufficientData {
            points: m / 2,
            faces: 0,
        });
    }

    let js = ls * pose_interaction_inverse(c_m_o);
    let delta_p = pseudo_inverse(&js)? * delta_s;

    let w = DMatrix::from_diagonal(&DVector::from_column_slice(weights));
    let wr = &w * (delta_s - &js * &delta_p);
    let sigma2 = wr.norm_squared() / (m - 6) as f64;

    let jtwj = js.transpose() * &w * &js;
    Ok(pseudo_inverse(&jtwj)? * sigma2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    fn jacobian(n: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, 6, |i, j| {
            let x = (i as f64 * 0.37 + j as f64 * 1.3).sin();
            if i % 6 == j {
                x + 2.0
            } else {
                x
            }
        })
    }

    #[test]
    fn test_symmetric_positive() -> Result<(), MbtError> {
        let n = 40;
        let ls = jacobian(n);
        let delta_s = DVector::from_fn(n, |i, _| 1e-3 * ((i * 7 % 11) as f64 - 5.0));
        let weights = vec![1.0; n];
        let pose = SE3::from_rotation_vector(DVec3::new(0.1, -0.2, 0.05), DVec3::new(0.1, 0.0, 1.0));

        let cov = covariance_vvs(&pose, &delta_s, &ls, &weights)?;
        assert_eq!(cov.shape(), (6, 6));
        for i in 0..6 {
            assert!(cov[(i, i)] >= 0.0);
            for j in 0..6 {
                approx::assert_relative_eq!(cov[(i, j)], cov[(j, i)], epsilon = 1e-9);
            }
        }
        Ok(())
    }

    #[test]
    fn test_zero_residual_zero_covariance() -> Result<(), MbtError> {
        let n = 24;
        let cov = covariance_vvs(
            &SE3::IDENTITY,
            &DVector::zeros(n),
            &jacobian(n),
            &vec![1.0; n],
        )?;
        assert!(cov.iter().all(|v| v.abs() < 1e-15));
        Ok(())
    }

    #[test]
    fn test_too_few_rows() {
        let res = covariance_vvs(&SE3::IDENTITY, &DVector::zeros(6), &jacobian(6), &[1.0; 6]);
        assert!(matches!(res, Err(MbtError::InsufficientData { .. })));
    }
}
