//! Pose refinement by virtual visual servoing on face homographies.

use kornia_lie::SE3;
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::camera::PinholeCamera;
use crate::config::{OptimizationMethod, TrackerConfig};
use crate::covariance::covariance_vvs;
use crate::error::MbtError;
use crate::face_points::FacePointSet;
use crate::linalg::{array6_to_matrix, matrix_to_array6, pseudo_inverse, rows_to_matrix};
use crate::robust::{MEstimator, RobustEstimator};

/// Initial Levenberg-Marquardt damping.
const INITIAL_DAMPING: f64 = 0.01;

/// The optimization stops when the damping grows above this value.
const MAX_DAMPING: f64 = 1.0;

/// Result of a pose refinement.
#[derive(Debug, Clone)]
pub struct VvsOutcome {
    /// Refined pose of the object in the camera frame.
    pub pose: SE3,
    /// Refined motion of the camera since the reference pose.
    pub ct_t_c0: SE3,
    /// Robust weight of each residual row at the last accepted iteration.
    pub weights: Vec<f64>,
    /// First residual row of each face, in the order the faces were given.
    pub offsets: Vec<usize>,
    /// Number of accepted iterations.
    pub iterations: usize,
    /// Sum of the weighted residuals at the last accepted iteration.
    pub residual: f64,
    /// Pose covariance, when requested.
    pub covariance: Option<[[f64; 6]; 6]>,
}

/// State restored when a Levenberg-Marquardt step increases the error.
#[derive(Debug, Clone, Copy)]
struct SolverSnapshot {
    pose: SE3,
    ct_t_c0: SE3,
    error: f64,
    // damping of the step taken from this pose
    damping: f64,
}

/// Status of the current pose in the Levenberg-Marquardt loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LmStep {
    /// Reached by a step that has not been rejected.
    Accepted,
    /// The last step was rejected and the snapshot restored, solve again with more damping.
    Resolve,
    /// Reached by a re-solve, the error has not been checked yet.
    Unchecked,
}

/// Gauss-Newton or Levenberg-Marquardt minimization of the homography transfer error.
#[derive(Debug, Clone)]
pub struct VvsSolver {
    gain: f64,
    max_iterations: usize,
    optimization: OptimizationMethod,
    compute_covariance: bool,
    object_jacobian: Option<DMatrix<f64>>,
}

impl VvsSolver {
    /// Create a solver from the tracker configuration.
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            gain: config.gain,
            max_iterations: config.max_iterations,
            optimization: config.optimization,
            compute_covariance: config.compute_covariance,
            object_jacobian: config.object_jacobian.as_ref().map(array6_to_matrix),
        }
    }

    /// Refine the pose from the observed points of `faces`.
    ///
    /// # Arguments
    ///
    /// * `faces` - Point sets taking part in the estimation. Their homography state is updated.
    /// * `camera` - Camera intrinsics.
    /// * `c0_m_o` - Object pose at the reference frame of the point sets.
    /// * `ct_t_c0` - Initial guess of the camera motion since the reference frame.
    ///
    /// # Returns
    ///
    /// The refined pose with the robust weights of the residual rows. With Levenberg-Marquardt
    /// a step that increases the error is never returned: the last accepted pose is kept, and
    /// [`MbtError::DivergedOptimization`] is raised when the damping needed exceeds its ceiling.
    pub fn refine(
        &self,
        faces: &mut [&mut FacePointSet],
        camera: &PinholeCamera,
        c0_m_o: &SE3,
        ct_t_c0: SE3,
    ) -> Result<VvsOutcome, MbtError> {
        let mut offsets = Vec::with_capacity(faces.len());
        let mut rows = 0;
        for face in faces.iter() {
            offsets.push(rows);
            rows += face.rows();
        }
        if rows == 0 {
            return Err(MbtError::InsufficientData {
                points: 0,
                faces: faces.len(),
            });
        }

        let mut robust = RobustEstimator::new(MEstimator::Tukey, 2.0 / camera.fx);

        let mut residual = vec![0.0; rows];
        let mut interaction = vec![[0.0; 6]; rows];
        let mut weights = vec![1.0; rows];

        let mut ct_t_c0 = ct_t_c0;
        let mut pose = ct_t_c0 * *c0_m_o;
        let mut pose_prev = pose;
        let mut snapshot: Option<SolverSnapshot> = None;

        // unweighted quantities kept for the covariance
        let mut error_true = DVector::zeros(0);
        let mut jacobian_true = DMatrix::zeros(0, 6);

        let lm = self.optimization == OptimizationMethod::LevenbergMarquardt;
        let mut step = LmStep::Accepted;
        let mut damping = INITIAL_DAMPING;
        let mut norm_res = 0.0;
        let mut norm_res_prev = -1.0;
        let mut iteration = 0;

        loop {
            let converged = ((norm_res - norm_res_prev) * 1e8) as i64 == 0
                || iteration >= self.max_iterations;
            if converged && !lm {
                break;
            }

            assemble(faces, &ct_t_c0, camera, &mut residual, &mut interaction)?;

            if lm && step != LmStep::Resolve {
                if let Some(snap) = snapshot {
                    let error = weighted_error(&residual, &weights);
                    if error > snap.error {
                        pose = snap.pose;
                        ct_t_c0 = snap.ct_t_c0;
                        if converged && step == LmStep::Accepted {
                            trace!("last step rejected ({error:e} > {:e})", snap.error);
                            break;
                        }
                        damping = snap.damping * 10.0;
                        trace!("step rejected ({error:e} > {:e}), damping {damping}", snap.error);
                        if damping > MAX_DAMPING {
                            return Err(MbtError::DivergedOptimization { damping });
                        }
                        step = LmStep::Resolve;
                        continue;
                    }
                }
                if converged {
                    break;
                }
                step = LmStep::Accepted;
            }
            let resolve = step == LmStep::Resolve;

            robust.compute_weights(&residual, &mut weights);

            let l = rows_to_matrix(&interaction);
            let c_v_o = self
                .object_jacobian
                .as_ref()
                .map(|_| array6_to_matrix(&pose.adjoint()));

            if self.compute_covariance {
                error_true = DVector::from_column_slice(&residual);
                jacobian_true = match (&c_v_o, &self.object_jacobian) {
                    (Some(c_v_o), Some(o_j_o)) => &l * c_v_o * o_j_o,
                    _ => l.clone(),
                };
            }

            let error = weighted_error(&residual, &weights);
            let mut sum = 0.0;
            let mut r = DVector::zeros(rows);
            let mut lw = l;
            for (i, w) in weights.iter().enumerate() {
                r[i] = residual[i] * w;
                sum += r[i];
                for k in 0..6 {
                    lw[(i, k)] *= w;
                }
            }
            // a re-solve starts again from an already counted pose
            if !resolve {
                norm_res_prev = norm_res;
                norm_res = sum;
            }

            let j = match (&c_v_o, &self.object_jacobian) {
                (Some(c_v_o), Some(o_j_o)) => &lw * c_v_o * o_j_o,
                _ => lw,
            };
            let mut jtj = j.transpose() * &j;
            let jtr = j.transpose() * &r;

            if lm {
                for k in 0..6 {
                    jtj[(k, k)] += damping;
                }
            }
            let mut v = pseudo_inverse(&jtj)? * jtr * -self.gain;
            if let Some(c_v_o) = &c_v_o {
                v = c_v_o * v;
            }

            snapshot = Some(SolverSnapshot {
                pose,
                ct_t_c0,
                error,
                damping,
            });
            if lm && iteration != 0 && !resolve {
                damping /= 10.0;
            }
            pose_prev = pose;

            let twist = [v[0], v[1], v[2], v[3], v[4], v[5]];
            ct_t_c0 = SE3::exp(&twist).inverse() * ct_t_c0;
            pose = ct_t_c0 * *c0_m_o;

            trace!(
                "iteration {iteration}: residual {norm_res:e}, error {error:e}, scale {:e}",
                robust.scale()
            );
            if resolve {
                step = LmStep::Unchecked;
            } else {
                iteration += 1;
            }
        }

        let covariance = if self.compute_covariance {
            let cov = covariance_vvs(&pose_prev, &error_true, &jacobian_true, &weights)?;
            Some(matrix_to_array6(&cov))
        } else {
            None
        };

        debug!(
            "pose refined in {} iterations on {} rows ({} faces)",
            iteration,
            rows,
            faces.len()
        );

        Ok(VvsOutcome {
            pose,
            ct_t_c0,
            weights,
            offsets,
            iterations: iteration,
            residual: norm_res,
            covariance,
        })
    }
}

/// Mean of the squared weighted residuals.
fn weighted_error(residual: &[f64], weights: &[f64]) -> f64 {
    let sum: f64 = residual
        .iter()
        .zip(weights)
        .map(|(r, w)| (r * w) * (r * w))
        .sum();
    sum / residual.len() as f64
}

/// Split `data` into consecutive chunks of the given lengths.
fn split_rows<'a, T>(mut data: &'a mut [T], lengths: impl Iterator<Item = usize>) -> Vec<&'a mut [T]> {
    let mut chunks = Vec::new();
    for n in lengths {
        let (head, tail) = std::mem::take(&mut data).split_at_mut(n);
        chunks.push(head);
        data = tail;
    }
    chunks
}

/// Update the homographies and fill the stacked residual and interaction rows, one face per task.
fn assemble(
    faces: &mut [&mut FacePointSet],
    ct_t_c0: &SE3,
    camera: &PinholeCamera,
    residual: &mut [f64],
    interaction: &mut [[f64; 6]],
) -> Result<(), MbtError> {
    faces
        .par_iter_mut()
        .try_for_each(|face| face.compute_homography(ct_t_c0, camera).map(|_| ()))?;

    let residual_chunks = split_rows(residual, faces.iter().map(|f| f.rows()));
    let interaction_chunks = split_rows(interaction, faces.iter().map(|f| f.rows()));

    faces
        .par_iter()
        .zip(residual_chunks)
        .zip(interaction_chunks)
        .try_for_each(|((face, r), l)| face.compute_interaction_and_residual(camera, r, l))
}
