//! Tracker parameters.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MbtError;

/// Minimization scheme used by the pose solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMethod {
    /// Gauss-Newton steps.
    #[default]
    GaussNewton,
    /// Levenberg-Marquardt steps with adaptive damping.
    LevenbergMarquardt,
}

/// Parameters of the model-based KLT tracker.
///
/// Every field has a default, so a partial JSON document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Weight under which a point is dropped after the pose update.
    pub outlier_threshold: f64,
    /// Fraction of the initial points below which features are detected again.
    pub min_good_fraction: f64,
    /// Gain applied to the pose velocity at each iteration.
    pub gain: f64,
    /// Maximum number of solver iterations per frame.
    pub max_iterations: usize,
    /// Pixels removed from the face borders in the detection mask.
    pub mask_border: u32,
    /// Minimization scheme.
    pub optimization: OptimizationMethod,
    /// Compute the pose covariance after each frame.
    pub compute_covariance: bool,
    /// Angle in degrees under which a hidden face becomes visible.
    pub angle_appear_deg: f64,
    /// Angle in degrees above which a visible face is hidden.
    pub angle_disappear_deg: f64,
    /// Minimum number of tracked points for a face to be used.
    pub min_points_per_face: usize,
    /// Jacobian of the object motion, restricting the estimated degrees of freedom.
    ///
    /// Expressed in the object frame, row major.
    pub object_jacobian: Option<[[f64; 6]; 6]>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            outlier_threshold: 0.5,
            min_good_fraction: 0.6,
            gain: 0.8,
            max_iterations: 200,
            mask_border: 5,
            optimization: OptimizationMethod::default(),
            compute_covariance: false,
            angle_appear_deg: 65.0,
            angle_disappear_deg: 75.0,
            min_points_per_face: 4,
            object_jacobian: None,
        }
    }
}

impl TrackerConfig {
    /// Check the parameter ranges.
    pub fn validate(&self) -> Result<(), MbtError> {
        if !(0.0..=1.0).contains(&self.outlier_threshold) {
            return Err(MbtError::InvalidConfig(format!(
                "outlier threshold {} not in [0, 1]",
                self.outlier_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.min_good_fraction) {
            return Err(MbtError::InvalidConfig(format!(
                "good point fraction {} not in [0, 1]",
                self.min_good_fraction
            )));
        }
        if self.gain.is_nan() || self.gain <= 0.0 {
            return Err(MbtError::InvalidConfig(format!(
                "gain must be positive, got {}",
                self.gain
            )));
        }
        if self.max_iterations == 0 {
            return Err(MbtError::InvalidConfig(
                "at least one iteration is required".to_string(),
            ));
        }
        if self.min_points_per_face < 4 {
            return Err(MbtError::InvalidConfig(format!(
                "a face needs at least 4 points, got {}",
                self.min_points_per_face
            )));
        }
        if self.angle_appear_deg > self.angle_disappear_deg {
            return Err(MbtError::InvalidConfig(format!(
                "appear angle {} above disappear angle {}",
                self.angle_appear_deg, self.angle_disappear_deg
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, MbtError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, MbtError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Set the velocity gain.
    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    /// Set the maximum number of solver iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the minimization scheme.
    pub fn with_optimization(mut self, optimization: OptimizationMethod) -> Self {
        self.optimization = optimization;
        self
    }

    /// Enable or disable the covariance computation.
    pub fn with_covariance(mut self, compute_covariance: bool) -> Self {
        self.compute_covariance = compute_covariance;
        self
    }

    /// Set the outlier rejection threshold.
    pub fn with_outlier_threshold(mut self, threshold: f64) -> Self {
        self.outlier_threshold = threshold;
        self
    }

    /// Set the fraction of good points below which the features are detected again.
    pub fn with_min_good_fraction(mut self, fraction: f64) -> Self {
        self.min_good_fraction = fraction;
        self
    }

    /// Set the object motion Jacobian.
    pub fn with_object_jacobian(mut self, jacobian: Option<[[f64; 6]; 6]>) -> Self {
        self.object_jacobian = jacobian;
        self
    }
}
