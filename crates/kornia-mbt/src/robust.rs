//! Robust M-estimation of residual weights.

/// Weight function used by the [`RobustEstimator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MEstimator {
    /// Tukey biweight, redescending to zero for gross outliers.
    #[default]
    Tukey,
    /// Huber weights, linear beyond the inlier band.
    Huber,
}

impl MEstimator {
    /// Tuning constant giving 95% efficiency on gaussian noise.
    pub fn constant(&self) -> f64 {
        match self {
            MEstimator::Tukey => 4.6851,
            MEstimator::Huber => 1.2107,
        }
    }

    /// Weight of a residual already normalized by the scale estimate.
    pub fn weight(&self, u: f64) -> f64 {
        let c = self.constant();
        match self {
            MEstimator::Tukey => {
                if u.abs() > c {
                    0.0
                } else {
                    let r = u / c;
                    let s = 1.0 - r * r;
                    s * s
                }
            }
            MEstimator::Huber => {
                if u.abs() <= c {
                    1.0
                } else {
                    c / u.abs()
                }
            }
        }
    }
}

/// Iteratively reweighted least squares helper.
///
/// The scale is the median absolute deviation of the residuals around their median,
/// floored at `noise_threshold` so that noise-free data keeps unit weights.
#[derive(Debug, Clone)]
pub struct RobustEstimator {
    method: MEstimator,
    noise_threshold: f64,
    scale: f64,
}

impl RobustEstimator {
    /// Consistency factor of the MAD for normally distributed residuals.
    const MAD_TO_SIGMA: f64 = 1.4826;

    /// Create an estimator with the given weight function and scale floor.
    pub fn new(method: MEstimator, noise_threshold: f64) -> Self {
        Self {
            method,
            noise_threshold,
            scale: noise_threshold,
        }
    }

    /// Scale used by the last call to [`RobustEstimator::compute_weights`].
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Compute one weight per residual.
    pub fn compute_weights(&mut self, residuals: &[f64], weights: &mut [f64]) {
        assert_eq!(
            residuals.len(),
            weights.len(),
            "one weight per residual row"
        );
        if residuals.is_empty() {
            return;
        }

        let med = median(&mut residuals.to_vec());
        let deviations: Vec<f64> = residuals.iter().map(|r| (r - med).abs()).collect();
        let mad = median(&mut deviations.clone());

        self.scale = (Self::MAD_TO_SIGMA * mad).max(self.noise_threshold);

        for (w, dev) in weights.iter_mut().zip(deviations.iter()) {
            *w = self.method.weight(dev / self.scale);
        }
    }
}

/// Element of rank `n / 2`, the upper median for even lengths.
fn median(values: &mut [f64]) -> f64 {
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *m
}
