use thiserror::Error;

/// Error reported by a [`crate::feature::FeatureTrack`] backend.
#[derive(Debug, Error)]
#[error("feature tracker failed: {0}")]
pub struct FeatureTrackError(pub String);

/// Error types for the model-based tracker.
#[derive(Debug, Error)]
pub enum MbtError {
    /// Too few tracked points or usable faces to estimate a pose.
    #[error("not enough data to track: {points} points on {faces} usable faces")]
    InsufficientData {
        /// Number of usable points across all faces.
        points: usize,
        /// Number of faces with enough points.
        faces: usize,
    },

    /// A homography or plane computation hit a numerically zero denominator.
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// The Levenberg-Marquardt damping exceeded its ceiling.
    #[error("optimization diverged (damping {damping})")]
    DivergedOptimization {
        /// Damping value that exceeded the ceiling.
        damping: f64,
    },

    /// Tracking requested before a model and an initial pose were set.
    #[error("model not initialized")]
    ModelNotInitialized,

    /// The tracker configuration is not valid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A linear algebra routine failed.
    #[error("linear algebra failure: {0}")]
    LinearAlgebra(String),

    /// The feature tracking backend failed.
    #[error(transparent)]
    FeatureTrack(#[from] FeatureTrackError),

    /// Failed to read a configuration file.
    #[error("failed to read configuration")]
    Io(#[from] std::io::Error),

    /// Failed to parse a configuration file.
    #[error("failed to parse configuration")]
    ConfigParse(#[from] serde_json::Error),
}
