#![deny(missing_docs)]
//! Model-based pose tracking from KLT point features.
//!
//! A rigid model made of planar faces is tracked by following point features detected on its
//! visible faces. The motion of the features of each face is explained by the homography
//! induced by the face plane, and the pose is refined by virtual visual servoing with robust
//! weights.
//!
//! # Example
//!
//! ```
//! use glam::DVec3;
//! use kornia_lie::{SE3, SO3};
//! use kornia_mbt::camera::{ImageSize, PinholeCamera};
//! use kornia_mbt::config::TrackerConfig;
//! use kornia_mbt::synthetic::{SyntheticFrame, SyntheticScene, SyntheticTracker};
//! use kornia_mbt::tracker::KltModelTracker;
//! use kornia_mbt::visibility::AngleVisibility;
//!
//! # fn main() -> Result<(), kornia_mbt::error::MbtError> {
//! let camera = PinholeCamera::new(600.0, 600.0, 320.0, 240.0)?;
//! let scene = SyntheticScene::cube(0.1, 5);
//!
//! let mut tracker = KltModelTracker::new(
//!     camera,
//!     TrackerConfig::default(),
//!     SyntheticTracker::new(&scene, camera),
//!     AngleVisibility,
//! )?;
//! for face in scene.faces() {
//!     tracker.add_face(face.clone());
//! }
//!
//! let size = ImageSize { width: 640, height: 480 };
//! let pose = SE3::new(SO3::IDENTITY, DVec3::new(0.0, 0.0, 0.8));
//! tracker.init(&SyntheticFrame { pose, size }, pose)?;
//!
//! let moved = SE3::new(SO3::IDENTITY, DVec3::new(0.01, 0.0, 0.8));
//! let estimate = tracker.track(&SyntheticFrame { pose: moved, size })?;
//! assert!((estimate.translation - moved.translation).length() < 1e-6);
//! # Ok(())
//! # }
//! ```

/// Pinhole camera model.
pub mod camera;

/// Tracker configuration.
pub mod config;

/// Pose covariance estimation.
pub mod covariance;

/// Error types.
pub mod error;

/// Model faces.
pub mod face;

/// Per-face feature bookkeeping and homographies.
pub mod face_points;

/// Feature tracker boundary.
pub mod feature;

/// Planes, polygons and masks.
pub mod geometry;

/// Dense linear algebra helpers.
pub mod linalg;

/// Robust M-estimators.
pub mod robust;

/// Synthetic scenes and feature tracker.
pub mod synthetic;

/// Model-based tracker.
pub mod tracker;

/// Face visibility.
pub mod visibility;

/// Virtual visual servoing pose solver.
pub mod vvs;

pub use error::MbtError;
pub use tracker::{KltModelTracker, TrackingReport};
