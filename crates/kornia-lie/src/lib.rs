#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Kornia Lie Groups
//!
//! Rotations and rigid body transformations in double precision, as used by the pose
//! trackers in the workspace.
//!
//! ## Supported Groups
//!
//! - **SO(3)**: 3D rotation group
//! - **SE(3)**: 3D rigid body transformations (rotation + translation)
//!
//! ## Example
//!
//! ```rust
//! use glam::DVec3;
//! use kornia_lie::se3::SE3;
//!
//! // integrate a camera twist [v, w] over a unit time step
//! let motion = SE3::exp(&[0.0, 0.0, 0.1, 0.0, 0.0, std::f64::consts::FRAC_PI_2]);
//!
//! // apply the motion to a point
//! let p = motion * DVec3::new(1.0, 0.0, 0.0);
//! assert!((p.y - 1.0).abs() < 1e-2);
//! ```

/// Special Euclidean group SE(3) for 3D rigid transformations.
pub mod se3;

/// Special Orthogonal group SO(3) for 3D rotations.
pub mod so3;

pub use se3::SE3;
pub use so3::SO3;
