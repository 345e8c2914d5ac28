use glam::{DMat3, DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::error::MbtError;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    /// Width of the image in pixels.
    pub width: usize,
    /// Height of the image in pixels.
    pub height: usize,
}

impl ImageSize {
    /// Returns true if the pixel coordinate lies within the image bounds.
    pub fn contains(&self, p: DVec2) -> bool {
        p.x >= 0.0 && p.y >= 0.0 && p.x < self.width as f64 && p.y < self.height as f64
    }
}

/// Intrinsic parameters of a pinhole camera without distortion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PinholeCamera {
    /// The focal length in the x direction
    pub fx: f64,
    /// The focal length in the y direction
    pub fy: f64,
    /// The x coordinate of the principal point
    pub cx: f64,
    /// The y coordinate of the principal point
    pub cy: f64,
}

impl PinholeCamera {
    /// Create camera intrinsics from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self, MbtError> {
        if !(fx > 0.0 && fy > 0.0) {
            return Err(MbtError::InvalidConfig(format!(
                "focal lengths must be positive, got fx={fx} fy={fy}"
            )));
        }
        Ok(Self { fx, fy, cx, cy })
    }

    /// The intrinsic matrix `K`.
    pub fn intrinsic_matrix(&self) -> DMat3 {
        DMat3::from_cols(
            DVec3::new(self.fx, 0.0, 0.0),
            DVec3::new(0.0, self.fy, 0.0),
            DVec3::new(self.cx, self.cy, 1.0),
        )
    }

    /// The inverse intrinsic matrix `K^-1`.
    pub fn inverse_intrinsic_matrix(&self) -> DMat3 {
        DMat3::from_cols(
            DVec3::new(1.0 / self.fx, 0.0, 0.0),
            DVec3::new(0.0, 1.0 / self.fy, 0.0),
            DVec3::new(-self.cx / self.fx, -self.cy / self.fy, 1.0),
        )
    }

    /// Convert a pixel coordinate to normalized image coordinates.
    #[inline]
    pub fn pixel_to_normalized(&self, p: DVec2) -> DVec2 {
        DVec2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    /// Convert normalized image coordinates to a pixel coordinate.
    #[inline]
    pub fn normalized_to_pixel(&self, x: DVec2) -> DVec2 {
        DVec2::new(x.x * self.fx + self.cx, x.y * self.fy + self.cy)
    }

    /// Project a point expressed in the camera frame.
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project(&self, p_c: DVec3) -> Option<DVec2> {
        if p_c.z <= f64::EPSILON {
            return None;
        }
        Some(self.normalized_to_pixel(DVec2::new(p_c.x / p_c.z, p_c.y / p_c.z)))
    }
}
