//! Planes, image polygons and feature detection masks.

use glam::{DVec2, DVec3};
use kornia_lie::SE3;

use crate::camera::ImageSize;
use crate::error::MbtError;

/// A plane `n^T X + d = 0` with unit normal `n`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unit normal of the plane.
    pub normal: DVec3,
    /// Signed offset of the plane.
    pub d: f64,
}

impl Plane {
    /// Build the plane passing through three points.
    ///
    /// The normal follows the right-hand rule on `(p1 - p0) x (p2 - p0)`.
    pub fn from_points(p0: DVec3, p1: DVec3, p2: DVec3) -> Result<Self, MbtError> {
        let n = (p1 - p0).cross(p2 - p0);
        let len = n.length();
        if len < f64::EPSILON {
            return Err(MbtError::DegenerateGeometry(
                "plane points are collinear".to_string(),
            ));
        }
        let normal = n / len;
        Ok(Self {
            normal,
            d: -normal.dot(p0),
        })
    }

    /// Express the plane in the destination frame of `b_m_a`, assuming it is given in `a`.
    pub fn transform(&self, b_m_a: &SE3) -> Self {
        let normal = b_m_a.rotation * self.normal;
        Self {
            normal,
            d: self.d - normal.dot(b_m_a.translation),
        }
    }

    /// Signed distance of a point to the plane.
    pub fn distance(&self, p: DVec3) -> f64 {
        self.normal.dot(p) + self.d
    }

    /// Inverse depth `1/Z` of the point where the normalized ray `(x, y, 1)` meets the plane.
    ///
    /// The plane must be expressed in the camera frame.
    pub fn inverse_depth(&self, x: f64, y: f64) -> Result<f64, MbtError> {
        if self.d.abs() < f64::EPSILON {
            return Err(MbtError::DegenerateGeometry(
                "plane passes through the camera center".to_string(),
            ));
        }
        Ok(-(self.normal.x * x + self.normal.y * y + self.normal.z) / self.d)
    }
}

/// Even-odd test of a point against a closed polygon.
pub fn point_in_polygon(polygon: &[DVec2], p: DVec2) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Axis aligned bounding box `(min, max)` of a polygon.
pub fn bounding_box(polygon: &[DVec2]) -> Option<(DVec2, DVec2)> {
    let first = *polygon.first()?;
    Some(
        polygon
            .iter()
            .fold((first, first), |(lo, hi), p| (lo.min(*p), hi.max(*p))),
    )
}

/// An 8-bit single channel mask, stored row major.
///
/// Non-zero pixels mark where new features may be detected.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    size: ImageSize,
    data: Vec<u8>,
}

impl Mask {
    /// Create an all-zero mask.
    pub fn new(size: ImageSize) -> Self {
        Self {
            size,
            data: vec![0; size.width * size.height],
        }
    }

    /// Size of the mask.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Raw row-major data.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Value at pixel `(x, y)`, `0` outside the mask.
    pub fn get(&self, x: usize, y: usize) -> u8 {
        if x >= self.size.width || y >= self.size.height {
            return 0;
        }
        self.data[y * self.size.width + x]
    }

    /// Value at the pixel containing a sub-pixel coordinate.
    pub fn at(&self, p: DVec2) -> u8 {
        if p.x < 0.0 || p.y < 0.0 {
            return 0;
        }
        self.get(p.x as usize, p.y as usize)
    }

    /// Set the value of pixel `(x, y)`. Out of bounds writes are ignored.
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        if x < self.size.width && y < self.size.height {
            self.data[y * self.size.width + x] = value;
        }
    }

    /// Number of non-zero pixels.
    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|v| **v != 0).count()
    }

    /// Fill the inside of `polygon`, shrunk by `border` pixels, with `value`.
    ///
    /// A pixel is written when it and its four diagonal neighbours at distance `border`
    /// all lie inside the polygon, which keeps detections away from the face edges.
    pub fn fill_polygon(&mut self, polygon: &[DVec2], value: u8, border: u32) {
        let Some((lo, hi)) = bounding_box(polygon) else {
            return;
        };

        let shift = border as f64;
        let x_min = lo.x.floor().max(0.0) as usize;
        let y_min = lo.y.floor().max(0.0) as usize;
        let x_max = (hi.x.ceil().max(0.0) as usize).min(self.size.width.saturating_sub(1));
        let y_max = (hi.y.ceil().max(0.0) as usize).min(self.size.height.saturating_sub(1));

        for y in y_min..=y_max {
            for x in x_min..=x_max {
                let p = DVec2::new(x as f64, y as f64);
                let inside = point_in_polygon(polygon, p)
                    && point_in_polygon(polygon, p + DVec2::new(-shift, -shift))
                    && point_in_polygon(polygon, p + DVec2::new(shift, -shift))
                    && point_in_polygon(polygon, p + DVec2::new(-shift, shift))
                    && point_in_polygon(polygon, p + DVec2::new(shift, shift));
                if inside {
                    self.set(x, y, value);
                }
            }
        }
    }
}
