//! Face visibility evaluation.

use kornia_lie::SE3;
use log::debug;

use crate::camera::{ImageSize, PinholeCamera};
use crate::face::Face;

/// Outcome of a visibility evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibilityResult {
    /// Visibility of each face, in arena order.
    pub visible: Vec<bool>,
    /// Set when a change invalidates the current feature sets.
    pub changed: bool,
}

/// Decides which faces of the model are visible at a given pose.
pub trait VisibilityManager {
    /// Evaluate the visibility of `faces` seen from `c_m_o`.
    ///
    /// `angle_appear` and `angle_disappear` are in radians. A hidden face becomes visible
    /// below `angle_appear`, a visible face is hidden above `angle_disappear`.
    fn compute_visibility(
        &mut self,
        size: ImageSize,
        camera: &PinholeCamera,
        c_m_o: &SE3,
        faces: &[Face],
        angle_appear: f64,
        angle_disappear: f64,
    ) -> VisibilityResult;
}

/// Visibility from the angle between the face normal and the viewing direction.
///
/// The face normal follows the vertex order, so model faces are expected to be
/// listed counter-clockwise when seen from outside the object.
#[derive(Debug, Clone, Copy, Default)]
pub struct AngleVisibility;

impl AngleVisibility {
    fn is_face_visible(
        face: &Face,
        size: ImageSize,
        camera: &PinholeCamera,
        c_m_o: &SE3,
        max_angle: f64,
    ) -> bool {
        if !face.is_valid() {
            return false;
        }

        let Some(roi) = face.project(camera, c_m_o) else {
            return false;
        };
        if !roi.iter().any(|p| size.contains(*p)) {
            return false;
        }

        let Ok(plane) = face.plane_in(c_m_o) else {
            return false;
        };

        // direction from the face towards the camera center
        let centroid = face
            .vertices
            .iter()
            .fold(glam::DVec3::ZERO, |acc, v| acc + *c_m_o * *v)
            / face.vertices.len() as f64;
        let to_camera = -centroid.normalize();
        let cos_angle = plane.normal.dot(to_camera).clamp(-1.0, 1.0);

        cos_angle.acos() < max_angle
    }
}

impl VisibilityManager for AngleVisibility {
    fn compute_visibility(
        &mut self,
        size: ImageSize,
        camera: &PinholeCamera,
        c_m_o: &SE3,
        faces: &[Face],
        angle_appear: f64,
        angle_disappear: f64,
    ) -> VisibilityResult {
        let mut result = VisibilityResult {
            visible: Vec::with_capacity(faces.len()),
            changed: false,
        };

        for face in faces {
            let max_angle = if face.visible {
                angle_disappear
            } else {
                angle_appear
            };
            let visible = Self::is_face_visible(face, size, camera, c_m_o, max_angle);
            if visible && !face.visible {
                debug!("face {} appeared", face.id.0);
                result.changed = true;
            }
            result.visible.push(visible);
        }

        result
    }
}
