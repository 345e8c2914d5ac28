//! Planar faces of the tracked model, stored in an index-addressed arena.

use glam::{DVec2, DVec3};
use kornia_lie::SE3;

use crate::camera::PinholeCamera;
use crate::error::MbtError;
use crate::geometry::Plane;

/// Index of a face inside a [`FaceArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FaceId(pub usize);

/// A planar polygon of the model.
#[derive(Debug, Clone)]
pub struct Face {
    /// Position of the face in the arena.
    pub id: FaceId,
    /// Vertices in the object frame.
    pub vertices: Vec<DVec3>,
    /// Whether the face is currently visible.
    pub visible: bool,
    /// Whether the face takes part in the tracking.
    pub tracked: bool,
}

impl Face {
    /// A face needs at least three vertices to define a plane.
    pub fn is_valid(&self) -> bool {
        self.vertices.len() > 2
    }

    /// Valid, visible and tracked.
    pub fn is_usable(&self) -> bool {
        self.is_valid() && self.visible && self.tracked
    }

    /// Plane of the face expressed in the camera frame of `c_m_o`.
    pub fn plane_in(&self, c_m_o: &SE3) -> Result<Plane, MbtError> {
        if !self.is_valid() {
            return Err(MbtError::DegenerateGeometry(format!(
                "face {} has {} vertices",
                self.id.0,
                self.vertices.len()
            )));
        }
        Plane::from_points(
            *c_m_o * self.vertices[0],
            *c_m_o * self.vertices[1],
            *c_m_o * self.vertices[2],
        )
    }

    /// Project the face polygon into the image.
    ///
    /// Returns `None` when a vertex lies behind the camera.
    pub fn project(&self, camera: &PinholeCamera, c_m_o: &SE3) -> Option<Vec<DVec2>> {
        self.vertices
            .iter()
            .map(|v| camera.project(*c_m_o * *v))
            .collect()
    }
}

/// Owner of all the faces of a model.
#[derive(Debug, Clone, Default)]
pub struct FaceArena {
    faces: Vec<Face>,
}

impl FaceArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a face and return its index. New faces start hidden and tracked.
    pub fn push(&mut self, vertices: Vec<DVec3>) -> FaceId {
        let id = FaceId(self.faces.len());
        self.faces.push(Face {
            id,
            vertices,
            visible: false,
            tracked: true,
        });
        id
    }

    /// Face at `id`.
    pub fn get(&self, id: FaceId) -> Option<&Face> {
        self.faces.get(id.0)
    }

    /// Mutable face at `id`.
    pub fn get_mut(&mut self, id: FaceId) -> Option<&mut Face> {
        self.faces.get_mut(id.0)
    }

    /// All the faces in insertion order.
    pub fn as_slice(&self) -> &[Face] {
        &self.faces
    }

    /// Iterate over the faces in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Face> {
        self.faces.iter()
    }

    /// Iterate mutably over the faces in insertion order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Face> {
        self.faces.iter_mut()
    }

    /// Number of faces.
    pub fn len(&self) -> usize {
        self.faces.len()
    }

    /// Returns true if the arena holds no face.
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Remove every face.
    pub fn clear(&mut self) {
        self.faces.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_push() {
        let mut arena = FaceArena::new();
        let a = arena.push(vec![DVec3::ZERO, DVec3::X, DVec3::Y]);
        let b = arena.push(vec![DVec3::ZERO, DVec3::X]);
        assert_eq!(arena.len(), 2);
        assert_eq!(a, FaceId(0));
        assert!(arena.get(a).is_some_and(|f| f.is_valid() && !f.is_usable()));
        assert!(arena.get(b).is_some_and(|f| !f.is_valid()));
        assert!(arena.get(FaceId(7)).is_none());
    }

    #[test]
    fn test_invalid_face_has_no_plane() {
        let mut arena = FaceArena::new();
        let id = arena.push(vec![DVec3::ZERO, DVec3::X]);
        let face = arena.get(id).expect("face exists");
        assert!(face.plane_in(&SE3::IDENTITY).is_err());
    }

    #[test]
    fn test_project_behind_camera() -> Result<(), MbtError> {
        let cam = PinholeCamera::new(500.0, 500.0, 320.0, 240.0)?;
        let mut arena = FaceArena::new();
        let id = arena.push(vec![
            DVec3::new(-0.1, -0.1, 1.0),
            DVec3::new(0.1, -0.1, 1.0),
            DVec3::new(0.1, 0.1, -1.0),
        ]);
        let face = arena.get(id).expect("face exists");
        assert!(face.project(&cam, &SE3::IDENTITY).is_none());
        Ok(())
    }
}
