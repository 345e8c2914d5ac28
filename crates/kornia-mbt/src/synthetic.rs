//! Synthetic scenes and a feature tracker driven by ground truth.
//!
//! The [`SyntheticTracker`] implements [`FeatureTrack`] by projecting textured model points
//! at the ground truth pose of each [`SyntheticFrame`]. It is meant for tests, benchmarks
//! and demos where no image backend is available.

use std::collections::{BTreeMap, HashSet};

use glam::{DVec2, DVec3};
use kornia_lie::SE3;

use crate::camera::{ImageSize, PinholeCamera};
use crate::error::FeatureTrackError;
use crate::feature::{Feature, FeatureId, FeatureTrack};
use crate::geometry::Mask;

/// A texture point lying on a model face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenePoint {
    /// Position in the object frame.
    pub position: DVec3,
    /// Outward normal of the supporting face, in the object frame.
    pub normal: DVec3,
}

/// Planar model faces with texture points.
#[derive(Debug, Clone, Default)]
pub struct SyntheticScene {
    faces: Vec<Vec<DVec3>>,
    points: Vec<ScenePoint>,
}

impl SyntheticScene {
    /// Create an empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a quadrilateral face and sample `grid x grid` texture points inside it.
    ///
    /// Vertices must be listed so that `(v1 - v0) x (v2 - v0)` points out of the object.
    /// Samples are jittered so that no face has a symmetric point layout.
    pub fn add_quad(&mut self, vertices: [DVec3; 4], grid: usize) {
        let [v0, v1, v2, v3] = vertices;
        let normal = (v1 - v0).cross(v2 - v0).normalize();

        for i in 0..grid {
            for j in 0..grid {
                let jitter_s = 0.3 * (((i * 7 + j * 3) % 5) as f64 / 5.0 - 0.4);
                let jitter_t = 0.3 * (((i * 2 + j * 5) % 7) as f64 / 7.0 - 0.4);
                let s = 0.1 + 0.8 * (i as f64 + 0.5 + jitter_s) / grid as f64;
                let t = 0.1 + 0.8 * (j as f64 + 0.5 + jitter_t) / grid as f64;
                let position = v0 * (1.0 - s) * (1.0 - t)
                    + v1 * s * (1.0 - t)
                    + v2 * s * t
                    + v3 * (1.0 - s) * t;
                self.points.push(ScenePoint { position, normal });
            }
        }
        self.faces.push(vertices.to_vec());
    }

    /// An axis aligned cube of side `2 * half` centered on the object origin.
    pub fn cube(half: f64, grid: usize) -> Self {
        let mut scene = Self::new();
        // outward normal with two tangents such that e1 x e2 = n
        let sides = [
            (DVec3::X, DVec3::Y, DVec3::Z),
            (DVec3::NEG_X, DVec3::Z, DVec3::Y),
            (DVec3::Y, DVec3::Z, DVec3::X),
            (DVec3::NEG_Y, DVec3::X, DVec3::Z),
            (DVec3::Z, DVec3::X, DVec3::Y),
            (DVec3::NEG_Z, DVec3::Y, DVec3::X),
        ];
        for (n, e1, e2) in sides {
            let c = n * half;
            let (a, b) = (e1 * half, e2 * half);
            scene.add_quad([c - a - b, c + a - b, c + a + b, c - a + b], grid);
        }
        scene
    }

    /// Face polygons in the object frame.
    pub fn faces(&self) -> &[Vec<DVec3>] {
        &self.faces
    }

    /// Texture points.
    pub fn points(&self) -> &[ScenePoint] {
        &self.points
    }
}

/// Ground truth image: the pose of the object and the image size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticFrame {
    /// Pose of the object in the camera frame.
    pub pose: SE3,
    /// Size of the image.
    pub size: ImageSize,
}

/// Feature tracker observing the texture points of a [`SyntheticScene`].
///
/// A point is observed when it lies in front of the camera, on a face turned towards the
/// camera, and projects inside the image.
#[derive(Debug, Clone)]
pub struct SyntheticTracker {
    camera: PinholeCamera,
    points: Vec<ScenePoint>,
    // tracked features: id -> scene point index
    sources: BTreeMap<FeatureId, usize>,
    features: Vec<Feature>,
    next_id: FeatureId,
    lost: HashSet<FeatureId>,
    offsets: BTreeMap<FeatureId, DVec2>,
}

impl SyntheticTracker {
    /// Create a tracker for the texture points of `scene`.
    pub fn new(scene: &SyntheticScene, camera: PinholeCamera) -> Self {
        Self {
            camera,
            points: scene.points().to_vec(),
            sources: BTreeMap::new(),
            features: Vec::new(),
            next_id: 0,
            lost: HashSet::new(),
            offsets: BTreeMap::new(),
        }
    }

    /// Lose the feature at the next call to [`FeatureTrack::track`].
    pub fn drop_feature(&mut self, id: FeatureId) {
        self.lost.insert(id);
    }

    /// Offset the tracked position of a feature from its true position.
    pub fn corrupt_feature(&mut self, id: FeatureId, offset: DVec2) {
        self.offsets.insert(id, offset);
    }

    /// Stop corrupting all features.
    pub fn clear_corruptions(&mut self) {
        self.offsets.clear();
    }

    /// Ids of the tracked features.
    pub fn feature_ids(&self) -> Vec<FeatureId> {
        self.features.iter().map(|f| f.id).collect()
    }

    /// Observed position of a scene point, `None` when it is hidden.
    fn observe(&self, index: usize, frame: &SyntheticFrame) -> Option<DVec2> {
        let point = self.points.get(index)?;
        let p_c = frame.pose * point.position;
        let n_c = frame.pose.rotation * point.normal;
        if n_c.dot(-p_c) <= 0.0 {
            return None;
        }
        let uv = self.camera.project(p_c)?;
        frame.size.contains(uv).then_some(uv)
    }

    fn check_size(frame: &SyntheticFrame, size: ImageSize) -> Result<(), FeatureTrackError> {
        if frame.size != size {
            return Err(FeatureTrackError(format!(
                "mask is {}x{} but image is {}x{}",
                size.width, size.height, frame.size.width, frame.size.height
            )));
        }
        Ok(())
    }
}

impl FeatureTrack for SyntheticTracker {
    type Image = SyntheticFrame;

    fn image_size(image: &SyntheticFrame) -> ImageSize {
        image.size
    }

    fn track(&mut self, image: &SyntheticFrame) -> Result<(), FeatureTrackError> {
        let mut features = Vec::with_capacity(self.features.len());
        for feature in &self.features {
            let Some(&index) = self.sources.get(&feature.id) else {
                continue;
            };
            if self.lost.contains(&feature.id) {
                continue;
            }
            let Some(uv) = self.observe(index, image) else {
                continue;
            };
            let uv = uv + self.offsets.get(&feature.id).copied().unwrap_or(DVec2::ZERO);
            features.push(Feature {
                id: feature.id,
                x: uv.x,
                y: uv.y,
            });
        }

        self.sources.retain(|id, _| features.iter().any(|f| f.id == *id));
        self.lost.clear();
        self.features = features;
        Ok(())
    }

    fn feature_count(&self) -> usize {
        self.features.len()
    }

    fn feature(&self, index: usize) -> Option<Feature> {
        self.features.get(index).copied()
    }

    fn init_tracking(&mut self, image: &SyntheticFrame, mask: &Mask) -> Result<(), FeatureTrackError> {
        Self::check_size(image, mask.size())?;

        self.features.clear();
        self.sources.clear();
        for index in 0..self.points.len() {
            let Some(uv) = self.observe(index, image) else {
                continue;
            };
            if mask.at(uv) == 0 {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.sources.insert(id, index);
            self.features.push(Feature { id, x: uv.x, y: uv.y });
        }
        log::debug!("detected {} features", self.features.len());
        Ok(())
    }

    fn init_tracking_with_seeds(
        &mut self,
        _image: &SyntheticFrame,
        seeds: &[Feature],
    ) -> Result<(), FeatureTrackError> {
        // seeds keep their ids, so they keep following the same scene points
        let sources = std::mem::take(&mut self.sources);
        self.features.clear();
        for seed in seeds {
            if let Some(&index) = sources.get(&seed.id) {
                self.sources.insert(seed.id, index);
                self.features.push(*seed);
            }
        }
        Ok(())
    }
}
