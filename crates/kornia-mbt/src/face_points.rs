//! Feature points attached to one planar face of the model.

use std::collections::BTreeMap;

use glam::{DMat3, DVec2, DVec3};
use kornia_lie::SE3;

use crate::camera::PinholeCamera;
use crate::error::MbtError;
use crate::face::FaceId;
use crate::feature::{Feature, FeatureId, FeatureTrack};
use crate::geometry::{point_in_polygon, Plane};

/// Where a tracked point was found in the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Current position in pixels.
    pub position: DVec2,
    /// Index of the feature in the feature tracker.
    pub tracker_index: usize,
    /// First row of the point in the face residual block.
    pub row: usize,
}

/// A feature attached to a face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedPoint {
    /// Identifier given by the feature tracker.
    pub id: FeatureId,
    /// Position in pixels when the face was initialized.
    pub reference: DVec2,
    /// Observation in the current frame, `None` when the tracker lost the point.
    pub observation: Option<Observation>,
}

/// Euclidean homography `b_H_a = R - t n^T / d` induced by a plane between two views.
///
/// `plane_a` is expressed in frame `a`. The result is normalized so that `H[2][2] = 1`.
pub fn plane_homography(b_m_a: &SE3, plane_a: &Plane) -> Result<DMat3, MbtError> {
    if plane_a.d.abs() < f64::EPSILON {
        return Err(MbtError::DegenerateGeometry(
            "plane passes through the reference camera center".to_string(),
        ));
    }

    let t = b_m_a.translation;
    let n = plane_a.normal;
    let t_nt = DMat3::from_cols(t * n.x, t * n.y, t * n.z);
    let h = b_m_a.rotation_matrix() - t_nt * (1.0 / plane_a.d);

    let h22 = h.z_axis.z;
    if h22.abs() < f64::EPSILON {
        return Err(MbtError::DegenerateGeometry(
            "homography cannot be normalized".to_string(),
        ));
    }
    Ok(h * (1.0 / h22))
}

/// Map a Euclidean homography to pixel coordinates: `K H K^-1`.
pub fn pixel_homography(h: &DMat3, camera: &PinholeCamera) -> DMat3 {
    camera.intrinsic_matrix() * *h * camera.inverse_intrinsic_matrix()
}

/// Apply a homography to a 2D point.
///
/// Fails when the third homogeneous coordinate is numerically zero.
pub fn apply_homography(h: &DMat3, p: DVec2) -> Result<DVec2, MbtError> {
    let q = *h * DVec3::new(p.x, p.y, 1.0);
    if q.z.abs() < f64::EPSILON {
        return Err(MbtError::DegenerateGeometry(
            "the depth of the point is calculated to zero".to_string(),
        ));
    }
    Ok(DVec2::new(q.x / q.z, q.y / q.z))
}

/// Set of tracked features lying on one face.
///
/// Points are kept ordered by feature id, which fixes the order of the residual rows.
#[derive(Debug, Clone)]
pub struct FacePointSet {
    face: FaceId,
    points: BTreeMap<FeatureId, TrackedPoint>,
    initial_count: usize,
    current_count: usize,
    min_points: usize,
    // plane in the reference camera frame
    reference_plane: Option<Plane>,
    // linearization state, refreshed by `compute_homography`
    homography: DMat3,
    current_plane: Option<Plane>,
}

impl FacePointSet {
    /// Create an empty set for `face`.
    pub fn new(face: FaceId, min_points: usize) -> Self {
        Self {
            face,
            points: BTreeMap::new(),
            initial_count: 0,
            current_count: 0,
            min_points,
            reference_plane: None,
            homography: DMat3::IDENTITY,
            current_plane: None,
        }
    }

    /// The face owning the points.
    pub fn face(&self) -> FaceId {
        self.face
    }

    /// Number of points recorded at initialization.
    pub fn initial_count(&self) -> usize {
        self.initial_count
    }

    /// Number of points observed in the current frame.
    pub fn current_count(&self) -> usize {
        self.current_count
    }

    /// Rows contributed to the residual vector.
    pub fn rows(&self) -> usize {
        2 * self.current_count
    }

    /// Minimum number of observed points for the face to be used.
    pub fn min_points(&self) -> usize {
        self.min_points
    }

    /// Change the minimum number of observed points.
    pub fn set_min_points(&mut self, min_points: usize) {
        self.min_points = min_points;
    }

    /// Returns true when enough points are observed for the face to be used.
    pub fn has_enough_points(&self) -> bool {
        self.current_count >= self.min_points
    }

    /// Returns true if the feature belongs to the face.
    pub fn is_tracked_feature(&self, id: FeatureId) -> bool {
        self.points.contains_key(&id)
    }

    /// Plane of the face in the reference camera frame.
    pub fn reference_plane(&self) -> Option<&Plane> {
        self.reference_plane.as_ref()
    }

    /// All the points of the face, observed or not.
    pub fn points(&self) -> impl Iterator<Item = &TrackedPoint> {
        self.points.values()
    }

    /// Observed points with their current position, in row order.
    pub fn current_points(&self) -> impl Iterator<Item = (FeatureId, DVec2)> + '_ {
        self.points
            .values()
            .filter_map(|p| p.observation.map(|o| (p.id, o.position)))
    }

    /// Drop every point.
    pub fn clear(&mut self) {
        self.points.clear();
        self.initial_count = 0;
        self.current_count = 0;
        self.reference_plane = None;
        self.current_plane = None;
        self.homography = DMat3::IDENTITY;
    }

    /// Take ownership of the tracker features lying inside `roi`.
    ///
    /// `roi` is the face polygon in pixels and `reference_plane` the face plane in the
    /// camera frame of the current pose, which becomes the reference pose of the face.
    pub fn init<T: FeatureTrack>(&mut self, tracker: &T, roi: &[DVec2], reference_plane: Plane) {
        self.clear();

        for (index, feature) in tracker.features().iter().enumerate() {
            let position = feature.position();
            if !point_in_polygon(roi, position) {
                continue;
            }
            self.points.insert(
                feature.id,
                TrackedPoint {
                    id: feature.id,
                    reference: position,
                    observation: Some(Observation {
                        position,
                        tracker_index: index,
                        row: 0,
                    }),
                },
            );
        }

        self.reference_plane = Some(reference_plane);
        self.reindex_rows();
        self.initial_count = self.current_count;
    }

    /// Refresh the observations from the tracker and return the number of observed points.
    pub fn compute_nb_detected_current<T: FeatureTrack>(&mut self, tracker: &T) -> usize {
        for point in self.points.values_mut() {
            point.observation = None;
        }

        for (index, feature) in tracker.features().iter().enumerate() {
            if let Some(point) = self.points.get_mut(&feature.id) {
                point.observation = Some(Observation {
                    position: feature.position(),
                    tracker_index: index,
                    row: 0,
                });
            }
        }

        self.reindex_rows();
        self.current_count
    }

    fn reindex_rows(&mut self) {
        let mut count = 0;
        for obs in self.points.values_mut().filter_map(|p| p.observation.as_mut()) {
            obs.row = 2 * count;
            count += 1;
        }
        self.current_count = count;
    }

    /// Compute the homography between the reference view and the current estimate.
    ///
    /// `ct_t_c0` is the motion accumulated since the reference pose. The Euclidean
    /// homography is kept for the residual computation and the pixel homography
    /// `K H K^-1` is returned.
    pub fn compute_homography(
        &mut self,
        ct_t_c0: &SE3,
        camera: &PinholeCamera,
    ) -> Result<DMat3, MbtError> {
        let plane = self.reference_plane.ok_or(MbtError::ModelNotInitialized)?;
        let h = plane_homography(ct_t_c0, &plane)?;

        self.homography = h;
        self.current_plane = Some(plane.transform(ct_t_c0));

        Ok(pixel_homography(&h, camera))
    }

    /// Write the residual and interaction rows of the observed points.
    ///
    /// For each point the residual is the reference position mapped by the homography minus
    /// the observed position, in normalized coordinates, and the interaction rows are the
    /// image Jacobian of the observed point at the depth given by the face plane.
    /// Both slices must hold exactly [`FacePointSet::rows`] rows.
    pub fn compute_interaction_and_residual(
        &self,
        camera: &PinholeCamera,
        residual: &mut [f64],
        interaction: &mut [[f64; 6]],
    ) -> Result<(), MbtError> {
        assert_eq!(residual.len(), self.rows(), "residual rows of face {}", self.face.0);
        assert_eq!(interaction.len(), self.rows(), "interaction rows of face {}", self.face.0);

        let plane = self.current_plane.ok_or(MbtError::ModelNotInitialized)?;

        for point in self.points.values() {
            let Some(obs) = point.observation else {
                continue;
            };

            let cur = camera.pixel_to_normalized(obs.position);
            let reference = camera.pixel_to_normalized(point.reference);
            let predicted = apply_homography(&self.homography, reference)?;
            let inv_z = plane.inverse_depth(cur.x, cur.y)?;

            let (x, y) = (cur.x, cur.y);
            interaction[obs.row] = [-inv_z, 0.0, x * inv_z, x * y, -(1.0 + x * x), y];
            interaction[obs.row + 1] = [0.0, -inv_z, y * inv_z, 1.0 + y * y, -x * y, -x];

            residual[obs.row] = predicted.x - x;
            residual[obs.row + 1] = predicted.y - y;
        }

        Ok(())
    }

    /// Remove the observed points whose weights are not above `threshold`.
    ///
    /// `weights` holds two entries per observed point, in row order. A point is kept only
    /// when both of its weights exceed the threshold. Returns the remaining point count.
    pub fn remove_outliers(&mut self, weights: &[f64], threshold: f64) -> usize {
        assert_eq!(weights.len(), self.rows(), "weight rows of face {}", self.face.0);

        let outliers: Vec<FeatureId> = self
            .points
            .values()
            .filter_map(|p| {
                let obs = p.observation?;
                let keep = weights[obs.row] > threshold && weights[obs.row + 1] > threshold;
                (!keep).then_some(p.id)
            })
            .collect();

        for id in &outliers {
            self.points.remove(id);
        }
        if !outliers.is_empty() {
            log::trace!("face {}: removed {} outliers", self.face.0, outliers.len());
            self.reindex_rows();
        }
        self.current_count
    }

    /// Predict where the observed points appear after the camera motion `cd_m_c`.
    ///
    /// `plane_c` is the face plane in the current camera frame. The points are mapped by the
    /// pixel homography induced by the plane and keep their ids.
    pub fn predict_points(
        &self,
        cd_m_c: &SE3,
        plane_c: &Plane,
        camera: &PinholeCamera,
    ) -> Result<Vec<Feature>, MbtError> {
        let g = pixel_homography(&plane_homography(cd_m_c, plane_c)?, camera);
        self.current_points()
            .map(|(id, p)| {
                let q = apply_homography(&g, p)?;
                Ok(Feature { id, x: q.x, y: q.y })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::ImageSize;
    use crate::error::FeatureTrackError;
    use crate::geometry::Mask;
    use approx::assert_relative_eq;

    struct FixedTracker(Vec<Feature>);

    impl FeatureTrack for FixedTracker {
        type Image = ();

        fn image_size(_: &()) -> ImageSize {
            ImageSize {
                width: 640,
                height: 480,
            }
        }

        fn track(&mut self, _: &()) -> Result<(), FeatureTrackError> {
            Ok(())
        }

        fn feature_count(&self) -> usize {
            self.0.len()
        }

        fn feature(&self, index: usize) -> Option<Feature> {
            self.0.get(index).copied()
        }

        fn init_tracking(&mut self, _: &(), _: &Mask) -> Result<(), FeatureTrackError> {
            Ok(())
        }

        fn init_tracking_with_seeds(
            &mut self,
            _: &(),
            seeds: &[Feature],
        ) -> Result<(), FeatureTrackError> {
            self.0 = seeds.to_vec();
            Ok(())
        }
    }

    fn camera() -> PinholeCamera {
        PinholeCamera {
            fx: 600.0,
            fy: 600.0,
            cx: 320.0,
            cy: 240.0,
        }
    }

    fn roi() -> Vec<DVec2> {
        vec![
            DVec2::new(100.0, 100.0),
            DVec2::new(500.0, 100.0),
            DVec2::new(500.0, 400.0),
            DVec2::new(100.0, 400.0),
        ]
    }

    // plane z = 2 in the camera frame
    fn plane() -> Plane {
        Plane {
            normal: DVec3::new(0.0, 0.0, -1.0),
            d: 2.0,
        }
    }

    fn tracker() -> FixedTracker {
        FixedTracker(vec![
            Feature { id: 7, x: 150.0, y: 120.0 },
            Feature { id: 3, x: 300.0, y: 200.0 },
            Feature { id: 9, x: 600.0, y: 200.0 },
            Feature { id: 1, x: 420.0, y: 380.0 },
        ])
    }

    #[test]
    fn test_init_keeps_points_inside_roi() {
        let mut set = FacePointSet::new(FaceId(0), 2);
        set.init(&tracker(), &roi(), plane());
        assert_eq!(set.initial_count(), 3);
        assert_eq!(set.current_count(), 3);
        assert!(set.has_enough_points());
        assert!(!set.is_tracked_feature(9));
        let ids: Vec<FeatureId> = set.current_points().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 3, 7]);
    }

    #[test]
    fn test_lost_points_are_not_observed() {
        let mut set = FacePointSet::new(FaceId(0), 3);
        set.init(&tracker(), &roi(), plane());

        let moved = FixedTracker(vec![
            Feature { id: 1, x: 421.0, y: 381.0 },
            Feature { id: 7, x: 151.0, y: 121.0 },
        ]);
        assert_eq!(set.compute_nb_detected_current(&moved), 2);
        assert!(!set.has_enough_points());
        assert_eq!(set.initial_count(), 3);
        assert_eq!(set.rows(), 4);
    }

    #[test]
    fn test_zero_motion_zero_residual() -> Result<(), MbtError> {
        let cam = camera();
        let mut set = FacePointSet::new(FaceId(0), 3);
        set.init(&tracker(), &roi(), plane());
        set.compute_homography(&SE3::IDENTITY, &cam)?;

        let mut residual = vec![1.0; set.rows()];
        let mut interaction = vec![[0.0; 6]; set.rows()];
        set.compute_interaction_and_residual(&cam, &mut residual, &mut interaction)?;
        assert!(residual.iter().all(|r| r.abs() < 1e-15));
        // depth 2 on the plane z = 2
        assert_relative_eq!(interaction[0][0], -0.5, epsilon = 1e-12);
        assert_relative_eq!(interaction[1][1], -0.5, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_remove_outliers() {
        let mut set = FacePointSet::new(FaceId(0), 2);
        set.init(&tracker(), &roi(), plane());
        // ids in row order: 1, 3, 7
        let weights = [1.0, 0.9, 0.2, 1.0, 0.8, 0.7];
        assert_eq!(set.remove_outliers(&weights, 0.5), 2);
        assert!(!set.is_tracked_feature(3));
        let rows: Vec<usize> = set
            .points()
            .filter_map(|p| p.observation.map(|o| o.row))
            .collect();
        assert_eq!(rows, vec![0, 2]);
    }

    #[test]
    fn test_predict_points_translation() -> Result<(), MbtError> {
        let mut set = FacePointSet::new(FaceId(0), 2);
        set.init(&tracker(), &roi(), plane());

        // 10 cm sideways at 2 m depth is 30 px with fx = 600
        let cd_m_c = SE3::new(Default::default(), DVec3::new(0.1, 0.0, 0.0));
        let predicted = set.predict_points(&cd_m_c, &plane(), &camera())?;
        let before: Vec<(FeatureId, DVec2)> = set.current_points().collect();
        assert_eq!(predicted.len(), before.len());
        for (f, (id, p)) in predicted.iter().zip(before) {
            assert_eq!(f.id, id);
            assert_relative_eq!(f.x, p.x + 30.0, epsilon = 1e-9);
            assert_relative_eq!(f.y, p.y, epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_degenerate_homography_point() {
        // last row (0, 1, -1) sends the row y = 1 to infinity
        let h = DMat3::from_cols(
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 1.0),
            DVec3::new(0.0, 0.0, -1.0),
        );
        let res = apply_homography(&h, DVec2::new(0.3, 1.0));
        assert!(matches!(res, Err(MbtError::DegenerateGeometry(_))));
        assert!(apply_homography(&h, DVec2::new(0.3, 0.5)).is_ok());
    }
}
