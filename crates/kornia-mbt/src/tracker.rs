//! Model-based tracking of a planar-faced object from KLT point features.

use glam::{DVec2, DVec3};
use kornia_lie::SE3;
use log::{debug, info, warn};

use crate::camera::{ImageSize, PinholeCamera};
use crate::config::TrackerConfig;
use crate::error::MbtError;
use crate::face::{FaceArena, FaceId};
use crate::face_points::FacePointSet;
use crate::feature::{Feature, FeatureId, FeatureTrack};
use crate::geometry::Mask;
use crate::visibility::{AngleVisibility, VisibilityManager, VisibilityResult};
use crate::vvs::VvsSolver;

/// Minimum number of points accepted by [`KltModelTracker::test_tracking`].
const MIN_TRACKED_POINTS: usize = 10;

/// Minimum number of points for a pose update.
const MIN_SOLVE_POINTS: usize = 4;

/// Summary of the last tracking step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackingReport {
    /// Accepted solver iterations.
    pub iterations: usize,
    /// Points of the used faces at their last initialization.
    pub initial_points: usize,
    /// Points left after outlier removal.
    pub remaining_points: usize,
    /// Faces that took part in the pose update.
    pub faces_used: usize,
    /// Whether new features were detected at the end of the step.
    pub reinitialised: bool,
}

/// Tracks the pose of a model made of planar faces with a point feature tracker.
///
/// Each visible face owns the features detected inside its projection. At every frame the
/// features are tracked, the pose is refined so that the homography induced by each face
/// plane explains their motion, and features with a low robust weight are dropped. New
/// features are detected when too few remain or when a face appears.
pub struct KltModelTracker<T: FeatureTrack, V: VisibilityManager = AngleVisibility> {
    config: TrackerConfig,
    camera: PinholeCamera,
    solver: VvsSolver,
    faces: FaceArena,
    // one set per face, same index as the arena
    point_sets: Vec<FacePointSet>,
    feature_tracker: T,
    visibility: V,
    c_m_o: SE3,
    c0_m_o: SE3,
    ct_t_c0: SE3,
    initialised: bool,
    tracking_started: bool,
    weights: Vec<f64>,
    covariance: Option<[[f64; 6]; 6]>,
    last_report: Option<TrackingReport>,
}

impl<T: FeatureTrack, V: VisibilityManager> KltModelTracker<T, V> {
    /// Create a tracker without faces.
    pub fn new(
        camera: PinholeCamera,
        config: TrackerConfig,
        feature_tracker: T,
        visibility: V,
    ) -> Result<Self, MbtError> {
        config.validate()?;
        Ok(Self {
            solver: VvsSolver::new(&config),
            config,
            camera,
            faces: FaceArena::new(),
            point_sets: Vec::new(),
            feature_tracker,
            visibility,
            c_m_o: SE3::IDENTITY,
            c0_m_o: SE3::IDENTITY,
            ct_t_c0: SE3::IDENTITY,
            initialised: false,
            tracking_started: false,
            weights: Vec::new(),
            covariance: None,
            last_report: None,
        })
    }

    /// Add a planar face given by its vertices in the object frame.
    pub fn add_face(&mut self, vertices: Vec<DVec3>) -> FaceId {
        let id = self.faces.push(vertices);
        self.point_sets
            .push(FacePointSet::new(id, self.config.min_points_per_face));
        id
    }

    /// Include or exclude a face from the tracking.
    pub fn set_face_tracked(&mut self, id: FaceId, tracked: bool) -> Result<(), MbtError> {
        let face = self
            .faces
            .get_mut(id)
            .ok_or_else(|| MbtError::InvalidConfig(format!("unknown face {}", id.0)))?;
        face.tracked = tracked;
        Ok(())
    }

    /// Faces of the model.
    pub fn faces(&self) -> &FaceArena {
        &self.faces
    }

    /// Point set of a face.
    pub fn point_set(&self, id: FaceId) -> Option<&FacePointSet> {
        self.point_sets.get(id.0)
    }

    /// The point feature tracker.
    pub fn feature_tracker(&self) -> &T {
        &self.feature_tracker
    }

    /// Mutable access to the point feature tracker.
    pub fn feature_tracker_mut(&mut self) -> &mut T {
        &mut self.feature_tracker
    }

    /// Current configuration.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Replace the configuration. Takes effect at the next step.
    pub fn set_config(&mut self, config: TrackerConfig) -> Result<(), MbtError> {
        config.validate()?;
        self.solver = VvsSolver::new(&config);
        for set in self.point_sets.iter_mut() {
            set.set_min_points(config.min_points_per_face);
        }
        self.config = config;
        Ok(())
    }

    /// Camera intrinsics.
    pub fn camera(&self) -> &PinholeCamera {
        &self.camera
    }

    /// Replace the camera intrinsics.
    pub fn set_camera(&mut self, camera: PinholeCamera) {
        self.camera = camera;
    }

    /// Current pose of the object in the camera frame.
    pub fn pose(&self) -> SE3 {
        self.c_m_o
    }

    /// Covariance of the last pose update, when enabled in the configuration.
    pub fn covariance(&self) -> Option<&[[f64; 6]; 6]> {
        self.covariance.as_ref()
    }

    /// Robust weights of the last pose update, two per point.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Summary of the last tracking step.
    pub fn last_report(&self) -> Option<&TrackingReport> {
        self.last_report.as_ref()
    }

    /// Observed points of the used faces.
    pub fn current_feature_points(&self) -> Vec<(FaceId, FeatureId, DVec2)> {
        self.faces
            .iter()
            .zip(self.point_sets.iter())
            .filter(|(face, _)| face.is_usable())
            .flat_map(|(face, set)| set.current_points().map(move |(id, p)| (face.id, id, p)))
            .collect()
    }

    /// All the features of the point tracker.
    pub fn klt_image_points(&self) -> Vec<Feature> {
        self.feature_tracker.features()
    }

    /// Fail when too few points are tracked for a reliable pose.
    pub fn test_tracking(&self) -> Result<(), MbtError> {
        let (points, faces) = self
            .faces
            .iter()
            .zip(self.point_sets.iter())
            .filter(|(face, _)| face.is_usable())
            .fold((0, 0), |(p, f), (_, set)| (p + set.current_count(), f + 1));

        if points < MIN_TRACKED_POINTS {
            return Err(MbtError::InsufficientData { points, faces });
        }
        Ok(())
    }

    /// Remove the model and reset the pose to identity. The configuration is kept.
    pub fn reset(&mut self) {
        self.faces.clear();
        self.point_sets.clear();
        self.c_m_o = SE3::IDENTITY;
        self.c0_m_o = SE3::IDENTITY;
        self.ct_t_c0 = SE3::IDENTITY;
        self.initialised = false;
        self.tracking_started = false;
        self.weights.clear();
        self.covariance = None;
        self.last_report = None;
    }

    /// Start tracking from a known pose.
    pub fn init(&mut self, image: &T::Image, c_m_o: SE3) -> Result<(), MbtError> {
        if self.faces.is_empty() {
            return Err(MbtError::ModelNotInitialized);
        }
        let visibility = self.compute_visibility(T::image_size(image), &c_m_o);
        self.reinit_with_visibility(image, c_m_o, visibility.visible)?;
        self.initialised = true;
        Ok(())
    }

    /// Detect new features on the usable faces and make the current pose the reference.
    pub fn reinit(&mut self, image: &T::Image) -> Result<(), MbtError> {
        if !self.initialised {
            return Err(MbtError::ModelNotInitialized);
        }
        self.reinit_at(image, self.c_m_o)
    }

    /// Detect new features at `c_m_o` and make it the current and reference pose.
    ///
    /// The pose is only committed once the detection succeeded.
    fn reinit_at(&mut self, image: &T::Image, c_m_o: SE3) -> Result<(), MbtError> {
        let mut mask = Mask::new(T::image_size(image));
        for face in self.faces.iter().filter(|f| f.is_usable()) {
            if let Some(roi) = face.project(&self.camera, &c_m_o) {
                mask.fill_polygon(&roi, u8::MAX, self.config.mask_border);
            }
        }

        self.feature_tracker.init_tracking(image, &mask)?;
        self.init_point_sets(&c_m_o)?;

        self.c_m_o = c_m_o;
        self.c0_m_o = c_m_o;
        self.ct_t_c0 = SE3::IDENTITY;
        self.tracking_started = false;

        info!(
            "detected {} features on {} faces",
            self.feature_tracker.feature_count(),
            self.faces.iter().filter(|f| f.is_usable()).count()
        );
        Ok(())
    }

    /// Apply `visible` and detect new features at `c_m_o`, restoring the flags on failure.
    fn reinit_with_visibility(
        &mut self,
        image: &T::Image,
        c_m_o: SE3,
        visible: Vec<bool>,
    ) -> Result<(), MbtError> {
        let previous = self.apply_visibility(visible);
        self.reinit_at(image, c_m_o).inspect_err(|_| {
            self.apply_visibility(previous);
        })
    }

    /// Attach the tracker features to the usable faces seen from `c_m_o`.
    fn init_point_sets(&mut self, c_m_o: &SE3) -> Result<(), MbtError> {
        for (face, set) in self.faces.iter().zip(self.point_sets.iter_mut()) {
            if !face.is_usable() {
                set.clear();
                continue;
            }
            match face.project(&self.camera, c_m_o) {
                Some(roi) => set.init(&self.feature_tracker, &roi, face.plane_in(c_m_o)?),
                None => set.clear(),
            }
        }
        Ok(())
    }

    /// Evaluate the face visibility at `c_m_o` without changing the faces.
    fn compute_visibility(&mut self, size: ImageSize, c_m_o: &SE3) -> VisibilityResult {
        self.visibility.compute_visibility(
            size,
            &self.camera,
            c_m_o,
            self.faces.as_slice(),
            self.config.angle_appear_deg.to_radians(),
            self.config.angle_disappear_deg.to_radians(),
        )
    }

    /// Set the visibility flags of the faces and return the previous ones.
    fn apply_visibility(&mut self, visible: Vec<bool>) -> Vec<bool> {
        self.faces
            .iter_mut()
            .zip(visible)
            .map(|(face, visible)| std::mem::replace(&mut face.visible, visible))
            .collect()
    }

    /// Track the model in a new image and return the updated pose.
    ///
    /// On error the pose of the previous step is kept.
    pub fn track(&mut self, image: &T::Image) -> Result<SE3, MbtError> {
        if !self.initialised {
            return Err(MbtError::ModelNotInitialized);
        }

        self.feature_tracker.track(image)?;
        self.tracking_started = true;

        let mut points = 0;
        let mut faces_used = 0;
        for (face, set) in self.faces.iter().zip(self.point_sets.iter_mut()) {
            if !face.is_usable() {
                continue;
            }
            set.compute_nb_detected_current(&self.feature_tracker);
            if set.has_enough_points() {
                points += set.current_count();
                faces_used += 1;
            }
        }

        if points < MIN_SOLVE_POINTS || faces_used == 0 {
            return Err(MbtError::InsufficientData {
                points,
                faces: faces_used,
            });
        }

        let mut active: Vec<&mut FacePointSet> = self
            .faces
            .iter()
            .zip(self.point_sets.iter_mut())
            .filter(|(face, set)| face.is_usable() && set.has_enough_points())
            .map(|(_, set)| set)
            .collect();

        let outcome = self
            .solver
            .refine(&mut active, &self.camera, &self.c0_m_o, self.ct_t_c0)?;

        // outliers, with the row ranges of the solve
        let mut remaining = 0;
        for (k, set) in active.iter_mut().enumerate() {
            let start = outcome.offsets[k];
            let end = outcome
                .offsets
                .get(k + 1)
                .copied()
                .unwrap_or(outcome.weights.len());
            remaining += set.remove_outliers(&outcome.weights[start..end], self.config.outlier_threshold);
        }

        let initial: usize = self
            .faces
            .iter()
            .zip(self.point_sets.iter())
            .filter(|(face, _)| face.is_usable())
            .map(|(_, set)| set.initial_count())
            .sum();

        let reinitialise = if (remaining as f64) < self.config.min_good_fraction * initial as f64
        {
            warn!("{remaining} of {initial} points left, detecting new features");
            self.reinit_at(image, outcome.pose)?;
            true
        } else {
            let visibility = self.compute_visibility(T::image_size(image), &outcome.pose);
            if visibility.changed {
                warn!("face visibility changed, detecting new features");
                self.reinit_with_visibility(image, outcome.pose, visibility.visible)?;
            } else {
                self.apply_visibility(visibility.visible);
                self.c_m_o = outcome.pose;
                self.ct_t_c0 = outcome.ct_t_c0;
            }
            visibility.changed
        };

        self.weights = outcome.weights;
        if outcome.covariance.is_some() {
            self.covariance = outcome.covariance;
        }

        debug!(
            "tracked {points} points on {faces_used} faces in {} iterations, {remaining} kept",
            outcome.iterations
        );
        self.last_report = Some(TrackingReport {
            iterations: outcome.iterations,
            initial_points: initial,
            remaining_points: remaining,
            faces_used,
            reinitialised: reinitialise,
        });

        Ok(self.c_m_o)
    }

    /// Override the pose.
    ///
    /// Before the first tracked frame this initializes the tracker at `cd_m_o`. Afterwards
    /// the tracked features are moved by the homography of each face between the current
    /// pose and `cd_m_o`, keeping their ids, unless a face appears at the new pose, in which
    /// case new features are detected. On error the pose and the face visibility are kept.
    pub fn set_pose(&mut self, image: &T::Image, cd_m_o: SE3) -> Result<(), MbtError> {
        if !self.tracking_started {
            return self.init(image, cd_m_o);
        }

        let visibility = self.compute_visibility(T::image_size(image), &cd_m_o);
        if visibility.changed {
            warn!("face visibility changed at the new pose, detecting new features");
            return self.reinit_with_visibility(image, cd_m_o, visibility.visible);
        }

        let cd_m_c = cd_m_o * self.c_m_o.inverse();
        let mut seeds = Vec::new();
        for (face, set) in self.faces.iter().zip(self.point_sets.iter()) {
            if !face.is_usable() || !set.has_enough_points() {
                continue;
            }
            let plane_c = face.plane_in(&self.c_m_o)?;
            seeds.extend(set.predict_points(&cd_m_c, &plane_c, &self.camera)?);
        }

        self.feature_tracker.init_tracking_with_seeds(image, &seeds)?;

        let previous = self.apply_visibility(visibility.visible);
        if let Err(e) = self.init_point_sets(&cd_m_o) {
            self.apply_visibility(previous);
            return Err(e);
        }
        self.c_m_o = cd_m_o;
        self.c0_m_o = cd_m_o;
        self.ct_t_c0 = SE3::IDENTITY;
        self.tracking_started = false;

        info!("pose overridden, {} features moved", seeds.len());
        Ok(())
    }
}
