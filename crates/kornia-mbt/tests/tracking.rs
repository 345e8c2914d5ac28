use glam::DVec3;
use kornia_lie::{SE3, SO3};
use kornia_mbt::camera::{ImageSize, PinholeCamera};
use kornia_mbt::config::TrackerConfig;
use kornia_mbt::error::{FeatureTrackError, MbtError};
use kornia_mbt::feature::{Feature, FeatureTrack};
use kornia_mbt::geometry::Mask;
use kornia_mbt::synthetic::{SyntheticFrame, SyntheticScene, SyntheticTracker};
use kornia_mbt::visibility::AngleVisibility;
use kornia_mbt::KltModelTracker;

const SIZE: ImageSize = ImageSize {
    width: 640,
    height: 480,
};

fn camera() -> PinholeCamera {
    PinholeCamera {
        fx: 600.0,
        fy: 600.0,
        cx: 320.0,
        cy: 240.0,
    }
}

fn frame(pose: SE3) -> SyntheticFrame {
    SyntheticFrame { pose, size: SIZE }
}

/// A single square of side `2 * half` in the plane z = 0, facing the camera.
fn square_scene(half: f64, grid: usize) -> SyntheticScene {
    let mut scene = SyntheticScene::new();
    scene.add_quad(
        [
            DVec3::new(-half, -half, 0.0),
            DVec3::new(-half, half, 0.0),
            DVec3::new(half, half, 0.0),
            DVec3::new(half, -half, 0.0),
        ],
        grid,
    );
    scene
}

fn build(
    scene: &SyntheticScene,
    config: TrackerConfig,
) -> Result<KltModelTracker<SyntheticTracker>, MbtError> {
    let mut tracker = KltModelTracker::new(
        camera(),
        config,
        SyntheticTracker::new(scene, camera()),
        AngleVisibility,
    )?;
    for face in scene.faces() {
        tracker.add_face(face.clone());
    }
    Ok(tracker)
}

fn front_pose(x: f64, y: f64, z: f64) -> SE3 {
    SE3::new(SO3::IDENTITY, DVec3::new(x, y, z))
}

fn assert_pose_close(estimate: &SE3, truth: &SE3, tol: f64) {
    let delta = *estimate * truth.inverse();
    let (dt, dr) = (delta.translation.length(), delta.rotation.log().length());
    assert!(dt < tol, "translation error {dt}");
    assert!(dr < tol, "rotation error {dr}");
}

#[test]
fn init_requires_a_model() -> Result<(), MbtError> {
    let scene = square_scene(0.1, 3);
    let mut tracker = KltModelTracker::new(
        camera(),
        TrackerConfig::default(),
        SyntheticTracker::new(&scene, camera()),
        AngleVisibility,
    )?;
    let pose = front_pose(0.0, 0.0, 0.8);
    assert!(matches!(
        tracker.init(&frame(pose), pose),
        Err(MbtError::ModelNotInitialized)
    ));
    Ok(())
}

#[test]
fn gating_on_point_count() -> Result<(), MbtError> {
    let scene = square_scene(0.1, 2);
    let start = front_pose(0.0, 0.0, 0.8);
    let next = front_pose(0.005, -0.003, 0.8);

    // exactly four points
    let mut tracker = build(&scene, TrackerConfig::default())?;
    tracker.init(&frame(start), start)?;
    assert_eq!(tracker.klt_image_points().len(), 4);
    let pose = tracker.track(&frame(next))?;
    assert_pose_close(&pose, &next, 1e-5);

    // three points
    let mut tracker = build(&scene, TrackerConfig::default())?;
    tracker.init(&frame(start), start)?;
    let lost = tracker.klt_image_points()[1].id;
    tracker.feature_tracker_mut().drop_feature(lost);
    let res = tracker.track(&frame(next));
    assert!(matches!(res, Err(MbtError::InsufficientData { .. })));
    // a failed step keeps the previous pose
    assert_eq!(tracker.pose(), start);
    Ok(())
}

#[test]
fn reinitialises_below_good_fraction() -> Result<(), MbtError> {
    let scene = square_scene(0.15, 10);
    let start = front_pose(0.0, 0.0, 1.0);
    let next = front_pose(0.01, 0.0, 1.0);
    let config = TrackerConfig::default().with_min_good_fraction(0.6);

    let mut tracker = build(&scene, config)?;
    tracker.init(&frame(start), start)?;
    let ids: Vec<_> = tracker.klt_image_points().iter().map(|f| f.id).collect();
    assert_eq!(ids.len(), 100);

    for id in ids.iter().step_by(2).take(45) {
        tracker.feature_tracker_mut().drop_feature(*id);
    }
    let pose = tracker.track(&frame(next))?;
    assert_pose_close(&pose, &next, 1e-5);

    let report = tracker.last_report().copied().unwrap_or_default();
    assert_eq!(report.initial_points, 100);
    assert_eq!(report.remaining_points, 55);
    assert!(report.reinitialised);

    // new detections carry new ids
    let fresh = tracker.klt_image_points();
    assert_eq!(fresh.len(), 100);
    assert!(fresh.iter().all(|f| f.id >= 100));
    Ok(())
}

#[test]
fn keeps_features_above_good_fraction() -> Result<(), MbtError> {
    let scene = square_scene(0.15, 10);
    let start = front_pose(0.0, 0.0, 1.0);
    let next = front_pose(0.0, 0.01, 1.0);

    let mut tracker = build(&scene, TrackerConfig::default())?;
    tracker.init(&frame(start), start)?;
    let ids: Vec<_> = tracker.klt_image_points().iter().map(|f| f.id).collect();
    for id in ids.iter().take(30) {
        tracker.feature_tracker_mut().drop_feature(*id);
    }
    tracker.track(&frame(next))?;

    let report = tracker.last_report().copied().unwrap_or_default();
    assert_eq!(report.remaining_points, 70);
    assert!(!report.reinitialised);
    assert_eq!(tracker.klt_image_points().len(), 70);
    Ok(())
}

#[test]
fn set_pose_keeps_feature_ids() -> Result<(), MbtError> {
    let scene = SyntheticScene::cube(0.1, 5);
    let start = front_pose(0.0, 0.0, 0.8);
    let second = front_pose(0.004, 0.002, 0.8);
    let jump = front_pose(0.03, -0.02, 0.85);

    let mut tracker = build(&scene, TrackerConfig::default())?;
    tracker.init(&frame(start), start)?;
    tracker.track(&frame(second))?;
    let ids_before: Vec<_> = tracker.klt_image_points().iter().map(|f| f.id).collect();

    tracker.set_pose(&frame(jump), jump)?;
    assert_eq!(tracker.pose(), jump);

    let moved = tracker.klt_image_points();
    let ids_after: Vec<_> = moved.iter().map(|f| f.id).collect();
    assert_eq!(ids_before, ids_after);

    // the seeds are the reprojections of the texture at the new pose
    let mut reference = SyntheticTracker::new(&scene, camera());
    let mut mask = Mask::new(SIZE);
    for face in tracker.faces().iter().filter(|f| f.is_usable()) {
        let roi = face.project(&camera(), &jump).expect("face in front");
        mask.fill_polygon(&roi, 255, 0);
    }
    reference.init_tracking(&frame(jump), &mask)?;
    for feature in &moved {
        let nearest = reference
            .features()
            .iter()
            .map(|r| (r.position() - feature.position()).length())
            .fold(f64::INFINITY, f64::min);
        assert!(nearest < 1e-3, "feature {} off by {nearest}", feature.id);
    }

    let target = front_pose(0.035, -0.018, 0.85);
    let pose = tracker.track(&frame(target))?;
    assert_pose_close(&pose, &target, 1e-5);
    assert_eq!(tracker.klt_image_points().len(), ids_before.len());
    Ok(())
}

#[test]
fn set_pose_before_tracking_initialises() -> Result<(), MbtError> {
    let scene = SyntheticScene::cube(0.1, 4);
    let start = front_pose(0.0, 0.0, 0.8);
    let mut tracker = build(&scene, TrackerConfig::default())?;

    tracker.set_pose(&frame(start), start)?;
    assert_eq!(tracker.klt_image_points().len(), 16);
    assert_eq!(tracker.current_feature_points().len(), 16);
    Ok(())
}

#[test]
fn follows_a_rotating_cube() -> Result<(), MbtError> {
    let scene = SyntheticScene::cube(0.1, 5);
    let pose_at = |step: usize| {
        let angle = (step as f64 * 4.0).to_radians();
        SE3::new(
            SO3::from_axis_angle(DVec3::Y, angle),
            DVec3::new(0.002 * step as f64, 0.0, 0.8),
        )
    };

    let mut tracker = build(&scene, TrackerConfig::default())?;
    tracker.init(&frame(pose_at(0)), pose_at(0))?;

    let mut reinitialised = false;
    for step in 1..=12 {
        let truth = pose_at(step);
        let pose = tracker.track(&frame(truth))?;
        assert_pose_close(&pose, &truth, 1e-5);
        tracker.test_tracking()?;
        reinitialised |= tracker.last_report().is_some_and(|r| r.reinitialised);
    }

    // a side face turned towards the camera on the way
    assert!(reinitialised);
    assert!(tracker.faces().iter().filter(|f| f.visible).count() >= 2);
    Ok(())
}

#[test]
fn covariance_after_tracking() -> Result<(), MbtError> {
    let scene = SyntheticScene::cube(0.1, 5);
    let start = front_pose(0.0, 0.0, 0.8);
    let config = TrackerConfig::default().with_covariance(true);
    let mut tracker = build(&scene, config)?;
    tracker.init(&frame(start), start)?;
    assert!(tracker.covariance().is_none());

    tracker.track(&frame(front_pose(0.003, 0.0, 0.8)))?;
    let cov = tracker.covariance().expect("covariance requested");
    assert!((0..6).all(|i| cov[i][i] >= 0.0));
    assert_eq!(tracker.weights().len(), 50);
    Ok(())
}

#[test]
fn too_few_points_fail_the_tracking_test() -> Result<(), MbtError> {
    let scene = square_scene(0.1, 3);
    let start = front_pose(0.0, 0.0, 0.8);
    let mut tracker = build(&scene, TrackerConfig::default())?;
    tracker.init(&frame(start), start)?;
    assert!(matches!(
        tracker.test_tracking(),
        Err(MbtError::InsufficientData { points: 9, faces: 1 })
    ));
    Ok(())
}

/// Synthetic tracker whose detection can be made to fail.
struct FailingTracker {
    inner: SyntheticTracker,
    fail_detection: bool,
}

impl FeatureTrack for FailingTracker {
    type Image = SyntheticFrame;

    fn image_size(image: &SyntheticFrame) -> ImageSize {
        image.size
    }

    fn track(&mut self, image: &SyntheticFrame) -> Result<(), FeatureTrackError> {
        self.inner.track(image)
    }

    fn feature_count(&self) -> usize {
        self.inner.feature_count()
    }

    fn feature(&self, index: usize) -> Option<Feature> {
        self.inner.feature(index)
    }

    fn init_tracking(&mut self, image: &SyntheticFrame, mask: &Mask) -> Result<(), FeatureTrackError> {
        if self.fail_detection {
            return Err(FeatureTrackError("detector unavailable".to_string()));
        }
        self.inner.init_tracking(image, mask)
    }

    fn init_tracking_with_seeds(
        &mut self,
        image: &SyntheticFrame,
        seeds: &[Feature],
    ) -> Result<(), FeatureTrackError> {
        self.inner.init_tracking_with_seeds(image, seeds)
    }
}

fn build_failing(scene: &SyntheticScene) -> Result<KltModelTracker<FailingTracker>, MbtError> {
    let feature_tracker = FailingTracker {
        inner: SyntheticTracker::new(scene, camera()),
        fail_detection: false,
    };
    let mut tracker =
        KltModelTracker::new(camera(), TrackerConfig::default(), feature_tracker, AngleVisibility)?;
    for face in scene.faces() {
        tracker.add_face(face.clone());
    }
    Ok(tracker)
}

#[test]
fn failed_redetection_keeps_the_previous_pose() -> Result<(), MbtError> {
    let scene = square_scene(0.15, 10);
    let start = front_pose(0.0, 0.0, 1.0);
    let mut tracker = build_failing(&scene)?;
    tracker.init(&frame(start), start)?;

    let ids: Vec<_> = tracker.klt_image_points().iter().map(|f| f.id).collect();
    for id in ids.iter().take(50) {
        tracker.feature_tracker_mut().inner.drop_feature(*id);
    }
    tracker.feature_tracker_mut().fail_detection = true;

    let res = tracker.track(&frame(front_pose(0.01, 0.0, 1.0)));
    assert!(matches!(res, Err(MbtError::FeatureTrack(_))));
    assert_eq!(tracker.pose(), start);
    assert!(tracker.last_report().is_none());
    Ok(())
}

#[test]
fn failed_pose_override_keeps_the_face_visibility() -> Result<(), MbtError> {
    let scene = SyntheticScene::cube(0.1, 5);
    let start = front_pose(0.0, 0.0, 0.8);
    let mut tracker = build_failing(&scene)?;
    tracker.init(&frame(start), start)?;
    let pose = tracker.track(&frame(front_pose(0.003, 0.0, 0.8)))?;
    let visible: Vec<bool> = tracker.faces().iter().map(|f| f.visible).collect();
    assert_eq!(visible.iter().filter(|v| **v).count(), 1);

    // a side face turns towards the camera, so the override detects new features
    let turned = SE3::new(
        SO3::from_axis_angle(DVec3::Y, 40f64.to_radians()),
        DVec3::new(0.0, 0.0, 0.8),
    );
    tracker.feature_tracker_mut().fail_detection = true;
    let res = tracker.set_pose(&frame(turned), turned);
    assert!(matches!(res, Err(MbtError::FeatureTrack(_))));

    let after: Vec<bool> = tracker.faces().iter().map(|f| f.visible).collect();
    assert_eq!(after, visible);
    assert_eq!(tracker.pose(), pose);

    tracker.feature_tracker_mut().fail_detection = false;
    tracker.set_pose(&frame(turned), turned)?;
    assert!(tracker.faces().iter().filter(|f| f.visible).count() >= 2);
    assert_eq!(tracker.pose(), turned);
    Ok(())
}
