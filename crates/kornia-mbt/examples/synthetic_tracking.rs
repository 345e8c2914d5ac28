use argh::FromArgs;
use glam::DVec3;

use kornia_lie::{SE3, SO3};
use kornia_mbt::camera::{ImageSize, PinholeCamera};
use kornia_mbt::config::{OptimizationMethod, TrackerConfig};
use kornia_mbt::synthetic::{SyntheticFrame, SyntheticScene, SyntheticTracker};
use kornia_mbt::visibility::AngleVisibility;
use kornia_mbt::KltModelTracker;

#[derive(FromArgs)]
/// Track a textured cube turning in front of a synthetic camera
struct Args {
    /// number of frames to track
    #[argh(option, short = 'n', default = "30")]
    frames: usize,

    /// number of texture points per face side
    #[argh(option, default = "6")]
    grid: usize,

    /// rotation per frame in degrees
    #[argh(option, default = "2.0")]
    step_deg: f64,

    /// optional path to a json tracker configuration
    #[argh(option)]
    config: Option<std::path::PathBuf>,

    /// use Levenberg-Marquardt instead of Gauss-Newton
    #[argh(switch)]
    lm: bool,

    /// estimate the pose covariance
    #[argh(switch)]
    covariance: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };
    if args.lm {
        config = config.with_optimization(OptimizationMethod::LevenbergMarquardt);
    }
    if args.covariance {
        config = config.with_covariance(true);
    }

    let camera = PinholeCamera::new(600.0, 600.0, 320.0, 240.0)?;
    let size = ImageSize {
        width: 640,
        height: 480,
    };
    let scene = SyntheticScene::cube(0.1, args.grid);

    let mut tracker = KltModelTracker::new(
        camera,
        config,
        SyntheticTracker::new(&scene, camera),
        AngleVisibility,
    )?;
    for face in scene.faces() {
        tracker.add_face(face.clone());
    }

    let pose_at = |frame: usize| {
        let angle = (frame as f64 * args.step_deg).to_radians();
        SE3::new(
            SO3::from_axis_angle(DVec3::new(0.2, 1.0, 0.0).normalize(), angle),
            DVec3::new(0.001 * frame as f64, 0.0, 0.8),
        )
    };

    let start = pose_at(0);
    tracker.init(&SyntheticFrame { pose: start, size }, start)?;

    for frame in 1..=args.frames {
        let truth = pose_at(frame);
        let estimate = tracker.track(&SyntheticFrame { pose: truth, size })?;
        let delta = estimate * truth.inverse();
        let report = tracker.last_report().copied().unwrap_or_default();

        log::info!(
            "frame {frame}: {} points on {} faces, {} iterations, error t={:.2e} r={:.2e}{}",
            report.remaining_points,
            report.faces_used,
            report.iterations,
            delta.translation.length(),
            delta.rotation.log().length(),
            if report.reinitialised { ", new features" } else { "" }
        );

        if let Some(cov) = tracker.covariance() {
            let diag: Vec<String> = (0..6).map(|i| format!("{:.2e}", cov[i][i])).collect();
            log::info!("covariance diagonal: [{}]", diag.join(", "));
        }

        if let Err(e) = tracker.test_tracking() {
            log::warn!("tracking lost at frame {frame}: {e}");
            break;
        }
    }

    println!("final pose: {:?}", tracker.pose());
    Ok(())
}
