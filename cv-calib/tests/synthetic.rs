use approx::assert_relative_eq;
use cv_calib::{
    CalibrationError, CalibrationSettings, CalibrationSolver, CalibrationView, DistortionMode,
    PlanarTarget, SolveError,
};
use cv_optimize::TerminationReason;
use cv_core::nalgebra::{Point2, Rotation3, Vector2, Vector3};
use cv_core::{KeyPoint, Pose, WorldToCamera};
use cv_pinhole::{CameraIntrinsics, Distortion, IntrinsicModel};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

const IMAGE_SIZE: (usize, usize) = (640, 480);

fn image_size() -> Vector2<usize> {
    Vector2::new(IMAGE_SIZE.0, IMAGE_SIZE.1)
}

fn camera() -> IntrinsicModel {
    IntrinsicModel::new(
        CameraIntrinsics::identity()
            .focals(Vector2::new(800.0, 780.0))
            .principal_point(Point2::new(325.0, 242.0)),
        Distortion {
            k1: -0.12,
            k2: 0.04,
            p1: 0.0008,
            p2: -0.0005,
            k3: 0.0,
        },
    )
}

/// Poses that look at the middle of a 7x9 board from several tilted directions.
fn poses() -> Vec<WorldToCamera> {
    let center = Vector3::new(3.0, 4.0, 0.0);
    [
        (0.35, -0.15, 0.05, 0.2, -0.1, 15.0),
        (-0.3, 0.25, -0.1, -0.3, 0.2, 16.0),
        (0.2, 0.35, 0.15, 0.1, 0.3, 17.0),
        (-0.25, -0.3, 0.0, 0.0, -0.2, 15.5),
        (0.4, 0.1, -0.2, -0.2, 0.1, 16.5),
        (-0.1, -0.4, 0.1, 0.3, 0.0, 18.0),
        (0.3, 0.3, 0.3, -0.1, -0.3, 17.5),
        (-0.35, 0.05, -0.15, 0.2, 0.2, 14.5),
        (0.15, -0.35, 0.25, -0.3, -0.1, 16.0),
        (-0.2, 0.2, 0.05, 0.0, 0.1, 15.0),
    ]
    .iter()
    .map(|&(rx, ry, rz, ox, oy, distance)| {
        let rotation = Rotation3::from_euler_angles(rx, ry, rz);
        let translation = Vector3::new(ox, oy, distance) - rotation * center;
        WorldToCamera::from_parts(translation, rotation)
    })
    .collect()
}

fn render(target: &PlanarTarget, noise: f64, rng: &mut Pcg64) -> Vec<CalibrationView> {
    let camera = camera();
    poses()
        .into_iter()
        .enumerate()
        .map(|(ix, pose)| {
            let corners = target
                .points()
                .iter()
                .map(|&point| {
                    let pixel = camera.project(pose.isometry() * point).unwrap();
                    let offset = if noise > 0.0 {
                        Vector2::new(rng.gen_range(-noise..noise), rng.gen_range(-noise..noise))
                    } else {
                        Vector2::zeros()
                    };
                    KeyPoint(pixel.0 + offset)
                })
                .collect();
            CalibrationView::new(format!("view-{:02}", ix), corners)
        })
        .collect()
}

#[test]
fn noiseless_views_recover_the_camera() {
    let _ = pretty_env_logger::try_init();
    let mut rng = Pcg64::from_seed([1; 32]);
    let target = PlanarTarget::chessboard(7, 9, 1.0);
    let views = render(&target, 0.0, &mut rng);

    let calibration = CalibrationSolver::new()
        .calibrate(&target, &views, image_size())
        .unwrap();
    let truth = camera();
    let estimated = calibration.model;
    assert_relative_eq!(
        estimated.intrinsics.focals,
        truth.intrinsics.focals,
        max_relative = 1e-3
    );
    assert_relative_eq!(
        estimated.intrinsics.principal_point,
        truth.intrinsics.principal_point,
        max_relative = 1e-3
    );
    assert_relative_eq!(estimated.distortion.k1, truth.distortion.k1, epsilon = 1e-3);
    assert_eq!(estimated.distortion.k3, 0.0);
    assert!(calibration.rms_error < 1e-4, "rms {}", calibration.rms_error);
    assert_eq!(calibration.used_views, 10);
    assert_eq!(calibration.distortion_mode, DistortionMode::FixK3);
    assert_eq!(calibration.poses[3].0, "view-03");
}

#[test]
fn noisy_corners_give_subpixel_error() {
    let _ = pretty_env_logger::try_init();
    let mut rng = Pcg64::from_seed([2; 32]);
    let target = PlanarTarget::chessboard(7, 9, 1.0);
    let views = render(&target, 0.3, &mut rng);

    let calibration = CalibrationSolver::new()
        .calibrate(&target, &views, image_size())
        .unwrap();
    let focals = calibration.model.intrinsics.focals;
    assert!(focals.x > 0.0 && focals.y > 0.0);
    assert_relative_eq!(focals, Vector2::new(800.0, 780.0), max_relative = 0.02);
    assert!(calibration.rms_error < 1.0, "rms {}", calibration.rms_error);
    assert!(calibration.rms_error > 0.0);
}

#[test]
fn incomplete_views_are_skipped() {
    let mut rng = Pcg64::from_seed([3; 32]);
    let target = PlanarTarget::chessboard(7, 9, 1.0);
    let mut views = render(&target, 0.0, &mut rng);
    let mut partial = views[0].clone();
    partial.id = "partial".into();
    partial.corners.pop();
    views.insert(2, partial);

    let calibration = CalibrationSolver::new()
        .calibrate(&target, &views, image_size())
        .unwrap();
    assert_eq!(calibration.used_views, 10);
    assert!(calibration.poses.iter().all(|(id, _)| id != "partial"));
}

#[test]
fn no_complete_views_is_an_error() {
    let target = PlanarTarget::chessboard(7, 9, 1.0);
    let views = vec![
        CalibrationView::new("empty", vec![]),
        CalibrationView::new("short", vec![KeyPoint::new(1.0, 2.0); 10]),
    ];
    let result = CalibrationSolver::new().calibrate(&target, &views, image_size());
    assert_eq!(
        result,
        Err(CalibrationError::NoValidCalibrationImages { total: 2 })
    );
}

#[test]
fn failed_attempt_retries_with_fewer_views() {
    let _ = pretty_env_logger::try_init();
    let mut rng = Pcg64::from_seed([4; 32]);
    let target = PlanarTarget::chessboard(7, 9, 1.0);
    let mut views = render(&target, 0.0, &mut rng);
    // A complete but degenerate view makes the first attempt fail.
    views.push(CalibrationView::new(
        "collapsed",
        vec![KeyPoint::new(320.0, 240.0); target.len()],
    ));

    let calibration = CalibrationSolver::new()
        .calibrate(&target, &views, image_size())
        .unwrap();
    assert_eq!(calibration.distortion_mode, DistortionMode::Full);
    assert_eq!(calibration.used_views, 6);
    assert_eq!(calibration.poses.len(), 6);
    assert_relative_eq!(
        calibration.model.intrinsics.focals.x,
        800.0,
        max_relative = 1e-3
    );
}

#[test]
fn failed_retry_reports_the_cause() {
    let target = PlanarTarget::chessboard(7, 9, 1.0);
    let views = vec![CalibrationView::new(
        "collapsed",
        vec![KeyPoint::new(320.0, 240.0); target.len()],
    )];
    let result = CalibrationSolver::new().calibrate(&target, &views, image_size());
    assert!(matches!(
        result,
        Err(CalibrationError::CalibrationFailed { .. })
    ));
}

#[test]
fn unconverged_solves_are_failures() {
    let mut rng = Pcg64::from_seed([5; 32]);
    let target = PlanarTarget::chessboard(7, 9, 1.0);
    let views = render(&target, 0.3, &mut rng);
    let solver = CalibrationSolver::with_settings(CalibrationSettings {
        max_iterations: 1,
        ..Default::default()
    });
    // Both the first attempt and the retry run out of iterations.
    assert_eq!(
        solver.calibrate(&target, &views, image_size()),
        Err(CalibrationError::CalibrationFailed {
            cause: SolveError::NotConverged(TerminationReason::LostPatience)
        })
    );
}
