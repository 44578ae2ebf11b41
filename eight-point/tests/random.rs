use cv_core::{
    nalgebra::{Point3, Rotation3, Vector3},
    sample_consensus::Model,
    CameraPoint, CameraToCamera, FeatureMatch, Pose, Projective,
};
use cv_pinhole::NormalizedKeyPoint;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

const SAMPLE_POINTS: usize = 16;
const RESIDUAL_THRESHOLD: f64 = 1e-8;

const ROT_MAGNITUDE: f64 = 0.2;
const POINT_BOX_SIZE: f64 = 2.0;
const POINT_DISTANCE: f64 = 3.0;

#[test]
fn randomized() {
    let mut rng = Pcg64::from_seed([3; 32]);
    let successes = (0..1000).filter(|_| run_round(&mut rng)).count();
    eprintln!("successes: {}", successes);
    assert!(successes > 950);
}

fn run_round(rng: &mut Pcg64) -> bool {
    let mut success = true;
    let (relative_pose, matches) = some_test_data(rng);
    let eight_point = eight_point::EightPoint::new();
    let essential = match eight_point.from_matches(matches.iter().copied()) {
        Some(essential) => essential,
        None => {
            eprintln!("didn't get any essential matrix");
            return false;
        }
    };
    for m in &matches {
        if essential.residual(m) > RESIDUAL_THRESHOLD {
            success = false;
            eprintln!("failed residual check: {}", essential.residual(m));
        }
    }

    // One of the four decompositions must be the pose that generated the data.
    let truth = relative_pose.isometry();
    let found = essential
        .possible_unscaled_poses(1e-12, 1000)
        .map(|poses| {
            poses.iter().any(|pose| {
                let pose = pose.isometry();
                let rotation_error = (pose.rotation.matrix() - truth.rotation.matrix()).amax();
                let direction = pose
                    .translation
                    .vector
                    .dot(&truth.translation.vector.normalize());
                rotation_error < 1e-6 && direction > 1.0 - 1e-6
            })
        })
        .unwrap_or(false);
    if !found {
        eprintln!("no decomposition matched the generating pose");
    }
    success && found
}

/// Gets a random relative pose and the exact normalized keypoints of random points in both views.
fn some_test_data(rng: &mut Pcg64) -> (CameraToCamera, Vec<FeatureMatch<NormalizedKeyPoint>>) {
    let mut random_vector =
        |rng: &mut Pcg64| Vector3::new(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>());
    let relative_pose = CameraToCamera::from_parts(
        random_vector(rng),
        Rotation3::new(random_vector(rng) * std::f64::consts::PI * 2.0 * ROT_MAGNITUDE),
    );

    let matches = (0..SAMPLE_POINTS)
        .map(|_| {
            let mut a = Point3::from(random_vector(rng) * POINT_BOX_SIZE);
            a.x -= 0.5 * POINT_BOX_SIZE;
            a.y -= 0.5 * POINT_BOX_SIZE;
            a.z += POINT_DISTANCE;
            let a = CameraPoint::from_point(a);
            let b = relative_pose.transform(a);
            FeatureMatch(
                NormalizedKeyPoint::from_camera_point(a).unwrap(),
                NormalizedKeyPoint::from_camera_point(b).unwrap(),
            )
        })
        .collect();

    (relative_pose, matches)
}
