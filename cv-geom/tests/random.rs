use cv_core::nalgebra::{Matrix3, Matrix3x4, Point3, Rotation3, Vector3};
use cv_geom::triangulation::{reproject, LinearTriangulator};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

const SAMPLE_POINTS: usize = 200;
const REPROJECTION_THRESHOLD: f64 = 1e-6;

const POINT_BOX_SIZE: f64 = 2.0;
const POINT_DISTANCE: f64 = 4.0;

fn projection(k: &Matrix3<f64>, rotation: Rotation3<f64>, t: Vector3<f64>) -> Matrix3x4<f64> {
    let mut rt = Matrix3x4::zeros();
    rt.fixed_slice_mut::<3, 3>(0, 0)
        .copy_from(rotation.matrix());
    rt.set_column(3, &t);
    k * rt
}

#[test]
fn triangulated_points_reproject_onto_observations() {
    let mut rng = Pcg64::from_seed([7; 32]);
    let k = Matrix3::new(820.0, 0.0, 319.5, 0.0, 815.0, 239.5, 0.0, 0.0, 1.0);
    let p1 = projection(&k, Rotation3::identity(), Vector3::zeros());
    let p2 = projection(
        &k,
        Rotation3::from_euler_angles(0.02, -0.12, 0.03),
        Vector3::new(-1.0, 0.05, 0.1),
    );
    let triangulator = LinearTriangulator::new();

    let mut successes = 0;
    for _ in 0..SAMPLE_POINTS {
        let point = Point3::new(
            rng.gen_range(-0.5..0.5) * POINT_BOX_SIZE,
            rng.gen_range(-0.5..0.5) * POINT_BOX_SIZE,
            POINT_DISTANCE + rng.gen_range(0.0..1.0) * POINT_BOX_SIZE,
        );
        let a = reproject(&p1, point).unwrap();
        let b = reproject(&p2, point).unwrap();
        let triangulated = triangulator
            .triangulate(&p1, &p2, a, b)
            .expect("well conditioned point failed to triangulate");
        let error_a = (reproject(&p1, triangulated).unwrap() - a).norm();
        let error_b = (reproject(&p2, triangulated).unwrap() - b).norm();
        if error_a < REPROJECTION_THRESHOLD && error_b < REPROJECTION_THRESHOLD {
            successes += 1;
        } else {
            eprintln!("reprojection errors: {} {}", error_a, error_b);
        }
    }
    assert_eq!(successes, SAMPLE_POINTS);
}
