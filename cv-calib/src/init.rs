use crate::SolveError;
use cv_core::nalgebra::{Matrix2, Matrix3, Rotation3, Vector2, Vector3, SVD};
use cv_core::{Pose, WorldToCamera};
use cv_pinhole::CameraIntrinsics;

/// Closed-form focal lengths from plane homographies with the principal point fixed at
/// the middle of the image.
///
/// After moving the principal point to the origin, the image of the absolute conic is
/// `diag(1/fx², 1/fy², 1)`. Every homography gives two linear equations on `(1/fx², 1/fy²)`:
/// its first two columns are orthogonal under that conic, and so are their sum and
/// difference (which says the columns have equal norm). All equations are solved together
/// in the least squares sense.
pub fn initial_intrinsics(
    homographies: &[Matrix3<f64>],
    image_size: Vector2<usize>,
) -> Result<CameraIntrinsics, SolveError> {
    let center = CameraIntrinsics::centered(image_size, 1.0).principal_point;
    #[rustfmt::skip]
    let shift = Matrix3::new(
        1.0, 0.0, -center.x,
        0.0, 1.0, -center.y,
        0.0, 0.0, 1.0,
    );

    let mut normal = Matrix2::zeros();
    let mut rhs = Vector2::zeros();
    for homography in homographies {
        let h = shift * homography;
        let first: Vector3<f64> = h.column(0).into_owned();
        let second: Vector3<f64> = h.column(1).into_owned();
        let columns = [
            (first, second),
            ((first + second) * 0.5, (first - second) * 0.5),
        ];
        for (a, b) in columns {
            let (a, b) = (a.normalize(), b.normalize());
            let row = Vector2::new(a.x * b.x, a.y * b.y);
            normal += row * row.transpose();
            rhs += row * -(a.z * b.z);
        }
    }

    let inverse_squares = normal.try_inverse().map(|inverse| inverse * rhs);
    match inverse_squares {
        Some(f) if f.x > 0.0 && f.y > 0.0 && f.iter().all(|n| n.is_finite()) => {
            Ok(CameraIntrinsics::identity()
                .focals(Vector2::new(f.x.recip().sqrt(), f.y.recip().sqrt()))
                .principal_point(center))
        }
        _ => Err(SolveError::IntrinsicInitialization),
    }
}

/// The pose of a planar target on `z = 0` from its homography and the intrinsic matrix.
///
/// `K⁻¹ H` is `λ [r1 r2 t]`. The scale is the inverse of the mean norm of the first two
/// columns and the sign puts the target in front of the camera. The rotation
/// `[r1 r2 r1×r2]` is projected onto the closest rotation matrix.
pub fn planar_pose(
    intrinsics: &CameraIntrinsics,
    homography: &Matrix3<f64>,
) -> Option<WorldToCamera> {
    let m = intrinsics.matrix().try_inverse()? * homography;
    let (m1, m2) = (m.column(0).into_owned(), m.column(1).into_owned());
    let mean_norm = 0.5 * (m1.norm() + m2.norm());
    if !(mean_norm > 1e-12) {
        return None;
    }
    let mut lambda = mean_norm.recip();
    if m[(2, 2)] * lambda < 0.0 {
        lambda = -lambda;
    }
    let (r1, r2) = (m1 * lambda, m2 * lambda);
    let translation = m.column(2) * lambda;
    let r3 = r1.cross(&r2);
    if !(r3.norm() > 1e-12) {
        return None;
    }

    let approximate = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = SVD::try_new(approximate, true, true, 1e-12, 1000)?;
    let (mut u, v_t) = (svd.u?, svd.v_t?);
    if (u * v_t).determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    let rotation = Rotation3::from_matrix_unchecked(u * v_t);
    let pose = WorldToCamera::from_parts(translation, rotation);
    pose.isometry()
        .translation
        .vector
        .iter()
        .all(|n| n.is_finite())
        .then(|| pose)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cv_core::nalgebra::Point2;

    fn homography(intrinsics: &CameraIntrinsics, pose: WorldToCamera) -> Matrix3<f64> {
        let rt = pose.matrix3x4();
        let plane = Matrix3::from_columns(&[
            rt.column(0).into_owned(),
            rt.column(1).into_owned(),
            rt.column(3).into_owned(),
        ]);
        let h = intrinsics.matrix() * plane;
        h / h[(2, 2)]
    }

    fn poses() -> Vec<WorldToCamera> {
        vec![
            WorldToCamera::from_parts(
                Vector3::new(-3.0, -4.0, 14.0),
                Rotation3::from_euler_angles(0.35, -0.2, 0.05),
            ),
            WorldToCamera::from_parts(
                Vector3::new(-2.5, -3.5, 16.0),
                Rotation3::from_euler_angles(-0.25, 0.3, -0.1),
            ),
            WorldToCamera::from_parts(
                Vector3::new(-3.5, -4.5, 13.0),
                Rotation3::from_euler_angles(0.1, 0.4, 0.2),
            ),
        ]
    }

    #[test]
    fn focals_are_exact_with_centered_principal_point() {
        let image_size = Vector2::new(640, 480);
        let truth = CameraIntrinsics::centered(image_size, 1.0).focals(Vector2::new(810.0, 790.0));
        let homographies: Vec<_> = poses().into_iter().map(|p| homography(&truth, p)).collect();
        let estimated = initial_intrinsics(&homographies, image_size).unwrap();
        assert_relative_eq!(estimated.focals, truth.focals, epsilon = 1e-6);
        assert_eq!(estimated.principal_point, Point2::new(319.5, 239.5));
    }

    #[test]
    fn fronto_parallel_views_cannot_initialize() {
        let image_size = Vector2::new(640, 480);
        let truth = CameraIntrinsics::centered(image_size, 800.0);
        let pose = WorldToCamera::from_parts(Vector3::new(-3.0, -4.0, 14.0), Rotation3::identity());
        let result = initial_intrinsics(&[homography(&truth, pose)], image_size);
        assert!(matches!(result, Err(SolveError::IntrinsicInitialization)));
    }

    #[test]
    fn pose_is_recovered_from_homography() {
        let truth = CameraIntrinsics::centered(Vector2::new(640, 480), 800.0);
        for pose in poses() {
            let estimated = planar_pose(&truth, &homography(&truth, pose)).unwrap();
            assert_relative_eq!(
                estimated.isometry().to_homogeneous(),
                pose.isometry().to_homogeneous(),
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn negated_homography_gives_the_same_pose() {
        let truth = CameraIntrinsics::centered(Vector2::new(640, 480), 800.0);
        let pose = poses()[0];
        let estimated = planar_pose(&truth, &-homography(&truth, pose)).unwrap();
        assert_relative_eq!(
            estimated.isometry().to_homogeneous(),
            pose.isometry().to_homogeneous(),
            epsilon = 1e-9
        );
    }
}
