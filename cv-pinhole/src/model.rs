use crate::{CameraIntrinsics, Distortion, NormalizedKeyPoint};
use cv_core::nalgebra::{Matrix2, Matrix2x3, Matrix3x4, Point2, Point3};
use cv_core::{CameraModel, ImagePoint, KeyPoint, Pose, WorldToCamera};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A calibrated camera: the intrinsic matrix plus its lens distortion.
///
/// This is produced once by calibration and then only read by pose estimation,
/// triangulation and bundle adjustment.
///
/// ```
/// use cv_core::{KeyPoint, CameraModel};
/// use cv_core::nalgebra::{Point2, Vector2};
/// use cv_pinhole::{CameraIntrinsics, Distortion, IntrinsicModel};
/// let model = IntrinsicModel::new(
///     CameraIntrinsics::identity()
///         .focals(Vector2::new(812.0, 809.0))
///         .principal_point(Point2::new(319.5, 239.5)),
///     Distortion { k1: -0.21, k2: 0.06, p1: 0.0008, p2: -0.0004, k3: 0.0 },
/// );
/// let kp = KeyPoint(Point2::new(102.0, 411.0));
/// let restored = model.uncalibrate(model.calibrate(kp));
/// assert!((restored.0 - kp.0).norm() < 1e-8);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct IntrinsicModel {
    pub intrinsics: CameraIntrinsics,
    pub distortion: Distortion,
}

impl IntrinsicModel {
    pub fn new(intrinsics: CameraIntrinsics, distortion: Distortion) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// A model without lens distortion.
    pub fn undistorted(intrinsics: CameraIntrinsics) -> Self {
        Self::new(intrinsics, Distortion::none())
    }

    /// Projects a point in camera space into the image.
    ///
    /// Returns `None` if the point is not in front of the camera.
    pub fn project(&self, point: Point3<f64>) -> Option<KeyPoint> {
        if point.z <= 0.0 || !point.coords.iter().all(|n| n.is_finite()) {
            return None;
        }
        let normalized = NormalizedKeyPoint(Point2::new(point.x / point.z, point.y / point.z));
        Some(self.uncalibrate(normalized))
    }

    /// Projects a point in camera space and returns the Jacobian of the pixel in respect to
    /// the camera point.
    ///
    /// No check is performed on the depth, so a point behind the camera still produces a
    /// (mirrored) pixel. Optimizers rely on this to keep the residual function smooth.
    pub fn project_jacobian(&self, point: Point3<f64>) -> (Point2<f64>, Matrix2x3<f64>) {
        let z_inv = 1.0 / point.z;
        let normalized = Point2::new(point.x * z_inv, point.y * z_inv);
        let (distorted, jacobian_distortion, _) = self.distortion.distort_jacobians(normalized);
        let CameraIntrinsics {
            focals,
            principal_point,
            skew,
        } = self.intrinsics;
        let pixel = Point2::new(
            focals.x * distorted.x + skew * distorted.y + principal_point.x,
            focals.y * distorted.y + principal_point.y,
        );
        #[rustfmt::skip]
        let jacobian_normalized = Matrix2x3::new(
            z_inv, 0.0,   -normalized.x * z_inv,
            0.0,   z_inv, -normalized.y * z_inv,
        );
        #[rustfmt::skip]
        let jacobian_pixel = Matrix2::new(
            focals.x, skew,
            0.0,      focals.y,
        );
        (
            pixel,
            jacobian_pixel * jacobian_distortion * jacobian_normalized,
        )
    }

    /// Removes the lens distortion from a pixel while staying in pixel units.
    ///
    /// The result is the pixel at which an ideal pinhole camera with the same intrinsic
    /// matrix would have seen the feature.
    pub fn undistort_keypoint<P: ImagePoint>(&self, point: P) -> KeyPoint {
        self.intrinsics.uncalibrate(self.calibrate(point))
    }

    /// The projection matrix `K [R | t]` of a camera at `pose`.
    ///
    /// The projection matrix has no distortion, so it must be used on undistorted keypoints.
    pub fn projection_matrix(&self, pose: WorldToCamera) -> Matrix3x4<f64> {
        self.intrinsics.matrix() * pose.matrix3x4()
    }
}

impl CameraModel for IntrinsicModel {
    type Projection = NormalizedKeyPoint;

    fn calibrate<P>(&self, point: P) -> NormalizedKeyPoint
    where
        P: ImagePoint,
    {
        let NormalizedKeyPoint(distorted) = self.intrinsics.calibrate(point);
        NormalizedKeyPoint(self.distortion.undistort(distorted))
    }

    fn uncalibrate(&self, projection: NormalizedKeyPoint) -> KeyPoint {
        let distorted = self.distortion.distort(projection.0);
        self.intrinsics.uncalibrate(NormalizedKeyPoint(distorted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cv_core::nalgebra::{Rotation3, Vector2, Vector3};

    fn model() -> IntrinsicModel {
        IntrinsicModel::new(
            CameraIntrinsics::identity()
                .focals(Vector2::new(640.0, 655.0))
                .principal_point(Point2::new(320.0, 240.0)),
            Distortion {
                k1: -0.18,
                k2: 0.03,
                p1: 0.0007,
                p2: -0.0011,
                k3: 0.0,
            },
        )
    }

    #[test]
    fn project_rejects_points_behind_the_camera() {
        assert!(model().project(Point3::new(0.1, 0.2, -1.0)).is_none());
        assert!(model().project(Point3::new(0.1, 0.2, 0.0)).is_none());
        assert!(model().project(Point3::new(0.1, 0.2, 3.0)).is_some());
    }

    #[test]
    fn project_jacobian_matches_finite_differences() {
        let model = model();
        let point = Point3::new(0.3, -0.25, 2.2);
        let (pixel, jacobian) = model.project_jacobian(point);
        assert_relative_eq!(pixel, model.project(point).unwrap().0, epsilon = 1e-9);
        let h = 1e-6;
        for i in 0..3 {
            let mut plus = point;
            let mut minus = point;
            plus[i] += h;
            minus[i] -= h;
            let numeric =
                (model.project_jacobian(plus).0 - model.project_jacobian(minus).0) / (2.0 * h);
            assert_relative_eq!(jacobian.column(i).into_owned(), numeric, epsilon = 1e-4);
        }
    }

    #[test]
    fn projection_matrix_agrees_with_undistorted_projection() {
        let model = IntrinsicModel::undistorted(model().intrinsics);
        let pose = WorldToCamera::from_parts(
            Vector3::new(-0.5, 0.1, 0.2),
            Rotation3::from_euler_angles(0.05, -0.1, 0.02),
        );
        let world = Point3::new(0.4, 0.3, 4.0);
        let homogeneous = model.projection_matrix(pose) * world.to_homogeneous();
        let expected = model.project(pose.isometry() * world).unwrap();
        assert_relative_eq!(homogeneous.xy() / homogeneous.z, expected.0.coords, epsilon = 1e-9);
    }

    #[test]
    fn undistorted_keypoint_matches_ideal_pinhole() {
        let model = model();
        let camera_point = Point3::new(-0.6, 0.45, 1.5);
        let observed = model.project(camera_point).unwrap();
        let ideal = IntrinsicModel::undistorted(model.intrinsics)
            .project(camera_point)
            .unwrap();
        assert_relative_eq!(model.undistort_keypoint(observed).0, ideal.0, epsilon = 1e-8);
    }
}
