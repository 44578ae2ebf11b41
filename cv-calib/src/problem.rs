use crate::DistortionMode;
use cv_core::nalgebra::{DMatrix, DVector, Matrix2, Point2, Point3, Vector2, Vector6};
use cv_core::{Pose, WorldToCamera};
use cv_optimize::LeastSquaresProblem;
use cv_pinhole::{CameraIntrinsics, Distortion, IntrinsicModel};

const INTRINSIC_PARAMS: usize = 4;

/// Reprojection error of a planar target seen in several views, over the intrinsics, the
/// lens distortion and one pose per view.
///
/// The parameter vector is `fx fy cx cy k1 k2 p1 p2` (and `k3` with
/// [`DistortionMode::Full`]) followed by the se(3) of every view. Skew is held at zero.
/// Residuals are `observed - projected` in pixels, two per corner.
#[derive(Clone, Debug)]
pub struct CalibrationProblem {
    target: Vec<Point3<f64>>,
    observations: Vec<Vec<Point2<f64>>>,
    model: IntrinsicModel,
    poses: Vec<WorldToCamera>,
    mode: DistortionMode,
}

impl CalibrationProblem {
    /// Every entry of `observations` must have one point per target point, and there must be
    /// one pose per view.
    pub fn new(
        target: Vec<Point3<f64>>,
        observations: Vec<Vec<Point2<f64>>>,
        model: IntrinsicModel,
        poses: Vec<WorldToCamera>,
        mode: DistortionMode,
    ) -> Self {
        debug_assert_eq!(observations.len(), poses.len());
        debug_assert!(observations.iter().all(|o| o.len() == target.len()));
        let mut model = model;
        model.intrinsics.skew = 0.0;
        if mode == DistortionMode::FixK3 {
            model.distortion.k3 = 0.0;
        }
        Self {
            target,
            observations,
            model,
            poses,
            mode,
        }
    }

    pub fn model(&self) -> IntrinsicModel {
        self.model
    }

    pub fn poses(&self) -> &[WorldToCamera] {
        &self.poses
    }

    fn distortion_params(&self) -> usize {
        match self.mode {
            DistortionMode::FixK3 => 4,
            DistortionMode::Full => 5,
        }
    }

    fn pose_offset(&self, view: usize) -> usize {
        INTRINSIC_PARAMS + self.distortion_params() + 6 * view
    }

    pub fn parameter_count(&self) -> usize {
        self.pose_offset(self.poses.len())
    }

    /// Number of observed corners over all views.
    pub fn point_count(&self) -> usize {
        self.observations.iter().map(Vec::len).sum()
    }

    /// Root mean square pixel distance between observed and projected corners.
    pub fn rms(&self) -> f64 {
        let count = self.point_count();
        if count == 0 {
            return 0.0;
        }
        let cost = self
            .residuals()
            .map(|residuals| residuals.norm_squared())
            .unwrap_or(f64::INFINITY);
        (cost / count as f64).sqrt()
    }

    fn corners(&self) -> impl Iterator<Item = (usize, Point3<f64>, Point2<f64>)> + '_ {
        self.observations.iter().enumerate().flat_map(move |(view, observed)| {
            self.target
                .iter()
                .zip(observed)
                .map(move |(&point, &pixel)| (view, point, pixel))
        })
    }
}

impl LeastSquaresProblem for CalibrationProblem {
    fn set_params(&mut self, params: &DVector<f64>) {
        debug_assert_eq!(params.len(), self.parameter_count());
        self.model.intrinsics = CameraIntrinsics::identity()
            .focals(Vector2::new(params[0], params[1]))
            .principal_point(Point2::new(params[2], params[3]));
        let coefficients: Vec<f64> = params
            .rows(INTRINSIC_PARAMS, self.distortion_params())
            .iter()
            .copied()
            .collect();
        self.model.distortion = Distortion::from_coefficients(&coefficients);
        for view in 0..self.poses.len() {
            let se3 = params.fixed_rows::<6>(self.pose_offset(view)).into_owned();
            self.poses[view] = WorldToCamera::from_se3(se3);
        }
    }

    fn params(&self) -> DVector<f64> {
        let CameraIntrinsics {
            focals,
            principal_point,
            ..
        } = self.model.intrinsics;
        let coefficients = self.model.distortion.coefficients();
        let intrinsics = [focals.x, focals.y, principal_point.x, principal_point.y];
        let poses = self.poses.iter().flat_map(|pose| {
            let se3: Vector6<f64> = pose.se3();
            (0..6).map(move |ix| se3[ix])
        });
        DVector::from_iterator(
            self.parameter_count(),
            intrinsics
                .into_iter()
                .chain(coefficients.into_iter().take(self.distortion_params()))
                .chain(poses),
        )
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(DVector::from_iterator(
            2 * self.point_count(),
            self.corners().flat_map(|(view, point, pixel)| {
                let camera_point = self.poses[view].isometry() * point;
                let (projected, _) = self.model.project_jacobian(camera_point);
                let residual = pixel - projected;
                [residual.x, residual.y]
            }),
        ))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let distortion_params = self.distortion_params();
        let focals = self.model.intrinsics.focals;
        let scale = Matrix2::from_diagonal(&focals);
        let mut jacobian = DMatrix::zeros(2 * self.point_count(), self.parameter_count());
        for (ix, (view, point, _)) in self.corners().enumerate() {
            let row = 2 * ix;
            let (camera_point, _, jacobian_pose) = self.poses[view].transform_jacobians(point);
            let (_, jacobian_projection) = self.model.project_jacobian(camera_point);
            let normalized = Point2::new(
                camera_point.x / camera_point.z,
                camera_point.y / camera_point.z,
            );
            let (distorted, _, jacobian_coefficients) =
                self.model.distortion.distort_jacobians(normalized);

            jacobian[(row, 0)] = -distorted.x;
            jacobian[(row + 1, 1)] = -distorted.y;
            jacobian[(row, 2)] = -1.0;
            jacobian[(row + 1, 3)] = -1.0;
            let coefficients = -(scale * jacobian_coefficients);
            jacobian
                .slice_mut((row, INTRINSIC_PARAMS), (2, distortion_params))
                .copy_from(&coefficients.columns(0, distortion_params));
            jacobian
                .fixed_slice_mut::<2, 6>(row, self.pose_offset(view))
                .copy_from(&-(jacobian_projection * jacobian_pose));
        }
        Some(jacobian)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_core::nalgebra::{Rotation3, Vector3};
    use cv_optimize::differentiate_numerically;

    fn problem(mode: DistortionMode) -> CalibrationProblem {
        let target: Vec<Point3<f64>> = (0..20)
            .map(|i| Point3::new((i % 5) as f64, (i / 5) as f64, 0.0))
            .collect();
        let poses = vec![
            WorldToCamera::from_parts(
                Vector3::new(-2.0, -1.5, 9.0),
                Rotation3::from_euler_angles(0.3, -0.2, 0.1),
            ),
            WorldToCamera::from_parts(
                Vector3::new(-2.2, -1.0, 11.0),
                Rotation3::from_euler_angles(-0.2, 0.25, -0.05),
            ),
        ];
        // The observations do not matter for the jacobian.
        let observations = vec![vec![Point2::new(300.0, 200.0); target.len()]; poses.len()];
        let model = IntrinsicModel::new(
            CameraIntrinsics::identity()
                .focals(Vector2::new(700.0, 690.0))
                .principal_point(Point2::new(321.0, 238.0)),
            Distortion {
                k1: -0.12,
                k2: 0.03,
                p1: 0.001,
                p2: -0.0008,
                k3: 0.01,
            },
        );
        CalibrationProblem::new(target, observations, model, poses, mode)
    }

    fn assert_jacobian_matches(mut problem: CalibrationProblem) {
        let analytic = problem.jacobian().unwrap();
        let numeric = differentiate_numerically(&mut problem).unwrap();
        assert_eq!(analytic.shape(), numeric.shape());
        let scale = 1.0 + analytic.amax();
        let difference = (analytic - numeric).amax();
        assert!(difference < 1e-4 * scale, "jacobian difference {}", difference);
    }

    #[test]
    fn jacobian_matches_finite_differences_without_k3() {
        assert_jacobian_matches(problem(DistortionMode::FixK3));
    }

    #[test]
    fn jacobian_matches_finite_differences_with_k3() {
        assert_jacobian_matches(problem(DistortionMode::Full));
    }

    #[test]
    fn fixing_k3_removes_it_from_the_parameters() {
        let fixed = problem(DistortionMode::FixK3);
        let full = problem(DistortionMode::Full);
        assert_eq!(fixed.model().distortion.k3, 0.0);
        assert_eq!(full.parameter_count(), fixed.parameter_count() + 1);
        assert_eq!(fixed.parameter_count(), 8 + 12);
    }
}
