use cv_core::nalgebra::{DMatrix, DVector, Point2, Point3, Vector6};
use cv_core::{Pose, WorldToCamera};
use cv_pinhole::{CameraIntrinsics, IntrinsicModel};
use itertools::Itertools;
use log::warn;

use crate::LeastSquaresProblem;

/// An undistorted pixel observation of `point` from `view`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BundleObservation {
    pub view: usize,
    pub point: usize,
    pub keypoint: Point2<f64>,
}

/// Joint refinement of camera poses and 3d points over pixel reprojection error.
///
/// The parameter vector holds the se(3) of every view except the first (translation then
/// rotation, six each) followed by the coordinates of every point (three each). The first
/// view stays where it is to fix the gauge. Scale is left free, so it is whatever the
/// initial reconstruction used.
///
/// Each observation contributes two residuals, `observed - projected`, in pixels. Points
/// are projected through the intrinsic matrix alone, so observations must already be
/// undistorted. Any number of views is supported.
#[derive(Clone, Debug)]
pub struct BundleAdjustment {
    model: IntrinsicModel,
    views: Vec<WorldToCamera>,
    points: Vec<Point3<f64>>,
    observations: Vec<BundleObservation>,
}

impl BundleAdjustment {
    /// Observations that refer to a view or point that does not exist are dropped.
    pub fn new(
        intrinsics: CameraIntrinsics,
        views: Vec<WorldToCamera>,
        points: Vec<Point3<f64>>,
        observations: Vec<BundleObservation>,
    ) -> Self {
        let total = observations.len();
        let observations: Vec<BundleObservation> = observations
            .into_iter()
            .filter(|o| o.view < views.len() && o.point < points.len())
            .collect();
        if observations.len() != total {
            warn!(
                "dropped {} bundle adjustment observations with out of range indices",
                total - observations.len()
            );
        }
        Self {
            model: IntrinsicModel::undistorted(intrinsics),
            views,
            points,
            observations,
        }
    }

    pub fn views(&self) -> &[WorldToCamera] {
        &self.views
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn observations(&self) -> &[BundleObservation] {
        &self.observations
    }

    pub fn into_parts(self) -> (Vec<WorldToCamera>, Vec<Point3<f64>>) {
        (self.views, self.points)
    }

    fn free_views(&self) -> usize {
        self.views.len().saturating_sub(1)
    }

    pub fn parameter_count(&self) -> usize {
        6 * self.free_views() + 3 * self.points.len()
    }

    /// The sum of squared pixel residuals at the current state.
    pub fn cost(&self) -> f64 {
        self.residuals()
            .map(|residuals| residuals.norm_squared())
            .unwrap_or(f64::INFINITY)
    }

    /// Root mean square reprojection distance in pixels per observation.
    pub fn rms(&self) -> f64 {
        if self.observations.is_empty() {
            return 0.0;
        }
        (self.cost() / self.observations.len() as f64).sqrt()
    }

    fn point_offset(&self, point: usize) -> usize {
        6 * self.free_views() + 3 * point
    }
}

impl LeastSquaresProblem for BundleAdjustment {
    fn set_params(&mut self, params: &DVector<f64>) {
        debug_assert_eq!(params.len(), self.parameter_count());
        let (pose_params, point_params) = params.as_slice().split_at(6 * self.free_views());
        for (view, se3) in self
            .views
            .iter_mut()
            .skip(1)
            .zip(pose_params.chunks_exact(6))
        {
            *view = WorldToCamera::from_se3(Vector6::from_column_slice(se3));
        }
        for (point, (x, y, z)) in self
            .points
            .iter_mut()
            .zip(point_params.iter().copied().tuples())
        {
            *point = Point3::new(x, y, z);
        }
    }

    fn params(&self) -> DVector<f64> {
        let poses = self.views.iter().skip(1).flat_map(|view| {
            let se3 = view.se3();
            (0..6).map(move |ix| se3[ix])
        });
        let points = self
            .points
            .iter()
            .flat_map(|point| [point.x, point.y, point.z]);
        DVector::from_iterator(self.parameter_count(), poses.chain(points))
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(DVector::from_iterator(
            2 * self.observations.len(),
            self.observations.iter().flat_map(|o| {
                let camera_point = self.views[o.view].isometry() * self.points[o.point];
                let (projected, _) = self.model.project_jacobian(camera_point);
                let residual = o.keypoint - projected;
                [residual.x, residual.y]
            }),
        ))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let mut jacobian = DMatrix::zeros(2 * self.observations.len(), self.parameter_count());
        for (ix, o) in self.observations.iter().enumerate() {
            let (camera_point, jacobian_point, jacobian_pose) =
                self.views[o.view].transform_jacobians(self.points[o.point]);
            let (_, jacobian_projection) = self.model.project_jacobian(camera_point);
            let row = 2 * ix;
            if o.view > 0 {
                jacobian
                    .fixed_slice_mut::<2, 6>(row, 6 * (o.view - 1))
                    .copy_from(&-(jacobian_projection * jacobian_pose));
            }
            jacobian
                .fixed_slice_mut::<2, 3>(row, self.point_offset(o.point))
                .copy_from(&-(jacobian_projection * jacobian_point));
        }
        Some(jacobian)
    }
}
