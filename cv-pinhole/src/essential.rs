use crate::NormalizedKeyPoint;
use cv_core::{
    nalgebra::{Matrix3, Rotation3, Vector3, SVD},
    sample_consensus::Model,
    CameraToCamera, FeatureMatch, Pose,
};
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use float_ord::FloatOrd;

/// This stores an essential matrix, which is satisfied by the following constraint:
///
/// transpose(x') * E * x = 0
///
/// Where `x'` and `x` are homogeneous normalized image coordinates in camera B and
/// camera A respectively. You can get a homogeneous normalized image coordinate with
/// [`NormalizedKeyPoint::homogeneous`].
///
/// For a relative pose `X_b = R X_a + t` the essential matrix is `[t]ₓ R`. Its two
/// non-zero singular values are equal and the third is zero. Estimators only produce
/// an approximation of this, so [`EssentialMatrix::recondition`] projects an estimate
/// back onto the set of valid essential matrices.
///
/// Decomposing the matrix gives four candidate poses. Only one of them puts the
/// observed points in front of both cameras, which is checked by triangulating the
/// correspondences (see the chirality test of the relative pose estimator).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct EssentialMatrix(pub Matrix3<f64>);

/// SVD with the singular values (and their vectors) sorted in decreasing order.
fn sorted_svd(
    matrix: Matrix3<f64>,
    epsilon: f64,
    max_iterations: usize,
) -> Option<(Matrix3<f64>, Vector3<f64>, Matrix3<f64>)> {
    let svd = SVD::try_new(matrix, true, true, epsilon, max_iterations)?;
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut sources = [0, 1, 2];
    sources.sort_unstable_by_key(|&ix| FloatOrd(-svd.singular_values[ix]));
    let mut sorted_u = Matrix3::zeros();
    let mut sorted_v_t = Matrix3::zeros();
    let mut sorted_singular = Vector3::zeros();
    for (dest, &source) in sources.iter().enumerate() {
        sorted_u.column_mut(dest).copy_from(&u.column(source));
        sorted_v_t.row_mut(dest).copy_from(&v_t.row(source));
        sorted_singular[dest] = svd.singular_values[source];
    }
    Some((sorted_u, sorted_singular, sorted_v_t))
}

impl EssentialMatrix {
    /// Can be used to enforce the constraints of an essential matrix to fix it.
    ///
    /// This finds the closest essential matrix in frobenius form. This just means
    /// that the two largest singular values are averaged and the smallest singular
    /// value is forced to zero.
    ///
    /// ```
    /// use cv_core::nalgebra::Matrix3;
    /// use cv_pinhole::EssentialMatrix;
    /// let noisy = EssentialMatrix(Matrix3::new(0.1, -0.9, 0.2, 1.1, 0.05, -0.4, -0.3, 0.35, 0.02));
    /// let fixed = noisy.recondition(1e-12, 1000).unwrap();
    /// let singular = fixed.singular_values();
    /// assert!((singular[0] - singular[1]).abs() < 1e-9);
    /// assert!(singular.min().abs() < 1e-9);
    /// ```
    pub fn recondition(self, epsilon: f64, max_iterations: usize) -> Option<Self> {
        let (u, mut singular, v_t) = sorted_svd(self.0, epsilon, max_iterations)?;
        let mean = (singular[0] + singular[1]) / 2.0;
        singular[0] = mean;
        singular[1] = mean;
        singular[2] = 0.0;
        Some(Self(u * Matrix3::from_diagonal(&singular) * v_t))
    }

    /// Returns two possible rotations for the essential matrix along with a translation
    /// bearing of arbitrary length and sign.
    ///
    /// `epsilon` is the threshold by which the singular value decomposition is considered
    /// complete. It is recommended to set this to no higher than `1e-6`.
    ///
    /// `max_iterations` is the maximum number of iterations that singular value decomposition
    /// will run on this matrix.
    ///
    /// ```
    /// use cv_core::CameraToCamera;
    /// use cv_core::nalgebra::{IsometryMatrix3, Rotation3, Vector3};
    /// use cv_pinhole::EssentialMatrix;
    /// let pose = CameraToCamera(IsometryMatrix3::from_parts(
    ///     Vector3::new(-0.8, 0.4, 0.5).into(),
    ///     Rotation3::from_euler_angles(0.2, 0.3, 0.4),
    /// ));
    /// let (rot_a, rot_b, t) = EssentialMatrix::from(pose).possible_rotations_unscaled_translation(1e-12, 1000).unwrap();
    /// let a_close = rot_a.rotation_to(&pose.0.rotation).angle() < 1e-4;
    /// let b_close = rot_b.rotation_to(&pose.0.rotation).angle() < 1e-4;
    /// // At least one rotation is correct.
    /// assert!(a_close || b_close);
    /// // The translation points in the same (or reverse) direction
    /// let t_res = 1.0 - t.normalize().dot(&pose.0.translation.vector.normalize()).abs();
    /// assert!(t_res < 1e-4);
    /// ```
    pub fn possible_rotations_unscaled_translation(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<(Rotation3<f64>, Rotation3<f64>, Vector3<f64>)> {
        // `W` from https://en.wikipedia.org/wiki/Essential_matrix#Finding_one_solution.
        let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let wt = w.transpose();

        let (mut u, _, mut v_t) = sorted_svd(self.0, epsilon, max_iterations)?;
        // The last column of U and row of V* are only defined up to sign since d = (a a 0),
        // so flip them to get proper rotations.
        if u.determinant() < 0.0 {
            u.column_mut(2).neg_mut();
        }
        if v_t.determinant() < 0.0 {
            v_t.row_mut(2).neg_mut();
        }

        Some((
            Rotation3::from_matrix_unchecked(u * w * v_t),
            Rotation3::from_matrix_unchecked(u * wt * v_t),
            u.column(2).into_owned(),
        ))
    }

    /// See [`EssentialMatrix::possible_rotations_unscaled_translation`].
    ///
    /// This returns the four candidate poses with unit translation. Exactly one of them
    /// places a triangulated point in front of both cameras.
    ///
    /// ```
    /// use cv_core::CameraToCamera;
    /// use cv_core::nalgebra::{IsometryMatrix3, Rotation3, Vector3};
    /// use cv_pinhole::EssentialMatrix;
    /// let pose = CameraToCamera(IsometryMatrix3::from_parts(
    ///     Vector3::new(-0.8, 0.4, 0.5).into(),
    ///     Rotation3::from_euler_angles(0.2, 0.3, 0.4),
    /// ));
    /// let rbs = EssentialMatrix::from(pose).possible_unscaled_poses(1e-12, 1000).unwrap();
    /// let one_correct = rbs.iter().any(|&upose| {
    ///     let angle_residual =
    ///         upose.0.rotation.rotation_to(&pose.0.rotation).angle();
    ///     let translation_residual =
    ///         1.0 - upose.0.translation.vector.normalize()
    ///                    .dot(&pose.0.translation.vector.normalize());
    ///     angle_residual < 1e-4 && translation_residual < 1e-4
    /// });
    /// assert!(one_correct);
    /// ```
    pub fn possible_unscaled_poses(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<[CameraToCamera; 4]> {
        self.possible_rotations_unscaled_translation(epsilon, max_iterations)
            .map(|(rot_a, rot_b, t)| {
                let t = t.normalize();
                [
                    CameraToCamera::from_parts(t, rot_a),
                    CameraToCamera::from_parts(t, rot_b),
                    CameraToCamera::from_parts(-t, rot_a),
                    CameraToCamera::from_parts(-t, rot_b),
                ]
            })
    }

    /// The algebraic epipolar error `x'ᵀ E x`.
    pub fn epipolar_error(&self, a: NormalizedKeyPoint, b: NormalizedKeyPoint) -> f64 {
        (b.homogeneous().transpose() * self.0 * a.homogeneous())[0]
    }

    /// The Sampson distance of a correspondence, a first order approximation of the
    /// geometric distance of the match to the epipolar constraint.
    ///
    /// The result is in normalized image units (multiply by the focal length for pixels).
    pub fn sampson_distance(&self, a: NormalizedKeyPoint, b: NormalizedKeyPoint) -> f64 {
        let ex = self.0 * a.homogeneous();
        let etx = self.0.transpose() * b.homogeneous();
        let denominator = ex.x * ex.x + ex.y * ex.y + etx.x * etx.x + etx.y * etx.y;
        if denominator <= f64::EPSILON {
            return f64::INFINITY;
        }
        self.epipolar_error(a, b).abs() / denominator.sqrt()
    }
}

/// Generates an essential matrix corresponding to this relative camera pose.
///
/// If a point `a` is transformed using [`Pose::transform`] into
/// a point `b`, then the essential matrix returned by this method will
/// give a residual of approximately `0.0` when you call
/// `essential.residual(&FeatureMatch(a, b))`.
impl From<CameraToCamera> for EssentialMatrix {
    fn from(pose: CameraToCamera) -> Self {
        let isometry = pose.isometry();
        Self(isometry.translation.vector.cross_matrix() * *isometry.rotation.matrix())
    }
}

impl Model<FeatureMatch<NormalizedKeyPoint>> for EssentialMatrix {
    fn residual(&self, data: &FeatureMatch<NormalizedKeyPoint>) -> f64 {
        let &FeatureMatch(a, b) = data;
        self.sampson_distance(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_core::nalgebra::{Point2, Point3};
    use cv_core::{CameraPoint, Projective};

    fn pose() -> CameraToCamera {
        CameraToCamera::from_parts(
            Vector3::new(0.6, -0.1, 0.2),
            Rotation3::from_euler_angles(0.05, -0.15, 0.1),
        )
    }

    fn project(point: CameraPoint) -> NormalizedKeyPoint {
        NormalizedKeyPoint::from_camera_point(point).unwrap()
    }

    #[test]
    fn exact_matches_have_zero_residual() {
        let pose = pose();
        let essential = EssentialMatrix::from(pose);
        for p in [
            Point3::new(0.3, -0.2, 4.0),
            Point3::new(-1.0, 0.5, 6.0),
            Point3::new(0.0, 0.9, 3.0),
        ] {
            let a = CameraPoint::from_point(p);
            let m = FeatureMatch(project(a), project(pose.transform(a)));
            assert!(essential.residual(&m) < 1e-12);
        }
    }

    #[test]
    fn sampson_distance_grows_with_offset() {
        let pose = pose();
        let essential = EssentialMatrix::from(pose);
        let a = CameraPoint::from_point(Point3::new(0.3, -0.2, 4.0));
        let b = project(pose.transform(a));
        let moved = |d: f64| NormalizedKeyPoint(Point2::new(b.x, b.y + d));
        let near = essential.sampson_distance(project(a), moved(1e-3));
        let far = essential.sampson_distance(project(a), moved(1e-2));
        assert!(near > 0.0);
        assert!(far > near);
    }

    #[test]
    fn reconditioning_a_valid_matrix_is_stable() {
        let essential = EssentialMatrix::from(pose());
        let fixed = essential.recondition(1e-12, 1000).unwrap();
        assert!((fixed.0 - essential.0).norm() < 1e-9);
    }

    #[test]
    fn candidate_poses_have_unit_translation() {
        let poses = EssentialMatrix::from(pose())
            .possible_unscaled_poses(1e-12, 1000)
            .unwrap();
        for candidate in poses {
            let t = candidate.isometry().translation.vector;
            assert!((t.norm() - 1.0).abs() < 1e-12);
        }
    }
}
