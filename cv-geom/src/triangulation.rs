use cv_core::nalgebra::{Matrix3x4, Matrix4, Point2, Point3, RowVector4, Vector4};
use float_ord::FloatOrd;
use thiserror::Error;

/// Reasons a single correspondence cannot be triangulated.
///
/// These are local to one point. Callers are expected to drop the point and keep going.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum TriangulationError {
    #[error("the triangulated point is at infinity (homogeneous w = {w:e})")]
    PointAtInfinity { w: f64 },
    #[error("the triangulation system has no finite solution")]
    NonFinite,
}

/// Projects a euclidean point with a `3x4` projection matrix.
///
/// Returns `None` when the point lands on the plane through the optical center.
pub fn reproject(projection: &Matrix3x4<f64>, point: Point3<f64>) -> Option<Point2<f64>> {
    Point2::from_homogeneous(projection * point.to_homogeneous())
}

/// Linear (DLT) triangulation of a correspondence observed by two cameras with known
/// projection matrices.
///
/// Each observation `(x, y)` with projection matrix rows `P₁ P₂ P₃` contributes the two
/// equations `x P₃ - P₁` and `y P₃ - P₂`. The point is the right singular vector of the
/// resulting `4x4` system with the smallest singular value, divided by its homogeneous
/// component. This is the same linear method used by Hartley and Zisserman and it
/// minimizes an algebraic rather than a geometric error, so it is meant as the starting
/// point for bundle adjustment.
///
/// The observations and the projection matrices must be in the same units. In the
/// reconstruction pipeline those are undistorted pixels and `K [R | t]`.
///
/// ```
/// use cv_core::nalgebra::{Matrix3, Matrix3x4, Point3, Vector3};
/// use cv_geom::triangulation::{reproject, LinearTriangulator};
///
/// let k = Matrix3::new(800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0);
/// let p1 = k * Matrix3x4::identity();
/// let mut rt = Matrix3x4::identity();
/// rt.set_column(3, &Vector3::new(-1.0, 0.0, 0.0));
/// let p2 = k * rt;
///
/// let point = Point3::new(0.3, -0.2, 5.0);
/// let a = reproject(&p1, point).unwrap();
/// let b = reproject(&p2, point).unwrap();
/// let triangulated = LinearTriangulator::new().triangulate(&p1, &p2, a, b).unwrap();
/// approx::assert_relative_eq!(triangulated, point, epsilon = 1e-9);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct LinearTriangulator {
    epsilon: f64,
    max_iterations: usize,
}

impl LinearTriangulator {
    /// Creates a `LinearTriangulator` with default values.
    ///
    /// Same as calling [`Default::default`].
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the epsilon used both by the SVD solver and to detect points at infinity.
    ///
    /// Default is `1e-12`.
    #[must_use]
    pub fn epsilon(self, epsilon: f64) -> Self {
        Self { epsilon, ..self }
    }

    /// Set the maximum number of iterations for the SVD solver.
    ///
    /// Default is `1000`.
    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// Triangulates the homogeneous point without dividing by `w`.
    pub fn triangulate_homogeneous(
        &self,
        p1: &Matrix3x4<f64>,
        p2: &Matrix3x4<f64>,
        a: Point2<f64>,
        b: Point2<f64>,
    ) -> Result<Vector4<f64>, TriangulationError> {
        let row = |p: &Matrix3x4<f64>, coordinate: f64, ix: usize| -> RowVector4<f64> {
            p.row(2) * coordinate - p.row(ix)
        };
        let design = Matrix4::from_rows(&[
            row(p1, a.x, 0),
            row(p1, a.y, 1),
            row(p2, b.x, 0),
            row(p2, b.y, 1),
        ]);

        let svd = design
            .try_svd(false, true, self.epsilon, self.max_iterations)
            .ok_or(TriangulationError::NonFinite)?;
        let v_t = svd.v_t.ok_or(TriangulationError::NonFinite)?;

        // The point lies in the null space, so take the vector of the smallest singular value.
        let homogeneous = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by_key(|&(_, &n)| FloatOrd(n))
            .map(|(ix, _)| v_t.row(ix).transpose())
            .ok_or(TriangulationError::NonFinite)?;

        if homogeneous.iter().all(|n| n.is_finite()) {
            Ok(homogeneous)
        } else {
            Err(TriangulationError::NonFinite)
        }
    }

    /// Triangulates a single correspondence `a <-> b` into a euclidean point.
    pub fn triangulate(
        &self,
        p1: &Matrix3x4<f64>,
        p2: &Matrix3x4<f64>,
        a: Point2<f64>,
        b: Point2<f64>,
    ) -> Result<Point3<f64>, TriangulationError> {
        let homogeneous = self.triangulate_homogeneous(p1, p2, a, b)?;
        let w = homogeneous.w;
        if w.abs() <= self.epsilon * homogeneous.norm() {
            return Err(TriangulationError::PointAtInfinity { w });
        }
        let point = Point3::from(homogeneous.xyz() / w);
        if point.coords.iter().all(|n| n.is_finite()) {
            Ok(point)
        } else {
            Err(TriangulationError::NonFinite)
        }
    }

    /// Triangulates every correspondence.
    ///
    /// The output has exactly one entry per input pair in the same order, so failed points
    /// can be matched back to their correspondence.
    pub fn triangulate_all(
        &self,
        p1: &Matrix3x4<f64>,
        p2: &Matrix3x4<f64>,
        pairs: impl IntoIterator<Item = (Point2<f64>, Point2<f64>)>,
    ) -> Vec<Result<Point3<f64>, TriangulationError>> {
        pairs
            .into_iter()
            .map(|(a, b)| self.triangulate(p1, p2, a, b))
            .collect()
    }
}

impl Default for LinearTriangulator {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            max_iterations: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cv_core::nalgebra::{Matrix3, Vector3};

    fn intrinsics() -> Matrix3<f64> {
        Matrix3::new(700.0, 0.0, 320.0, 0.0, 710.0, 240.0, 0.0, 0.0, 1.0)
    }

    fn translated(k: &Matrix3<f64>, t: Vector3<f64>) -> Matrix3x4<f64> {
        let mut rt = Matrix3x4::identity();
        rt.set_column(3, &t);
        k * rt
    }

    #[test]
    fn parallel_rays_are_at_infinity() {
        let k = intrinsics();
        let p1 = translated(&k, Vector3::zeros());
        let p2 = translated(&k, Vector3::new(-1.0, 0.0, 0.0));
        let center = Point2::new(320.0, 240.0);
        let result = LinearTriangulator::new().triangulate(&p1, &p2, center, center);
        assert!(matches!(
            result,
            Err(TriangulationError::PointAtInfinity { .. })
        ));
    }

    #[test]
    fn triangulate_all_preserves_order_and_failures() {
        let k = intrinsics();
        let p1 = translated(&k, Vector3::zeros());
        let p2 = translated(&k, Vector3::new(-1.0, 0.0, 0.0));
        let good = Point3::new(0.5, 0.25, 4.0);
        let center = Point2::new(320.0, 240.0);
        let pairs = vec![
            (reproject(&p1, good).unwrap(), reproject(&p2, good).unwrap()),
            (center, center),
        ];
        let results = LinearTriangulator::new().triangulate_all(&p1, &p2, pairs);
        assert_eq!(results.len(), 2);
        assert_relative_eq!(results[0].unwrap(), good, epsilon = 1e-9);
        assert!(results[1].is_err());
    }
}
