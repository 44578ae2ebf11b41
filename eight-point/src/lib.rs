use cv_core::{
    nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector2},
    sample_consensus::Estimator,
    FeatureMatch,
};
use cv_pinhole::{EssentialMatrix, NormalizedKeyPoint};
use float_ord::FloatOrd;

const MIN_MATCHES: usize = 8;

/// Computes the similarity transform that moves the centroid of the points to the origin
/// and scales them so that their mean distance from it is `sqrt(2)`.
fn hartley_normalization(points: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let count = points.len() as f64;
    let centroid = points.iter().map(|p| p.coords).sum::<Vector2<f64>>() / count;
    let mean_distance = points.iter().map(|p| (p.coords - centroid).norm()).sum::<f64>() / count;
    if !(mean_distance > f64::EPSILON) {
        return None;
    }
    let scale = std::f64::consts::SQRT_2 / mean_distance;
    #[rustfmt::skip]
    let transform = Matrix3::new(
        scale, 0.0,   -scale * centroid.x,
        0.0,   scale, -scale * centroid.y,
        0.0,   0.0,   1.0,
    );
    Some(transform)
}

fn transform_point(transform: &Matrix3<f64>, point: Point2<f64>) -> Point2<f64> {
    Point2::new(
        transform.m11 * point.x + transform.m13,
        transform.m22 * point.y + transform.m23,
    )
}

/// Builds the row of the epipolar equation `bᵀ E a = 0` for the row-major entries of `E`.
fn epipolar_row(a: Point2<f64>, b: Point2<f64>) -> SVector<f64, 9> {
    SVector::<f64, 9>::from_column_slice(&[
        b.x * a.x,
        b.x * a.y,
        b.x,
        b.y * a.x,
        b.y * a.y,
        b.y,
        a.x,
        a.y,
        1.0,
    ])
}

/// Performs the normalized
/// [eight-point algorithm](https://en.wikipedia.org/wiki/Eight-point_algorithm)
/// by Richard Hartley and Andrew Zisserman on normalized image coordinates.
///
/// The points of each image are conditioned with [Hartley normalization] before the linear
/// system is solved, the solution is brought back into normalized image coordinates, and the
/// result is reconditioned so its two non-zero singular values are equal.
///
/// Any number of matches at or above eight can be used. With more than eight the
/// linear least squares solution is returned.
///
/// [Hartley normalization]: https://en.wikipedia.org/wiki/Eight-point_algorithm#Normalized_algorithm
#[derive(Copy, Clone, Debug)]
pub struct EightPoint {
    pub epsilon: f64,
    pub iterations: usize,
}

impl EightPoint {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_matches<I>(&self, data: I) -> Option<EssentialMatrix>
    where
        I: Iterator<Item = FeatureMatch<NormalizedKeyPoint>> + Clone,
    {
        let (a_points, b_points): (Vec<Point2<f64>>, Vec<Point2<f64>>) =
            data.map(|FeatureMatch(a, b)| (a.0, b.0)).unzip();
        if a_points.len() < MIN_MATCHES {
            return None;
        }
        let ta = hartley_normalization(&a_points)?;
        let tb = hartley_normalization(&b_points)?;

        let mut normal = SMatrix::<f64, 9, 9>::zeros();
        for (&a, &b) in a_points.iter().zip(&b_points) {
            let row = epipolar_row(transform_point(&ta, a), transform_point(&tb, b));
            normal += row * row.transpose();
        }

        let eigens = normal.try_symmetric_eigen(self.epsilon, self.iterations)?;
        let solution = eigens
            .eigenvalues
            .iter()
            .enumerate()
            .min_by_key(|&(_, &n)| FloatOrd(n))
            .map(|(ix, _)| eigens.eigenvectors.column(ix).into_owned())?;
        let conditioned = Matrix3::from_row_slice(solution.as_slice());

        // Undo the normalization: bᵀ Tbᵀ E' Ta a = 0.
        let essential = tb.transpose() * conditioned * ta;
        let norm = essential.norm();
        if !(norm > 0.0) || !norm.is_finite() {
            return None;
        }
        EssentialMatrix(essential / norm).recondition(self.epsilon, self.iterations)
    }
}

impl Default for EightPoint {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
        }
    }
}

impl Estimator<FeatureMatch<NormalizedKeyPoint>> for EightPoint {
    type Model = EssentialMatrix;
    type ModelIter = Option<EssentialMatrix>;
    const MIN_SAMPLES: usize = MIN_MATCHES;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureMatch<NormalizedKeyPoint>> + Clone,
    {
        self.from_matches(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_few_matches_produce_nothing() {
        let matches = (0..7).map(|i| {
            let p = NormalizedKeyPoint(Point2::new(i as f64 * 0.1, 0.05 * i as f64));
            FeatureMatch(p, p)
        });
        assert!(EightPoint::new().from_matches(matches).is_none());
    }

    #[test]
    fn normalization_centers_and_scales() {
        let points = [
            Point2::new(1.0, 1.0),
            Point2::new(3.0, 1.0),
            Point2::new(3.0, 3.0),
            Point2::new(1.0, 3.0),
        ];
        let transform = hartley_normalization(&points).unwrap();
        let normalized: Vec<_> = points.iter().map(|&p| transform_point(&transform, p)).collect();
        let centroid = normalized.iter().map(|p| p.coords).sum::<Vector2<f64>>() / 4.0;
        assert!(centroid.norm() < 1e-12);
        for p in normalized {
            assert!((p.coords.norm() - std::f64::consts::SQRT_2).abs() < 1e-12);
        }
    }

    #[test]
    fn coincident_points_cannot_be_normalized() {
        let points = [Point2::new(0.2, 0.2); 8];
        assert!(hartley_normalization(&points).is_none());
    }
}
