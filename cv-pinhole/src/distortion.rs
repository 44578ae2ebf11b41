use cv_core::nalgebra::{Matrix2, Matrix2x5, Point2, Vector2};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Brown-Conrady lens distortion with three radial (`k1`, `k2`, `k3`) and two
/// tangential (`p1`, `p2`) coefficients.
///
/// The distortion is applied to normalized image coordinates `(x, y)` with `r² = x² + y²`:
///
/// ```text
/// x_d = x (1 + k1 r² + k2 r⁴ + k3 r⁶) + 2 p1 x y + p2 (r² + 2 x²)
/// y_d = y (1 + k1 r² + k2 r⁴ + k3 r⁶) + p1 (r² + 2 y²) + 2 p2 x y
/// ```
///
/// The coefficient order of [`Distortion::coefficients`] is `k1, k2, p1, p2, k3`, which is
/// the order calibration archives store them in.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    /// No distortion at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Builds the distortion from coefficients in `k1, k2, p1, p2, k3` order.
    ///
    /// Missing trailing coefficients are zero and extra coefficients are ignored.
    ///
    /// ```
    /// use cv_pinhole::Distortion;
    /// let distortion = Distortion::from_coefficients(&[-0.2, 0.05, 0.001, -0.002]);
    /// assert_eq!(distortion.k3, 0.0);
    /// assert_eq!(distortion.coefficients(), [-0.2, 0.05, 0.001, -0.002, 0.0]);
    /// ```
    pub fn from_coefficients(coefficients: &[f64]) -> Self {
        let get = |ix: usize| coefficients.get(ix).copied().unwrap_or(0.0);
        Self {
            k1: get(0),
            k2: get(1),
            p1: get(2),
            p2: get(3),
            k3: get(4),
        }
    }

    pub fn coefficients(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    /// Applies the distortion to a normalized image coordinate.
    pub fn distort(&self, point: Point2<f64>) -> Point2<f64> {
        let (x, y) = (point.x, point.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        Point2::new(
            x * radial + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        )
    }

    /// Applies the distortion and returns the Jacobians of the distorted point.
    ///
    /// The following things are returned in this order:
    ///
    /// * The distorted point
    /// * The Jacobian in respect to the undistorted point `(x, y)`
    /// * The Jacobian in respect to the coefficients in `k1, k2, p1, p2, k3` order
    pub fn distort_jacobians(
        &self,
        point: Point2<f64>,
    ) -> (Point2<f64>, Matrix2<f64>, Matrix2x5<f64>) {
        let (x, y) = (point.x, point.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        // d(radial)/d(r²) times two, so that d(radial)/dx = g * x.
        let g = 2.0 * self.k1 + 4.0 * self.k2 * r2 + 6.0 * self.k3 * r4;

        let cross = g * x * y + 2.0 * self.p1 * x + 2.0 * self.p2 * y;
        #[rustfmt::skip]
        let jacobian_point = Matrix2::new(
            radial + g * x * x + 2.0 * self.p1 * y + 6.0 * self.p2 * x, cross,
            cross, radial + g * y * y + 6.0 * self.p1 * y + 2.0 * self.p2 * x,
        );

        #[rustfmt::skip]
        let jacobian_coefficients = Matrix2x5::new(
            x * r2, x * r4, 2.0 * x * y,          r2 + 2.0 * x * x, x * r6,
            y * r2, y * r4, r2 + 2.0 * y * y,     2.0 * x * y,      y * r6,
        );

        (self.distort(point), jacobian_point, jacobian_coefficients)
    }

    /// Removes the distortion from a distorted normalized image coordinate.
    ///
    /// This inverts [`Distortion::distort`] with Newton iterations starting from the
    /// distorted point. It stops early once the reprojection is within `1e-14`.
    ///
    /// ```
    /// use cv_pinhole::Distortion;
    /// use cv_core::nalgebra::Point2;
    /// let distortion = Distortion { k1: -0.28, k2: 0.07, p1: 0.001, p2: -0.0005, k3: 0.0 };
    /// let point = Point2::new(0.31, -0.22);
    /// let restored = distortion.undistort(distortion.distort(point));
    /// assert!((restored - point).norm() < 1e-10);
    /// ```
    pub fn undistort(&self, distorted: Point2<f64>) -> Point2<f64> {
        const MAX_ITERATIONS: usize = 20;
        let mut point = distorted;
        for _ in 0..MAX_ITERATIONS {
            let (current, jacobian, _) = self.distort_jacobians(point);
            let error: Vector2<f64> = current - distorted;
            if error.norm_squared() < 1e-28 {
                break;
            }
            match jacobian.try_inverse() {
                Some(inverse) => point -= inverse * error,
                None => break,
            }
        }
        point
    }

    /// Returns `true` if every coefficient is zero.
    pub fn is_identity(&self) -> bool {
        self.coefficients().iter().all(|&c| c == 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> Distortion {
        Distortion {
            k1: -0.31,
            k2: 0.12,
            p1: 0.0013,
            p2: -0.0021,
            k3: -0.02,
        }
    }

    #[test]
    fn point_jacobian_matches_finite_differences() {
        let distortion = sample();
        let point = Point2::new(0.23, -0.41);
        let (_, jacobian, _) = distortion.distort_jacobians(point);
        let h = 1e-7;
        for i in 0..2 {
            let mut plus = point;
            let mut minus = point;
            plus[i] += h;
            minus[i] -= h;
            let numeric = (distortion.distort(plus) - distortion.distort(minus)) / (2.0 * h);
            assert_relative_eq!(jacobian.column(i).into_owned(), numeric, epsilon = 1e-7);
        }
    }

    #[test]
    fn coefficient_jacobian_matches_finite_differences() {
        let distortion = sample();
        let point = Point2::new(-0.37, 0.18);
        let (_, _, jacobian) = distortion.distort_jacobians(point);
        let h = 1e-7;
        for i in 0..5 {
            let mut plus = distortion.coefficients();
            let mut minus = distortion.coefficients();
            plus[i] += h;
            minus[i] -= h;
            let numeric = (Distortion::from_coefficients(&plus).distort(point)
                - Distortion::from_coefficients(&minus).distort(point))
                / (2.0 * h);
            assert_relative_eq!(jacobian.column(i).into_owned(), numeric, epsilon = 1e-7);
        }
    }

    #[test]
    fn undistort_inverts_distort_across_the_image() {
        let distortion = sample();
        for &(x, y) in &[(0.0, 0.0), (0.5, 0.4), (-0.6, 0.1), (0.05, -0.7)] {
            let point = Point2::new(x, y);
            let restored = distortion.undistort(distortion.distort(point));
            assert_relative_eq!(restored, point, epsilon = 1e-10);
        }
    }

    #[test]
    fn identity_distortion_leaves_points_alone() {
        let point = Point2::new(0.4, -0.3);
        assert!(Distortion::none().is_identity());
        assert_eq!(Distortion::none().distort(point), point);
        assert_eq!(Distortion::none().undistort(point), point);
    }
}
