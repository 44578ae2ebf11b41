use cv_core::nalgebra::{DMatrix, Matrix3, Point2, Vector2};
use float_ord::FloatOrd;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum HomographyError {
    #[error("a homography needs at least 4 correspondences, got {found}")]
    TooFewPoints { found: usize },
    #[error("the plane and image point counts differ ({plane} and {image})")]
    LengthMismatch { plane: usize, image: usize },
    #[error("the points are degenerate and cannot be normalized")]
    Degenerate,
    #[error("the homography solve did not produce a finite solution")]
    NonFinite,
}

/// Similarity that centers the points and scales them to a mean distance of `sqrt(2)`,
/// returned as `(scale, centroid)`.
fn normalization(points: &[Point2<f64>]) -> Option<(f64, Vector2<f64>)> {
    let count = points.len() as f64;
    let centroid = points.iter().map(|p| p.coords).sum::<Vector2<f64>>() / count;
    let mean_distance = points.iter().map(|p| (p.coords - centroid).norm()).sum::<f64>() / count;
    if mean_distance > f64::EPSILON {
        Some((std::f64::consts::SQRT_2 / mean_distance, centroid))
    } else {
        None
    }
}

#[rustfmt::skip]
fn normalization_matrix((scale, centroid): (f64, Vector2<f64>)) -> Matrix3<f64> {
    Matrix3::new(
        scale, 0.0,   -scale * centroid.x,
        0.0,   scale, -scale * centroid.y,
        0.0,   0.0,   1.0,
    )
}

#[rustfmt::skip]
fn denormalization_matrix((scale, centroid): (f64, Vector2<f64>)) -> Matrix3<f64> {
    Matrix3::new(
        1.0 / scale, 0.0,         centroid.x,
        0.0,         1.0 / scale, centroid.y,
        0.0,         0.0,         1.0,
    )
}

/// Estimates the homography `H` with `image ~ H plane` using the normalized DLT.
///
/// Both point sets are normalized first, the nine entries of `H` are the eigenvector with
/// the smallest eigenvalue of `AᵀA`, and the result is scaled so `H[(2, 2)] = 1` when that
/// entry is not vanishing.
///
/// ```
/// use cv_core::nalgebra::{Matrix3, Point2};
/// use cv_calib::estimate_homography;
/// let truth = Matrix3::new(1.2, 0.1, 30.0, -0.05, 0.9, 12.0, 1e-4, 2e-4, 1.0);
/// let plane: Vec<Point2<f64>> = (0..12)
///     .map(|i| Point2::new((i % 4) as f64, (i / 4) as f64))
///     .collect();
/// let image: Vec<Point2<f64>> = plane
///     .iter()
///     .map(|p| Point2::from_homogeneous(truth * p.to_homogeneous()).unwrap())
///     .collect();
/// let h = estimate_homography(&plane, &image).unwrap();
/// approx::assert_relative_eq!(h, truth, epsilon = 1e-6);
/// ```
pub fn estimate_homography(
    plane: &[Point2<f64>],
    image: &[Point2<f64>],
) -> Result<Matrix3<f64>, HomographyError> {
    if plane.len() != image.len() {
        return Err(HomographyError::LengthMismatch {
            plane: plane.len(),
            image: image.len(),
        });
    }
    if plane.len() < 4 {
        return Err(HomographyError::TooFewPoints { found: plane.len() });
    }
    let plane_norm = normalization(plane).ok_or(HomographyError::Degenerate)?;
    let image_norm = normalization(image).ok_or(HomographyError::Degenerate)?;
    let (plane_scale, plane_centroid) = plane_norm;
    let (image_scale, image_centroid) = image_norm;

    let mut design = DMatrix::<f64>::zeros(2 * plane.len(), 9);
    for (ix, (p, q)) in plane.iter().zip(image).enumerate() {
        let x = (p.coords - plane_centroid) * plane_scale;
        let u = (q.coords - image_centroid) * image_scale;
        let row = 2 * ix;
        design[(row, 0)] = -x.x;
        design[(row, 1)] = -x.y;
        design[(row, 2)] = -1.0;
        design[(row, 6)] = u.x * x.x;
        design[(row, 7)] = u.x * x.y;
        design[(row, 8)] = u.x;
        design[(row + 1, 3)] = -x.x;
        design[(row + 1, 4)] = -x.y;
        design[(row + 1, 5)] = -1.0;
        design[(row + 1, 6)] = u.y * x.x;
        design[(row + 1, 7)] = u.y * x.y;
        design[(row + 1, 8)] = u.y;
    }

    let normal = design.tr_mul(&design);
    let eigens = normal
        .try_symmetric_eigen(1e-12, 1000)
        .ok_or(HomographyError::NonFinite)?;
    let solution = eigens
        .eigenvalues
        .iter()
        .enumerate()
        .min_by_key(|&(_, &n)| FloatOrd(n))
        .map(|(ix, _)| eigens.eigenvectors.column(ix).into_owned())
        .ok_or(HomographyError::NonFinite)?;
    let conditioned = Matrix3::from_row_slice(solution.as_slice());

    let mut homography = denormalization_matrix(image_norm)
        * conditioned
        * normalization_matrix(plane_norm);
    let scale = homography[(2, 2)];
    if scale.abs() > f64::EPSILON {
        homography /= scale;
    } else {
        homography /= homography.norm();
    }
    if homography.iter().all(|n| n.is_finite()) {
        Ok(homography)
    } else {
        Err(HomographyError::NonFinite)
    }
}
