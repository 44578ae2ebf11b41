use crate::{CalibrationSession, SfmError, SfmSettings};
use arrsac::Arrsac;
use cv_calib::estimate_homography;
use cv_core::nalgebra::{Matrix2, Point2};
use cv_core::sample_consensus::Consensus;
use cv_core::{CameraModel, CameraToCamera, FeatureMatch, KeyPoint, Pose, WorldToCamera};
use cv_geom::LinearTriangulator;
use cv_pinhole::NormalizedKeyPoint;
use eight_point::EightPoint;
use log::{debug, info};
use rand::SeedableRng;
use rand_pcg::Pcg64;

/// The eight-point algorithm cannot work with less.
const MINIMUM_MATCHES: usize = 8;

/// The pose of the second camera relative to the first.
#[derive(Debug, Clone, PartialEq)]
pub struct RelativePose {
    /// Maps points from the frame of the first camera into the second, `X₂ = R X₁ + t`.
    /// The translation has unit length.
    pub pose: CameraToCamera,
    /// Indices of the correspondences that agree with the pose.
    pub inliers: Vec<usize>,
}

/// Estimates the relative pose of two calibrated views from pixel correspondences.
///
/// Keypoints are undistorted and normalized with the session's camera. An essential matrix
/// is found by sample consensus over the eight-point algorithm, and of its four
/// decompositions the one that puts the most triangulated inliers in front of both
/// cameras is kept.
///
/// A planar scene or a pure rotation does not determine the pose: when one homography
/// explains most of the inliers the pair is reported as degenerate.
pub struct RelativePoseEstimator<C = Arrsac<Pcg64>> {
    consensus: C,
    estimator: EightPoint,
    triangulator: LinearTriangulator,
    minimum_correspondences: usize,
    degenerate_eigen_ratio: f64,
    threshold_pixels: f64,
    planar_inlier_ratio: f64,
}

impl RelativePoseEstimator {
    /// Uses ARRSAC with the pixel threshold of `settings` converted to normalized units
    /// with the mean focal length of the session.
    pub fn new(settings: &SfmSettings, session: &CalibrationSession) -> Self {
        let threshold =
            settings.consensus_threshold_pixels / session.model.intrinsics.mean_focal();
        Self::with_consensus(
            settings,
            Arrsac::new(threshold, Pcg64::from_seed([settings.consensus_seed; 32])),
        )
    }
}

impl<C> RelativePoseEstimator<C>
where
    C: Consensus<EightPoint, FeatureMatch<NormalizedKeyPoint>>,
{
    pub fn with_consensus(settings: &SfmSettings, consensus: C) -> Self {
        Self {
            consensus,
            estimator: EightPoint::new(),
            triangulator: LinearTriangulator::new().epsilon(settings.triangulation_epsilon),
            minimum_correspondences: settings.minimum_correspondences.max(MINIMUM_MATCHES),
            degenerate_eigen_ratio: settings.degenerate_eigen_ratio,
            threshold_pixels: settings.consensus_threshold_pixels,
            planar_inlier_ratio: settings.planar_inlier_ratio,
        }
    }

    pub fn estimate(
        &mut self,
        session: &CalibrationSession,
        matches: &[FeatureMatch<KeyPoint>],
    ) -> Result<RelativePose, SfmError> {
        if matches.len() < self.minimum_correspondences {
            return Err(SfmError::InsufficientCorrespondences {
                found: matches.len(),
                required: self.minimum_correspondences,
            });
        }

        let normalized: Vec<FeatureMatch<NormalizedKeyPoint>> = matches
            .iter()
            .map(|&m| m.map(|keypoint| session.model.calibrate(keypoint)))
            .collect();
        for (image, side) in ["first", "second"].into_iter().enumerate() {
            let ratio = scatter_eigen_ratio(normalized.iter().map(|&FeatureMatch(a, b)| {
                if image == 0 {
                    a.0
                } else {
                    b.0
                }
            }));
            debug!("scatter eigenvalue ratio of the {} image is {:e}", side, ratio);
            if !(ratio >= self.degenerate_eigen_ratio) {
                return Err(SfmError::DegenerateGeometry(format!(
                    "the correspondences in the {} image are collinear",
                    side
                )));
            }
        }

        info!("estimate essential on {} matches", normalized.len());
        let (essential, inliers) = self
            .consensus
            .model_inliers(&self.estimator, normalized.iter().copied())
            .ok_or_else(|| {
                SfmError::DegenerateGeometry("no essential matrix fits the matches".to_string())
            })?;
        let inliers: Vec<usize> = inliers.into_iter().collect();
        if inliers.len() < MINIMUM_MATCHES {
            return Err(SfmError::InsufficientCorrespondences {
                found: inliers.len(),
                required: MINIMUM_MATCHES,
            });
        }

        let support = homography_support(
            &normalized,
            &inliers,
            self.threshold_pixels / session.model.intrinsics.mean_focal(),
        );
        debug!("a single homography explains {:.3} of the inliers", support);
        if support >= self.planar_inlier_ratio {
            return Err(SfmError::DegenerateGeometry(format!(
                "{:.0}% of the inliers fit a single homography (planar scene or pure rotation)",
                100.0 * support
            )));
        }

        let candidates = essential
            .recondition(self.estimator.epsilon, self.estimator.iterations)
            .and_then(|essential| {
                essential.possible_unscaled_poses(self.estimator.epsilon, self.estimator.iterations)
            })
            .ok_or_else(|| {
                SfmError::DegenerateGeometry("the essential matrix has no decomposition".into())
            })?;

        info!("perform chirality test on {} matches", inliers.len());
        let (pose, passing) = candidates
            .iter()
            .map(|&pose| (pose, self.chirality_pass_count(pose, &normalized, &inliers)))
            .max_by_key(|&(_, count)| count)
            .ok_or_else(|| SfmError::DegenerateGeometry("no pose candidates".into()))?;
        let ratio = passing as f64 / inliers.len() as f64;
        if 2 * passing <= inliers.len() {
            info!(
                "chirality test pass ratio was {} ({}/{}), which is not a majority",
                ratio,
                passing,
                inliers.len()
            );
            return Err(SfmError::DegenerateGeometry(format!(
                "only {} of {} inliers are in front of both cameras",
                passing,
                inliers.len()
            )));
        }
        info!(
            "chirality test pass ratio was {} ({}/{}), which was successful",
            ratio,
            passing,
            inliers.len()
        );

        Ok(RelativePose { pose, inliers })
    }

    /// Counts the inliers that triangulate in front of both cameras.
    fn chirality_pass_count(
        &self,
        pose: CameraToCamera,
        matches: &[FeatureMatch<NormalizedKeyPoint>],
        inliers: &[usize],
    ) -> usize {
        let first = WorldToCamera::identity().matrix3x4();
        let second = pose.matrix3x4();
        inliers
            .iter()
            .filter(|&&ix| {
                let FeatureMatch(a, b) = matches[ix];
                self.triangulator
                    .triangulate(&first, &second, a.0, b.0)
                    .map(|point| point.z > 0.0 && (pose.isometry() * point).z > 0.0)
                    .unwrap_or(false)
            })
            .count()
    }
}

/// The fraction of `inliers` that the least squares homography from the first image to the
/// second maps within `threshold` of their match.
fn homography_support(
    matches: &[FeatureMatch<NormalizedKeyPoint>],
    inliers: &[usize],
    threshold: f64,
) -> f64 {
    let (firsts, seconds): (Vec<Point2<f64>>, Vec<Point2<f64>>) = inliers
        .iter()
        .map(|&ix| {
            let FeatureMatch(a, b) = matches[ix];
            (a.0, b.0)
        })
        .unzip();
    let homography = match estimate_homography(&firsts, &seconds) {
        Ok(homography) => homography,
        Err(_) => return 0.0,
    };
    let supported = firsts
        .iter()
        .zip(&seconds)
        .filter(|&(a, b)| {
            Point2::from_homogeneous(homography * a.to_homogeneous())
                .map_or(false, |transferred| (transferred - *b).norm() <= threshold)
        })
        .count();
    supported as f64 / inliers.len() as f64
}

/// The ratio of the smaller to the larger eigenvalue of the scatter matrix of `points`.
///
/// This is zero when the points are collinear (or all the same).
fn scatter_eigen_ratio(points: impl Iterator<Item = Point2<f64>> + Clone) -> f64 {
    let count = points.clone().count();
    if count == 0 {
        return 0.0;
    }
    let mean = points
        .clone()
        .fold(Point2::<f64>::origin(), |sum, p| sum + p.coords)
        / count as f64;
    let scatter = points.fold(Matrix2::<f64>::zeros(), |scatter, p| {
        let d = p - mean;
        scatter + d * d.transpose()
    });
    let eigenvalues = scatter.symmetric_eigenvalues();
    let (small, large) = (eigenvalues.min(), eigenvalues.max());
    if large > 0.0 {
        small.max(0.0) / large
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_core::nalgebra::{Point3, Rotation3, Vector3};

    #[test]
    fn collinear_points_have_no_scatter() {
        let points = (0..10).map(|i| Point2::new(i as f64, 2.0 * i as f64 + 1.0));
        assert!(scatter_eigen_ratio(points) < 1e-12);
    }

    fn matches_of(points: &[Point3<f64>]) -> Vec<FeatureMatch<NormalizedKeyPoint>> {
        let pose = CameraToCamera::from_parts(
            Vector3::new(-0.8, 0.1, 0.15),
            Rotation3::from_euler_angles(0.03, -0.12, 0.02),
        );
        points
            .iter()
            .map(|&point| {
                FeatureMatch(
                    NormalizedKeyPoint((point / point.z).xy()),
                    NormalizedKeyPoint({
                        let moved = pose.isometry() * point;
                        (moved / moved.z).xy()
                    }),
                )
            })
            .collect()
    }

    #[test]
    fn plane_is_explained_by_a_homography() {
        let plane: Vec<Point3<f64>> = (0..30)
            .map(|ix| {
                let (u, v) = ((ix % 6) as f64 * 0.5 - 1.25, (ix / 6) as f64 * 0.5 - 1.0);
                Point3::new(u, v, 5.0 + 0.3 * u - 0.2 * v)
            })
            .collect();
        let inliers: Vec<usize> = (0..30).collect();
        assert_eq!(homography_support(&matches_of(&plane), &inliers, 1e-6), 1.0);
    }

    #[test]
    fn depth_breaks_the_homography() {
        let scene: Vec<Point3<f64>> = (0..30)
            .map(|ix| {
                let (u, v) = ((ix % 6) as f64 * 0.5 - 1.25, (ix / 6) as f64 * 0.5 - 1.0);
                Point3::new(u, v, 4.0 + (ix * 7 % 11) as f64 * 0.4)
            })
            .collect();
        let inliers: Vec<usize> = (0..30).collect();
        assert!(homography_support(&matches_of(&scene), &inliers, 1e-3) < 0.5);
    }

    #[test]
    fn spread_points_have_scatter() {
        let points = (0..16).map(|i| Point2::new((i % 4) as f64, (i / 4) as f64));
        assert!((scatter_eigen_ratio(points) - 1.0).abs() < 1e-9);
    }
}
