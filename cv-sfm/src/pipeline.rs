use crate::{
    BundleAdjuster, BundleAdjustmentReport, CalibrationSession, Landmark, Observation,
    Reconstruction, RelativePose, RelativePoseEstimator, SfmError, SfmSettings,
    TriangulationRejection, DEFAULT_COLOR,
};
use arrsac::Arrsac;
use cv_core::sample_consensus::Consensus;
use cv_core::{FeatureMatch, KeyPoint, Pose, WorldToCamera};
use cv_geom::LinearTriangulator;
use cv_pinhole::NormalizedKeyPoint;
use eight_point::EightPoint;
use log::{debug, info, warn};
use rand_pcg::Pcg64;

/// Everything a two-view reconstruction produced.
#[derive(Debug)]
pub struct TwoViewOutcome {
    pub reconstruction: Reconstruction,
    /// The relative pose before bundle adjustment.
    pub relative_pose: RelativePose,
    /// Inlier correspondences that did not become landmarks, by correspondence index.
    pub invalid_triangulations: Vec<(usize, TriangulationRejection)>,
    /// `None` when bundle adjustment is disabled or diverged.
    pub bundle_adjustment: Option<BundleAdjustmentReport>,
    /// The [`SfmError::OptimizationDivergence`] of bundle adjustment, if it diverged.
    /// The reconstruction then holds the best state reached.
    pub divergence: Option<SfmError>,
}

/// Relative pose, triangulation and bundle adjustment of two calibrated views.
pub struct TwoViewPipeline<C = Arrsac<Pcg64>> {
    pub settings: SfmSettings,
    estimator: RelativePoseEstimator<C>,
    bundle_adjuster: Option<BundleAdjuster>,
}

impl TwoViewPipeline {
    pub fn new(settings: SfmSettings, session: &CalibrationSession) -> Self {
        let estimator = RelativePoseEstimator::new(&settings, session);
        Self {
            settings,
            estimator,
            bundle_adjuster: None,
        }
    }
}

impl<C> TwoViewPipeline<C>
where
    C: Consensus<EightPoint, FeatureMatch<NormalizedKeyPoint>>,
{
    pub fn with_estimator(settings: SfmSettings, estimator: RelativePoseEstimator<C>) -> Self {
        Self {
            settings,
            estimator,
            bundle_adjuster: None,
        }
    }

    /// Bundle adjusts with `bundle_adjuster` instead of one built from the settings.
    #[must_use]
    pub fn with_bundle_adjuster(self, bundle_adjuster: BundleAdjuster) -> Self {
        Self {
            bundle_adjuster: Some(bundle_adjuster),
            ..self
        }
    }

    /// Reconstructs the scene seen by two views from pixel correspondences.
    ///
    /// `colors`, when given, has one color per correspondence.
    pub fn run(
        &mut self,
        session: &CalibrationSession,
        matches: &[FeatureMatch<KeyPoint>],
        colors: Option<&[[u8; 3]]>,
    ) -> Result<TwoViewOutcome, SfmError> {
        let relative_pose = self.estimator.estimate(session, matches)?;
        self.reconstruct(session, relative_pose, matches, colors)
    }

    /// Triangulates the inliers of an already known relative pose and bundle adjusts them.
    pub fn reconstruct(
        &self,
        session: &CalibrationSession,
        relative_pose: RelativePose,
        matches: &[FeatureMatch<KeyPoint>],
        colors: Option<&[[u8; 3]]>,
    ) -> Result<TwoViewOutcome, SfmError> {
        let views = vec![
            WorldToCamera::identity(),
            WorldToCamera::from(relative_pose.pose),
        ];
        let projections: Vec<_> = views
            .iter()
            .map(|&view| session.model.projection_matrix(view))
            .collect();
        let triangulator = LinearTriangulator::new().epsilon(self.settings.triangulation_epsilon);

        let mut landmarks = vec![];
        let mut invalid_triangulations = vec![];
        for &index in &relative_pose.inliers {
            let FeatureMatch(a, b) = match matches.get(index) {
                Some(&m) => m,
                None => {
                    warn!("inlier {} is not a correspondence; skipping it", index);
                    continue;
                }
            };
            let undistorted_a = session.model.undistort_keypoint(a).0;
            let undistorted_b = session.model.undistort_keypoint(b).0;
            let triangulated = triangulator
                .triangulate(&projections[0], &projections[1], undistorted_a, undistorted_b)
                .map_err(TriangulationRejection::from)
                .and_then(|point| {
                    for (view, pose) in views.iter().enumerate() {
                        let depth = (pose.isometry() * point).z;
                        if !(depth > 0.0) {
                            return Err(TriangulationRejection::BehindCamera { view, depth });
                        }
                    }
                    Ok(point)
                });
            match triangulated {
                Ok(point) => landmarks.push(Landmark {
                    point,
                    observations: vec![
                        Observation {
                            view: 0,
                            keypoint: a,
                        },
                        Observation {
                            view: 1,
                            keypoint: b,
                        },
                    ],
                    color: colors
                        .and_then(|colors| colors.get(index))
                        .copied()
                        .unwrap_or(DEFAULT_COLOR),
                }),
                Err(reason) => {
                    debug!("{}", SfmError::InvalidTriangulation { index, reason });
                    invalid_triangulations.push((index, reason));
                }
            }
        }
        info!(
            "triangulated {} of {} inliers ({} rejected)",
            landmarks.len(),
            relative_pose.inliers.len(),
            invalid_triangulations.len()
        );
        if landmarks.is_empty() {
            return Err(SfmError::DegenerateGeometry(
                "no correspondence could be triangulated".into(),
            ));
        }

        let mut reconstruction = Reconstruction { views, landmarks };
        let mut bundle_adjustment = None;
        let mut divergence = None;
        if self.settings.bundle_adjust {
            let adjuster = self
                .bundle_adjuster
                .unwrap_or_else(|| BundleAdjuster::new(&self.settings));
            match adjuster.adjust(&mut reconstruction, session) {
                Ok(report) => bundle_adjustment = Some(report),
                Err(error @ SfmError::OptimizationDivergence { .. }) => {
                    warn!("{}; keeping the best state", error);
                    divergence = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        Ok(TwoViewOutcome {
            reconstruction,
            relative_pose,
            invalid_triangulations,
            bundle_adjustment,
            divergence,
        })
    }
}
