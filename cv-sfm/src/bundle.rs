use crate::{CalibrationSession, Reconstruction, SfmError, SfmSettings};
use cv_optimize::{BundleAdjustment, BundleObservation, LevenbergMarquardt, TerminationReason};
use log::info;

/// The outcome of bundle adjusting a [`Reconstruction`].
///
/// Costs are sums of squared pixel residuals and RMS values are per observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BundleAdjustmentReport {
    pub initial_cost: f64,
    pub final_cost: f64,
    pub initial_rms: f64,
    pub final_rms: f64,
    pub iterations: usize,
    pub termination: TerminationReason,
}

/// Refines every view and landmark of a reconstruction at once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BundleAdjuster {
    solver: LevenbergMarquardt,
}

impl BundleAdjuster {
    pub fn new(settings: &SfmSettings) -> Self {
        Self {
            solver: LevenbergMarquardt::new()
                .with_ftol(settings.ba_ftol)
                .with_xtol(settings.ba_xtol)
                .with_gtol(settings.ba_gtol)
                .with_patience(settings.ba_max_iterations),
        }
    }

    /// Uses `solver` as it is configured.
    pub fn with_solver(solver: LevenbergMarquardt) -> Self {
        Self { solver }
    }

    /// Adjusts `reconstruction` in place.
    ///
    /// The observations are undistorted with the session's camera first. The first view
    /// stays fixed. The reconstruction always ends up in the best state the optimizer
    /// reached, which is also the case when [`SfmError::OptimizationDivergence`] is returned.
    pub fn adjust(
        &self,
        reconstruction: &mut Reconstruction,
        session: &CalibrationSession,
    ) -> Result<BundleAdjustmentReport, SfmError> {
        let observations = reconstruction
            .landmarks
            .iter()
            .enumerate()
            .flat_map(|(point, landmark)| {
                landmark
                    .observations
                    .iter()
                    .map(move |observation| BundleObservation {
                        view: observation.view,
                        point,
                        keypoint: session.model.undistort_keypoint(observation.keypoint).0,
                    })
            })
            .collect();
        let mut problem = BundleAdjustment::new(
            session.model.intrinsics,
            reconstruction.views.clone(),
            reconstruction.landmarks.iter().map(|l| l.point).collect(),
            observations,
        );
        info!(
            "bundle adjusting {} views and {} landmarks with {} observations",
            problem.views().len(),
            problem.points().len(),
            problem.observations().len()
        );

        let initial_rms = problem.rms();
        let result = self.solver.minimize(&mut problem);
        let final_rms = problem.rms();
        let (views, points) = problem.into_parts();
        reconstruction.views = views;
        for (landmark, point) in reconstruction.landmarks.iter_mut().zip(points) {
            landmark.point = point;
        }

        let report = result?;
        info!(
            "bundle adjustment finished after {} iterations ({:?}): rms {} -> {}",
            report.iterations, report.termination, initial_rms, final_rms
        );
        Ok(BundleAdjustmentReport {
            initial_cost: report.initial_cost,
            final_cost: report.final_cost,
            initial_rms,
            final_rms,
            iterations: report.iterations,
            termination: report.termination,
        })
    }
}
