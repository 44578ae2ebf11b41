use crate::{
    estimate_homography, initial_intrinsics, planar_pose, CalibrationProblem, CalibrationView,
    HomographyError, PlanarTarget,
};
use cv_core::nalgebra::{Matrix3, Vector2};
use cv_core::WorldToCamera;
use cv_optimize::{LevenbergMarquardt, OptimizationError, TerminationReason};
use cv_pinhole::IntrinsicModel;
use log::{debug, info, warn};
use thiserror::Error;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Which distortion coefficients are estimated.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum DistortionMode {
    /// `k1 k2 p1 p2` are estimated and `k3` stays zero.
    FixK3,
    /// All five coefficients are estimated.
    Full,
}

/// Why a single calibration attempt failed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolveError {
    #[error("homography of view {view} failed: {source}")]
    Homography {
        view: String,
        #[source]
        source: HomographyError,
    },
    #[error("the homographies do not constrain the focal lengths")]
    IntrinsicInitialization,
    #[error("the pose of view {view} could not be initialized")]
    PoseInitialization { view: String },
    #[error("optimization failed: {0}")]
    Optimization(#[from] OptimizationError),
    #[error("the optimizer stopped without converging ({0:?})")]
    NotConverged(TerminationReason),
    #[error("the solution has invalid focal lengths ({fx}, {fy})")]
    InvalidIntrinsics { fx: f64, fy: f64 },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("none of the {total} calibration views had a complete set of corners")]
    NoValidCalibrationImages { total: usize },
    #[error("calibration failed after retrying: {cause}")]
    CalibrationFailed {
        #[source]
        cause: SolveError,
    },
}

/// The settings for calibration.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CalibrationSettings {
    /// Maximum number of Levenberg-Marquardt iterations.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_max_iterations"))]
    pub max_iterations: usize,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_tolerance"))]
    pub ftol: f64,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_tolerance"))]
    pub xtol: f64,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_tolerance"))]
    pub gtol: f64,
    /// How many views the retry uses.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_retry_view_limit"))]
    pub retry_view_limit: usize,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_initial_mode"))]
    pub initial_mode: DistortionMode,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_retry_mode"))]
    pub retry_mode: DistortionMode,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            ftol: default_tolerance(),
            xtol: default_tolerance(),
            gtol: default_tolerance(),
            retry_view_limit: default_retry_view_limit(),
            initial_mode: default_initial_mode(),
            retry_mode: default_retry_mode(),
        }
    }
}

fn default_max_iterations() -> usize {
    100
}

fn default_tolerance() -> f64 {
    1e-10
}

fn default_retry_view_limit() -> usize {
    6
}

fn default_initial_mode() -> DistortionMode {
    DistortionMode::FixK3
}

fn default_retry_mode() -> DistortionMode {
    DistortionMode::Full
}

/// The result of calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub model: IntrinsicModel,
    /// Root mean square reprojection error in pixels per corner.
    pub rms_error: f64,
    /// The pose of the target in every view that was used, by view id.
    pub poses: Vec<(String, WorldToCamera)>,
    pub used_views: usize,
    pub distortion_mode: DistortionMode,
}

#[derive(Debug, Clone, Default)]
pub struct CalibrationSolver {
    pub settings: CalibrationSettings,
}

impl CalibrationSolver {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_settings(settings: CalibrationSettings) -> Self {
        Self { settings }
    }

    /// Calibrates a camera from views of `target` taken with images of `image_size` pixels.
    ///
    /// Views that do not have exactly one corner per target point are skipped. The first
    /// attempt uses every remaining view with [`CalibrationSettings::initial_mode`]. If it
    /// fails, one more attempt is made with the first
    /// [`CalibrationSettings::retry_view_limit`] views and
    /// [`CalibrationSettings::retry_mode`].
    pub fn calibrate(
        &self,
        target: &PlanarTarget,
        views: &[CalibrationView],
        image_size: Vector2<usize>,
    ) -> Result<Calibration, CalibrationError> {
        let valid: Vec<&CalibrationView> = views
            .iter()
            .filter(|view| {
                let complete = view.corners.len() == target.len();
                if !complete {
                    warn!(
                        "skipping view {}: found {} corners, expected {}",
                        view.id,
                        view.corners.len(),
                        target.len()
                    );
                }
                complete
            })
            .collect();
        if valid.is_empty() {
            return Err(CalibrationError::NoValidCalibrationImages { total: views.len() });
        }
        info!(
            "calibrating from {} of {} views of a {}x{} target",
            valid.len(),
            views.len(),
            target.columns(),
            target.rows()
        );

        let first = self.attempt(target, &valid, image_size, self.settings.initial_mode);
        let cause = match first {
            Ok(calibration) => return Ok(calibration),
            Err(cause) => cause,
        };

        let subset = &valid[..self.settings.retry_view_limit.min(valid.len())];
        warn!(
            "first calibration attempt failed ({}), retrying with {} views and {:?}",
            cause,
            subset.len(),
            self.settings.retry_mode
        );
        self.attempt(target, subset, image_size, self.settings.retry_mode)
            .map_err(|cause| CalibrationError::CalibrationFailed { cause })
    }

    fn attempt(
        &self,
        target: &PlanarTarget,
        views: &[&CalibrationView],
        image_size: Vector2<usize>,
        mode: DistortionMode,
    ) -> Result<Calibration, SolveError> {
        let plane = target.plane_points();
        let homography = |view: &&CalibrationView| -> Result<Matrix3<f64>, SolveError> {
            estimate_homography(&plane, &view.image_points()).map_err(|source| {
                SolveError::Homography {
                    view: view.id.clone(),
                    source,
                }
            })
        };
        #[cfg(not(feature = "rayon"))]
        let homographies = views
            .iter()
            .map(homography)
            .collect::<Result<Vec<_>, _>>()?;
        #[cfg(feature = "rayon")]
        let homographies = views
            .par_iter()
            .map(homography)
            .collect::<Result<Vec<_>, _>>()?;

        let intrinsics = initial_intrinsics(&homographies, image_size)?;
        debug!(
            "initial focals {} {} with principal point {}",
            intrinsics.focals.x, intrinsics.focals.y, intrinsics.principal_point
        );
        let poses = views
            .iter()
            .zip(&homographies)
            .map(|(view, h)| {
                planar_pose(&intrinsics, h).ok_or_else(|| SolveError::PoseInitialization {
                    view: view.id.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut problem = CalibrationProblem::new(
            target.points().to_vec(),
            views.iter().map(|view| view.image_points()).collect(),
            IntrinsicModel::undistorted(intrinsics),
            poses,
            mode,
        );
        let initial_rms = problem.rms();
        let report = LevenbergMarquardt::new()
            .with_ftol(self.settings.ftol)
            .with_xtol(self.settings.xtol)
            .with_gtol(self.settings.gtol)
            .with_patience(self.settings.max_iterations)
            .minimize(&mut problem)?;
        if !report.termination.was_successful() {
            debug!(
                "calibration with {:?} stopped after {} iterations at rms {:.4} px",
                mode,
                report.iterations,
                problem.rms()
            );
            return Err(SolveError::NotConverged(report.termination));
        }

        let model = problem.model();
        let focals = model.intrinsics.focals;
        if !focals.iter().all(|f| f.is_finite() && *f > 0.0) {
            return Err(SolveError::InvalidIntrinsics {
                fx: focals.x,
                fy: focals.y,
            });
        }
        let rms_error = problem.rms();
        info!(
            "calibration with {:?} converged ({:?}): rms {:.4} px (initially {:.4} px)",
            mode, report.termination, rms_error, initial_rms
        );

        Ok(Calibration {
            model,
            rms_error,
            poses: views
                .iter()
                .map(|view| view.id.clone())
                .zip(problem.poses().iter().copied())
                .collect(),
            used_views: views.len(),
            distortion_mode: mode,
        })
    }
}
