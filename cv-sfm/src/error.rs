use cv_calib::CalibrationError;
use cv_geom::TriangulationError;
use cv_optimize::OptimizationError;
use thiserror::Error;

/// Why a single correspondence did not become a landmark.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum TriangulationRejection {
    #[error(transparent)]
    Geometry(#[from] TriangulationError),
    #[error("the point is behind camera {view} (depth {depth:e})")]
    BehindCamera { view: usize, depth: f64 },
}

#[derive(Debug, Error)]
pub enum SfmError {
    #[error("calibration failed: {0}")]
    Calibration(#[from] CalibrationError),
    #[error("found {found} correspondences, but at least {required} are required")]
    InsufficientCorrespondences { found: usize, required: usize },
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),
    #[error(
        "bundle adjustment diverged; best cost {best_cost:e} (initially {initial_cost:e})"
    )]
    OptimizationDivergence { best_cost: f64, initial_cost: f64 },
    #[error("correspondence {index} could not be triangulated: {reason}")]
    InvalidTriangulation {
        index: usize,
        #[source]
        reason: TriangulationRejection,
    },
    #[error("optimization failed: {0}")]
    Optimization(OptimizationError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("calibration archive error: {0}")]
    Archive(#[from] bincode::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<OptimizationError> for SfmError {
    fn from(error: OptimizationError) -> Self {
        match error {
            OptimizationError::Divergence { best_cost, report } => Self::OptimizationDivergence {
                best_cost,
                initial_cost: report.initial_cost,
            },
            other => Self::Optimization(other),
        }
    }
}
