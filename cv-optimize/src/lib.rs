//! Nonlinear least squares for the reconstruction pipeline.
//!
//! [`LevenbergMarquardt`] minimizes any [`LeastSquaresProblem`] and always leaves the problem
//! at the best parameters it evaluated. [`BundleAdjustment`] is the reprojection problem over
//! camera poses and 3d points. Camera calibration implements its own problem in `cv-calib`
//! and uses the same optimizer.

mod bundle_adjustment;
mod solver;

pub use bundle_adjustment::*;
pub use solver::*;
