//! Intrinsic camera calibration from several views of a planar target such as a chessboard.
//!
//! For every view a plane homography is estimated. The homographies give closed-form focal
//! lengths and the pose of the target in each view, which seed a joint Levenberg-Marquardt
//! refinement of the intrinsics, the Brown-Conrady distortion and the poses over the pixel
//! reprojection error. See [`CalibrationSolver::calibrate`].

mod homography;
mod init;
mod problem;
mod solver;
mod target;

pub use homography::*;
pub use init::*;
pub use problem::*;
pub use solver::*;
pub use target::*;
