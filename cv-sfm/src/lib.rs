//! Calibrated two-view structure from motion.
//!
//! A [`CalibrationSession`] holds the camera calibrated with `cv-calib` and is passed by
//! reference to every later stage. [`TwoViewPipeline`] estimates the relative pose of two
//! views from pixel correspondences, triangulates the inliers into a [`Reconstruction`] and
//! bundle adjusts it. The result can be written as a PLY point cloud with [`export`].
//!
//! Correspondences and calibration corners come from external detectors, either through a
//! [`CorrespondenceProvider`] or as JSON read by [`JsonCorrespondences`] and [`CornerFile`].

mod archive;
mod bundle;
mod correspondences;
mod error;
mod export;
mod pipeline;
mod reconstruction;
mod relative_pose;
mod session;
mod settings;

pub use archive::*;
pub use bundle::*;
pub use correspondences::*;
pub use error::*;
pub use export::*;
pub use pipeline::*;
pub use reconstruction::*;
pub use relative_pose::*;
pub use session::*;
pub use settings::*;
