//! # CV Core
//!
//! Common types for the calibration and two-view reconstruction crates in this workspace.
//! Every other crate talks to the others through the types defined here: keypoints
//! in pixel coordinates, homogeneous camera and world points, camera poses and the
//! so(3) rotation parameterization used by the optimizers.
//!
//! ## Coordinate frames
//!
//! * Image points ([`KeyPoint`]) are in pixels with `x` right and `y` down.
//! * Camera points ([`CameraPoint`]) have the optical center as the origin, `x` right,
//!   `y` down and `z` forwards along the optical axis.
//! * World points ([`WorldPoint`]) live in the frame of the reconstruction. In the
//!   two-view pipeline the world frame is the frame of the first camera.
//!
//! A [`WorldToCamera`] pose maps a world point into a camera point, so a projection
//! matrix is always `K [R | t]` where `R` and `t` come from a [`WorldToCamera`].

mod camera;
mod keypoint;
mod matches;
mod point;
mod pose;
mod so3;

pub use camera::*;
pub use keypoint::*;
pub use matches::*;
pub use nalgebra;
pub use point::*;
pub use pose::*;
pub use sample_consensus;
pub use so3::*;
