//! This crate contains computational geometry algorithms for the reconstruction crates.
//!
//! ## Triangulation
//!
//! In this problem we know the projection matrices `P = K [R | t]` of two cameras and the
//! pixel at which each camera observed the same feature. We want the 3d point whose
//! projection lands on both pixels.
//!
//! - `p` the point we are trying to triangulate
//! - `a` the observation on camera A
//! - `b` the observation on camera B
//! - `O` the optical center of a camera
//! - `@` the image plane
//!
//! ```text
//!                        @
//!                        @
//!               p--------b--------O
//!              /         @
//!             /          @
//!            /           @
//!           /            @
//!   @@@@@@@a@@@@@
//!         /
//!        /
//!       /
//!      O
//! ```

pub mod triangulation;

pub use triangulation::{LinearTriangulator, TriangulationError};
