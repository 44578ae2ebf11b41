#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The settings for two-view reconstruction.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SfmSettings {
    /// The sample consensus inlier threshold in pixels
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_consensus_threshold_pixels")
    )]
    pub consensus_threshold_pixels: f64,
    /// The seed of the sample consensus random number generator
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_consensus_seed"))]
    pub consensus_seed: u8,
    /// Correspondences whose scatter has a smaller to larger eigenvalue ratio below this are collinear
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_degenerate_eigen_ratio")
    )]
    pub degenerate_eigen_ratio: f64,
    /// The minimum number of correspondences (and consensus inliers) for relative pose estimation
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_minimum_correspondences")
    )]
    pub minimum_correspondences: usize,
    /// The pair is rejected as planar (or a pure rotation) when a single homography maps at
    /// least this fraction of the consensus inliers within the consensus threshold
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_planar_inlier_ratio")
    )]
    pub planar_inlier_ratio: f64,
    /// Whether to bundle adjust the two-view reconstruction
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_bundle_adjust"))]
    pub bundle_adjust: bool,
    /// The maximum iterations of bundle adjustment
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_ba_max_iterations")
    )]
    pub ba_max_iterations: usize,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_ba_tolerance"))]
    pub ba_ftol: f64,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_ba_tolerance"))]
    pub ba_xtol: f64,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_ba_tolerance"))]
    pub ba_gtol: f64,
    /// Homogeneous points with `|w|` below this fraction of their norm are at infinity
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_triangulation_epsilon")
    )]
    pub triangulation_epsilon: f64,
}

impl Default for SfmSettings {
    fn default() -> Self {
        Self {
            consensus_threshold_pixels: default_consensus_threshold_pixels(),
            consensus_seed: default_consensus_seed(),
            degenerate_eigen_ratio: default_degenerate_eigen_ratio(),
            minimum_correspondences: default_minimum_correspondences(),
            planar_inlier_ratio: default_planar_inlier_ratio(),
            bundle_adjust: default_bundle_adjust(),
            ba_max_iterations: default_ba_max_iterations(),
            ba_ftol: default_ba_tolerance(),
            ba_xtol: default_ba_tolerance(),
            ba_gtol: default_ba_tolerance(),
            triangulation_epsilon: default_triangulation_epsilon(),
        }
    }
}

fn default_consensus_threshold_pixels() -> f64 {
    1.0
}

fn default_consensus_seed() -> u8 {
    5
}

fn default_degenerate_eigen_ratio() -> f64 {
    1e-6
}

fn default_minimum_correspondences() -> usize {
    8
}

fn default_planar_inlier_ratio() -> f64 {
    0.8
}

fn default_bundle_adjust() -> bool {
    true
}

fn default_ba_max_iterations() -> usize {
    100
}

fn default_ba_tolerance() -> f64 {
    1e-10
}

fn default_triangulation_epsilon() -> f64 {
    1e-12
}
