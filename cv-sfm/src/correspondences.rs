use crate::SfmError;
use cv_calib::{CalibrationView, PlanarTarget};
use cv_core::nalgebra::Vector2;
use cv_core::{FeatureMatch, KeyPoint};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Supplies pixel correspondences between two images.
///
/// Every keypoint of image `a` appears in at most one returned match. `ratio` is the
/// nearest neighbor ratio threshold a match must be below.
pub trait CorrespondenceProvider {
    fn matches(
        &mut self,
        a: usize,
        b: usize,
        ratio: f64,
    ) -> Result<Vec<FeatureMatch<KeyPoint>>, SfmError>;
}

/// The matches between one pair of images in a [`CorrespondenceFile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairMatches {
    pub a: usize,
    pub b: usize,
    /// `[xa, ya, xb, yb]` in pixels.
    pub matches: Vec<[f64; 4]>,
    /// The nearest neighbor ratio of every match.
    #[serde(default)]
    pub ratios: Option<Vec<f64>>,
    /// The color of every match.
    #[serde(default)]
    pub colors: Option<Vec<[u8; 3]>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrespondenceFile {
    #[serde(default)]
    pub images: Vec<String>,
    pub pairs: Vec<PairMatches>,
}

/// Correspondences produced by an external matcher and stored as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonCorrespondences {
    file: CorrespondenceFile,
}

impl JsonCorrespondences {
    pub fn new(file: CorrespondenceFile) -> Self {
        Self { file }
    }

    pub fn from_reader(reader: impl Read) -> Result<Self, SfmError> {
        Ok(Self::new(serde_json::from_reader(reader)?))
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, SfmError> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    pub fn images(&self) -> &[String] {
        &self.file.images
    }

    /// Like [`CorrespondenceProvider::matches`], but also returns one color per match.
    ///
    /// Matches without a color in the file are white. A pair stored as `b, a` is swapped.
    pub fn matches_with_colors(
        &self,
        a: usize,
        b: usize,
        ratio: f64,
    ) -> (Vec<FeatureMatch<KeyPoint>>, Vec<[u8; 3]>) {
        let (pair, swapped) = match self
            .file
            .pairs
            .iter()
            .find_map(|pair| match (pair.a, pair.b) {
                (pa, pb) if (pa, pb) == (a, b) => Some((pair, false)),
                (pa, pb) if (pa, pb) == (b, a) => Some((pair, true)),
                _ => None,
            }) {
            Some(found) => found,
            None => {
                warn!("no correspondences between images {} and {}", a, b);
                return (vec![], vec![]);
            }
        };

        let mut seen = HashSet::new();
        let mut duplicates = 0;
        let mut matches = vec![];
        let mut colors = vec![];
        for (ix, &[xa, ya, xb, yb]) in pair.matches.iter().enumerate() {
            let passes = pair
                .ratios
                .as_ref()
                .and_then(|ratios| ratios.get(ix))
                .map_or(true, |&r| r < ratio);
            if !passes {
                continue;
            }
            let (first, second) = if swapped {
                (KeyPoint::new(xb, yb), KeyPoint::new(xa, ya))
            } else {
                (KeyPoint::new(xa, ya), KeyPoint::new(xb, yb))
            };
            if !seen.insert((first.x.to_bits(), first.y.to_bits())) {
                duplicates += 1;
                continue;
            }
            matches.push(FeatureMatch(first, second));
            colors.push(
                pair.colors
                    .as_ref()
                    .and_then(|colors| colors.get(ix))
                    .copied()
                    .unwrap_or(crate::DEFAULT_COLOR),
            );
        }
        if duplicates != 0 {
            warn!(
                "dropped {} matches that reuse a keypoint of image {}",
                duplicates, a
            );
        }
        info!(
            "loaded {} of {} correspondences between images {} and {}",
            matches.len(),
            pair.matches.len(),
            a,
            b
        );
        (matches, colors)
    }
}

impl CorrespondenceProvider for JsonCorrespondences {
    fn matches(
        &mut self,
        a: usize,
        b: usize,
        ratio: f64,
    ) -> Result<Vec<FeatureMatch<KeyPoint>>, SfmError> {
        Ok(self.matches_with_colors(a, b, ratio).0)
    }
}

/// One image of detected calibration corners in a [`CornerFile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CornerView {
    pub id: String,
    /// Ordered like the target points.
    pub corners: Vec<[f64; 2]>,
}

/// Calibration corners produced by an external corner detector, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CornerFile {
    /// `[width, height]` in pixels.
    pub image_size: [usize; 2],
    /// `[columns, rows]` of inside corners.
    pub pattern: [usize; 2],
    #[serde(default = "default_square_size")]
    pub square_size: f64,
    pub views: Vec<CornerView>,
}

fn default_square_size() -> f64 {
    1.0
}

impl CornerFile {
    pub fn from_reader(reader: impl Read) -> Result<Self, SfmError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, SfmError> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    pub fn image_size(&self) -> Vector2<usize> {
        Vector2::new(self.image_size[0], self.image_size[1])
    }

    pub fn target(&self) -> PlanarTarget {
        PlanarTarget::chessboard(self.pattern[0], self.pattern[1], self.square_size)
    }

    pub fn views(&self) -> Vec<CalibrationView> {
        self.views
            .iter()
            .map(|view| {
                CalibrationView::new(
                    view.id.clone(),
                    view.corners
                        .iter()
                        .map(|&[x, y]| KeyPoint::new(x, y))
                        .collect(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = r#"{
        "images": ["left.png", "right.png"],
        "pairs": [{
            "a": 0,
            "b": 1,
            "matches": [[1, 2, 3, 4], [5, 6, 7, 8], [1, 2, 9, 9], [10, 11, 12, 13]],
            "ratios": [0.5, 0.6, 0.5, 0.9],
            "colors": [[1, 1, 1], [2, 2, 2], [3, 3, 3], [4, 4, 4]]
        }]
    }"#;

    #[test]
    fn repeated_keypoints_keep_the_first_match() {
        let provider = JsonCorrespondences::from_reader(FILE.as_bytes()).unwrap();
        let (matches, colors) = provider.matches_with_colors(0, 1, 1.0);
        assert_eq!(matches.len(), 3);
        assert_eq!(matches[0].1, KeyPoint::new(3.0, 4.0));
        assert_eq!(colors, vec![[1, 1, 1], [2, 2, 2], [4, 4, 4]]);
    }

    #[test]
    fn ratio_threshold_filters_matches() {
        let mut provider = JsonCorrespondences::from_reader(FILE.as_bytes()).unwrap();
        let matches = provider.matches(0, 1, 0.8).unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.0 != KeyPoint::new(10.0, 11.0)));
    }

    #[test]
    fn reversed_pairs_are_swapped() {
        let mut provider = JsonCorrespondences::from_reader(FILE.as_bytes()).unwrap();
        let matches = provider.matches(1, 0, 1.0).unwrap();
        assert_eq!(matches[0], FeatureMatch(KeyPoint::new(3.0, 4.0), KeyPoint::new(1.0, 2.0)));
        assert!(provider.matches(0, 2, 1.0).unwrap().is_empty());
    }

    #[test]
    fn corner_file_builds_target_and_views() {
        let json = r#"{
            "image_size": [640, 480],
            "pattern": [3, 2],
            "views": [{"id": "a", "corners": [[0, 0], [1, 0], [2, 0], [0, 1], [1, 1], [2, 1]]}]
        }"#;
        let file = CornerFile::from_reader(json.as_bytes()).unwrap();
        assert_eq!(file.square_size, 1.0);
        assert_eq!(file.target().len(), 6);
        assert_eq!(file.image_size(), Vector2::new(640, 480));
        let views = file.views();
        assert_eq!(views[0].id, "a");
        assert_eq!(views[0].corners[4], KeyPoint::new(1.0, 1.0));
    }
}
