use cv_core::nalgebra::{Point2, Point3};
use cv_core::KeyPoint;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The known geometry of a planar calibration pattern.
///
/// Points lie on the plane `z = 0` of the target frame. For a chessboard with `columns x rows`
/// inside corners, the point at index `r * columns + c` is `(c * square_size, r * square_size, 0)`,
/// so the order matches a detector that reports corners row by row.
///
/// ```
/// use cv_calib::PlanarTarget;
/// let target = PlanarTarget::chessboard(7, 9, 1.0);
/// assert_eq!(target.len(), 63);
/// assert_eq!(target.points()[8].x, 1.0);
/// assert_eq!(target.points()[8].y, 1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct PlanarTarget {
    columns: usize,
    rows: usize,
    square_size: f64,
    points: Vec<Point3<f64>>,
}

impl PlanarTarget {
    pub fn chessboard(columns: usize, rows: usize, square_size: f64) -> Self {
        let points = (0..rows)
            .flat_map(|r| {
                (0..columns).map(move |c| {
                    Point3::new(c as f64 * square_size, r as f64 * square_size, 0.0)
                })
            })
            .collect();
        Self {
            columns,
            rows,
            square_size,
            points,
        }
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn square_size(&self) -> f64 {
        self.square_size
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    /// The target points as coordinates on their plane.
    pub fn plane_points(&self) -> Vec<Point2<f64>> {
        self.points.iter().map(|p| p.xy()).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// The detected target corners in one image, in the order of [`PlanarTarget::points`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CalibrationView {
    /// Identifies the image the corners came from in logs and results.
    pub id: String,
    pub corners: Vec<KeyPoint>,
}

impl CalibrationView {
    pub fn new(id: impl Into<String>, corners: Vec<KeyPoint>) -> Self {
        Self {
            id: id.into(),
            corners,
        }
    }

    pub fn image_points(&self) -> Vec<Point2<f64>> {
        self.corners.iter().map(|kp| kp.0).collect()
    }
}
