use crate::ExportCamera;
use cv_core::nalgebra::{Point3, Vector3};
use cv_core::{KeyPoint, Pose, WorldToCamera};

/// The color of landmarks whose correspondence had none.
pub const DEFAULT_COLOR: [u8; 3] = [255, 255, 255];

/// A raw pixel observation of a landmark in a view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub view: usize,
    pub keypoint: KeyPoint,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Landmark {
    pub point: Point3<f64>,
    pub observations: Vec<Observation>,
    pub color: [u8; 3],
}

/// Camera poses and the landmarks seen by them.
///
/// The world frame is the frame of the first view and the scale is whatever the initial
/// baseline had. Bundle adjustment replaces the poses and points together.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reconstruction {
    pub views: Vec<WorldToCamera>,
    pub landmarks: Vec<Landmark>,
}

impl Reconstruction {
    pub fn observation_count(&self) -> usize {
        self.landmarks.iter().map(|l| l.observations.len()).sum()
    }

    pub fn points_and_colors(&self) -> Vec<(Point3<f64>, [u8; 3])> {
        self.landmarks
            .iter()
            .map(|landmark| (landmark.point, landmark.color))
            .collect()
    }

    /// Every view as a camera for [`crate::export`], drawn `focal_length` world units deep.
    pub fn export_cameras(&self, focal_length: f64) -> Vec<ExportCamera> {
        self.views
            .iter()
            .map(|&view| {
                let camera_to_world = view.inverse().isometry();
                ExportCamera {
                    optical_center: camera_to_world * Point3::origin(),
                    // Image y points down.
                    up_direction: camera_to_world * -Vector3::y(),
                    forward_direction: camera_to_world * Vector3::z(),
                    focal_length,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cv_core::nalgebra::Rotation3;

    #[test]
    fn export_cameras_sit_at_the_optical_centers() {
        let moved = WorldToCamera::from_parts(
            Vector3::new(-1.0, 0.0, 0.0),
            Rotation3::from_euler_angles(0.0, 0.3, 0.0),
        );
        let reconstruction = Reconstruction {
            views: vec![WorldToCamera::identity(), moved],
            landmarks: vec![],
        };
        let cameras = reconstruction.export_cameras(0.1);
        assert_relative_eq!(cameras[0].optical_center, Point3::origin());
        assert_relative_eq!(cameras[0].forward_direction, Vector3::z());
        assert_relative_eq!(cameras[0].up_direction, -Vector3::y());
        let center = cameras[1].optical_center;
        assert_relative_eq!(
            moved.isometry() * center,
            Point3::origin(),
            epsilon = 1e-12
        );
    }
}
