use crate::{ImagePoint, KeyPoint};

/// Converts between pixel locations on an image and the normalized projection
/// of the camera (the point on the virtual image plane at `z = 1`).
///
/// Implementors are expected to remove lens distortion in [`CameraModel::calibrate`]
/// and to apply it again in [`CameraModel::uncalibrate`].
pub trait CameraModel {
    type Projection;

    /// Extracts the normalized projection from a pixel location in an image.
    ///
    /// The projection X axis points right and the Y axis points down.
    /// The image point uses the same coordiate frame.
    fn calibrate<P>(&self, point: P) -> Self::Projection
    where
        P: ImagePoint;

    /// Converts a normalized projection back into a pixel location.
    fn uncalibrate(&self, projection: Self::Projection) -> KeyPoint;
}
