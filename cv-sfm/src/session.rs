use crate::{CalibrationArchive, SfmError};
use cv_calib::Calibration;
use cv_core::nalgebra::Vector2;
use cv_pinhole::IntrinsicModel;
use log::info;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// The calibrated camera shared by every stage after calibration.
///
/// Pose estimation, triangulation and bundle adjustment take the session by reference,
/// so nothing about the camera is global.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSession {
    pub model: IntrinsicModel,
    /// RMS reprojection error of the calibration in pixels.
    pub rms_error: f64,
    /// Not persisted in archives.
    pub image_size: Option<Vector2<usize>>,
}

impl CalibrationSession {
    pub fn new(model: IntrinsicModel, rms_error: f64) -> Self {
        Self {
            model,
            rms_error,
            image_size: None,
        }
    }

    pub fn from_calibration(calibration: &Calibration, image_size: Vector2<usize>) -> Self {
        Self {
            model: calibration.model,
            rms_error: calibration.rms_error,
            image_size: Some(image_size),
        }
    }

    pub fn from_archive(archive: &CalibrationArchive) -> Self {
        Self::new(archive.model(), archive.error)
    }

    pub fn archive(&self) -> CalibrationArchive {
        CalibrationArchive::from_model(&self.model, self.rms_error)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SfmError> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.archive().write(&mut writer)?;
        writer.flush()?;
        info!("saved calibration to {}", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SfmError> {
        let path = path.as_ref();
        let archive = CalibrationArchive::read(BufReader::new(File::open(path)?))?;
        info!(
            "loaded calibration from {} with rms error {}",
            path.display(),
            archive.error
        );
        Ok(Self::from_archive(&archive))
    }
}
