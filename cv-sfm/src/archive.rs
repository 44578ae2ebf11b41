use crate::SfmError;
use cv_core::nalgebra::Matrix3;
use cv_pinhole::{CameraIntrinsics, Distortion, IntrinsicModel};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// The persisted result of a calibration.
///
/// `K` is the intrinsic matrix in row-major order and `dist` holds the distortion
/// coefficients as `k1 k2 p1 p2 k3`. `error` is the RMS reprojection error in pixels.
///
/// Archives are written with `bincode`, which stores every `f64` bit for bit. Its encoding
/// is positional: the fields follow each other in declaration order with no keys, so the
/// `K`, `dist` and `error` names only appear with self-describing serde formats such as
/// JSON. Reordering the fields breaks existing archives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationArchive {
    #[serde(rename = "K")]
    pub k: [f64; 9],
    pub dist: Vec<f64>,
    pub error: f64,
}

impl CalibrationArchive {
    pub fn from_model(model: &IntrinsicModel, error: f64) -> Self {
        let matrix = model.intrinsics.matrix();
        let mut k = [0.0; 9];
        for (ix, value) in k.iter_mut().enumerate() {
            *value = matrix[(ix / 3, ix % 3)];
        }
        Self {
            k,
            dist: model.distortion.coefficients().to_vec(),
            error,
        }
    }

    pub fn model(&self) -> IntrinsicModel {
        IntrinsicModel::new(
            CameraIntrinsics::from_matrix(&Matrix3::from_row_slice(&self.k)),
            Distortion::from_coefficients(&self.dist),
        )
    }

    pub fn write(&self, writer: impl Write) -> Result<(), SfmError> {
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn read(reader: impl Read) -> Result<Self, SfmError> {
        Ok(bincode::deserialize_from(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_core::nalgebra::{Point2, Vector2};

    fn model() -> IntrinsicModel {
        IntrinsicModel::new(
            CameraIntrinsics::identity()
                .focals(Vector2::new(812.337_291, 809.114_002))
                .principal_point(Point2::new(319.812_7, 241.093_4)),
            Distortion {
                k1: -0.213_4,
                k2: 0.061_29,
                p1: 0.000_813,
                p2: -0.000_421,
                k3: 0.001_7,
            },
        )
    }

    #[test]
    fn archive_round_trip_is_bit_exact() {
        let archive = CalibrationArchive::from_model(&model(), 0.187_654_321);
        let mut bytes = vec![];
        archive.write(&mut bytes).unwrap();
        let restored = CalibrationArchive::read(bytes.as_slice()).unwrap();
        for (a, b) in archive.k.iter().zip(&restored.k) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        for (a, b) in archive.dist.iter().zip(&restored.dist) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(archive.error.to_bits(), restored.error.to_bits());
        assert_eq!(restored.model(), model());
    }

    #[test]
    fn matrix_is_row_major() {
        let archive = CalibrationArchive::from_model(&model(), 0.0);
        assert_eq!(archive.k[2], 319.812_7);
        assert_eq!(archive.k[5], 241.093_4);
        assert_eq!(archive.k[8], 1.0);
        assert_eq!(archive.dist.len(), 5);
    }

    #[test]
    fn bincode_stores_fields_in_declaration_order() {
        let archive = CalibrationArchive::from_model(&model(), 0.5);
        let mut bytes = vec![];
        archive.write(&mut bytes).unwrap();
        // Nine matrix entries, a length prefix with five coefficients, then the error.
        assert_eq!(bytes.len(), 9 * 8 + 8 + 5 * 8 + 8);
        assert_eq!(bytes[..8], archive.k[0].to_le_bytes());
        assert_eq!(bytes[72..80], 5u64.to_le_bytes());
        assert_eq!(bytes[120..], 0.5f64.to_le_bytes());
    }

    #[test]
    fn json_uses_the_archive_field_names() {
        let archive = CalibrationArchive::from_model(&model(), 0.5);
        let json = serde_json::to_value(&archive).unwrap();
        assert!(json.get("K").is_some());
        assert!(json.get("dist").is_some());
        assert!(json.get("error").is_some());
    }
}
