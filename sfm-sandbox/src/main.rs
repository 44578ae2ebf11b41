use cv_calib::{CalibrationSettings, CalibrationSolver};
use cv_sfm::{
    export, CalibrationSession, CornerFile, JsonCorrespondences, SfmError, SfmSettings,
    TwoViewPipeline,
};
use log::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use structopt::StructOpt;

#[derive(StructOpt, Clone)]
#[structopt(
    name = "sfm-sandbox",
    about = "A tool for calibrating a camera and reconstructing two views"
)]
enum Opt {
    /// Calibrates a camera from detected chessboard corners.
    Calibrate {
        /// The JSON file with the detected corners.
        ///
        /// This is in the format of `cv_sfm::CornerFile`.
        #[structopt(parse(from_os_str))]
        corners: PathBuf,
        /// The file where settings are specified.
        ///
        /// This is in the format of `cv_calib::CalibrationSettings`.
        #[structopt(short, long, default_value = "calibration-settings.json")]
        settings: PathBuf,
        /// The file the calibration archive is written to.
        #[structopt(short, long, default_value = "calibration.bin")]
        output: PathBuf,
    },
    /// Reconstructs the scene seen by two images of a calibrated camera.
    Reconstruct {
        /// The calibration archive written by `calibrate`.
        #[structopt(short, long, default_value = "calibration.bin")]
        calibration: PathBuf,
        /// The JSON file with the correspondences.
        ///
        /// This is in the format of `cv_sfm::CorrespondenceFile`.
        #[structopt(parse(from_os_str))]
        correspondences: PathBuf,
        /// The file where settings are specified.
        ///
        /// This is in the format of `cv_sfm::SfmSettings`.
        #[structopt(short, long, default_value = "sfm-settings.json")]
        settings: PathBuf,
        /// The index of the first image
        #[structopt(short, default_value = "0")]
        a: usize,
        /// The index of the second image
        #[structopt(short, default_value = "1")]
        b: usize,
        /// The nearest neighbor ratio a correspondence must be below
        #[structopt(long, default_value = "0.8")]
        ratio: f64,
        /// The depth of the exported camera pyramids in world units
        #[structopt(long, default_value = "0.05")]
        camera_size: f64,
        /// Export the camera pyramids as faces rather than only vertices
        #[structopt(long)]
        camera_faces: bool,
        /// Output PLY file to deposit point cloud
        #[structopt(short, long, default_value = "reconstruction.ply")]
        output: PathBuf,
    },
}

/// Loads settings from a JSON file, falling back to the defaults.
fn load_settings<T: Default + serde::de::DeserializeOwned>(path: &Path) -> T {
    let settings = File::open(path)
        .ok()
        .and_then(|file| serde_json::from_reader(file).ok());
    if settings.is_some() {
        info!("loaded existing settings");
    } else {
        info!("used default settings");
    }
    settings.unwrap_or_default()
}

fn calibrate(corners: &Path, settings: &Path, output: &Path) -> Result<(), SfmError> {
    let settings: CalibrationSettings = load_settings(settings);
    let corners = CornerFile::open(corners)?;
    let calibration = CalibrationSolver::with_settings(settings).calibrate(
        &corners.target(),
        &corners.views(),
        corners.image_size(),
    )?;
    info!(
        "calibrated with rms error {} from {} views ({:?})",
        calibration.rms_error, calibration.used_views, calibration.distortion_mode
    );
    info!("camera matrix: {}", calibration.model.intrinsics.matrix());
    info!(
        "distortion: {:?}",
        calibration.model.distortion.coefficients()
    );
    CalibrationSession::from_calibration(&calibration, corners.image_size()).save(output)
}

#[allow(clippy::too_many_arguments)]
fn reconstruct(
    calibration: &Path,
    correspondences: &Path,
    settings: &Path,
    (a, b): (usize, usize),
    ratio: f64,
    camera_size: f64,
    camera_faces: bool,
    output: &Path,
) -> Result<(), SfmError> {
    let settings: SfmSettings = load_settings(settings);
    let session = CalibrationSession::load(calibration)?;
    let (matches, colors) =
        JsonCorrespondences::open(correspondences)?.matches_with_colors(a, b, ratio);

    let mut pipeline = TwoViewPipeline::new(settings, &session);
    let outcome = pipeline.run(&session, &matches, Some(&colors))?;
    if let Some(divergence) = &outcome.divergence {
        warn!("exporting the best state after: {}", divergence);
    }
    if let Some(report) = &outcome.bundle_adjustment {
        info!(
            "bundle adjustment rms {} -> {} in {} iterations",
            report.initial_rms, report.final_rms, report.iterations
        );
    }

    info!("exporting the reconstruction to {}", output.display());
    let reconstruction = &outcome.reconstruction;
    let mut writer = BufWriter::new(File::create(output)?);
    export(
        &mut writer,
        reconstruction.points_and_colors(),
        reconstruction.export_cameras(camera_size),
        camera_faces,
    )?;
    writer.flush()?;
    Ok(())
}

fn main() {
    pretty_env_logger::init_timed();
    let result = match Opt::from_args() {
        Opt::Calibrate {
            corners,
            settings,
            output,
        } => calibrate(&corners, &settings, &output),
        Opt::Reconstruct {
            calibration,
            correspondences,
            settings,
            a,
            b,
            ratio,
            camera_size,
            camera_faces,
            output,
        } => reconstruct(
            &calibration,
            &correspondences,
            &settings,
            (a, b),
            ratio,
            camera_size,
            camera_faces,
            &output,
        ),
    };
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
