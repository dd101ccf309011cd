//! Local Binary Patterns Histograms (LBPH) face recognizer.
//!
//! Thin owner of OpenCV's `LBPHFaceRecognizer` (radius 1, 8 neighbours,
//! 8×8 grid). Faces are brought to the sample canvas before training and
//! prediction so every histogram covers the same geometry. The recognizer's
//! own threshold is disabled; acceptance is decided by the caller.

use crate::samples::SAMPLE_SIZE;
use crate::types::Prediction;
use image::imageops::{self, FilterType};
use image::GrayImage;
use opencv::core::{Mat, MatTraitConst, MatTraitConstManual, Ptr, Vector};
use opencv::face::{
    FaceRecognizerTrait, FaceRecognizerTraitConst, LBPHFaceRecognizer, LBPHFaceRecognizerTraitConst,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

const RADIUS: i32 = 1;
const NEIGHBORS: i32 = 8;
const GRID_X: i32 = 8;
const GRID_Y: i32 = 8;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("no trained model at {0}")]
    NotFound(String),
    #[error("cannot use a model without samples")]
    Empty,
    #[error("model io ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("unsupported model: {0}")]
    Unsupported(String),
}

/// Trained LBPH model. Retraining builds a new one.
pub struct LbphModel {
    recognizer: Ptr<LBPHFaceRecognizer>,
    labels: Vec<u32>,
}

impl LbphModel {
    fn create() -> Result<Ptr<LBPHFaceRecognizer>, ModelError> {
        Ok(LBPHFaceRecognizer::create(RADIUS, NEIGHBORS, GRID_X, GRID_Y, f64::MAX)?)
    }

    /// Fit the model to every `(label, face)` pair in one pass.
    pub fn train<I>(faces: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = (u32, GrayImage)>,
    {
        let mut images = Vector::<Mat>::new();
        let mut ids = Vector::<i32>::new();
        let mut labels = Vec::new();
        for (label, face) in faces {
            let id = i32::try_from(label)
                .map_err(|_| ModelError::Unsupported(format!("label {label} out of range")))?;
            images.push(to_mat(&fit_canvas(&face))?);
            ids.push(id);
            labels.push(label);
        }
        if labels.is_empty() {
            return Err(ModelError::Empty);
        }

        let mut recognizer = Self::create()?;
        recognizer.train(&images, &ids)?;
        Ok(Self { recognizer, labels })
    }

    /// Nearest training sample for `face`.
    pub fn predict(&self, face: &GrayImage) -> Result<Prediction, ModelError> {
        let sample = to_mat(&fit_canvas(face))?;
        let mut label = -1;
        let mut confidence = 0.0;
        self.recognizer.predict(&sample, &mut label, &mut confidence)?;

        Ok(match u32::try_from(label) {
            Ok(label) => Prediction {
                label,
                distance: confidence,
            },
            // no neighbour at all
            Err(_) => Prediction {
                label: 0,
                distance: f64::INFINITY,
            },
        })
    }

    /// Distinct identities the model can predict.
    pub fn labels(&self) -> BTreeSet<u32> {
        self.labels.iter().copied().collect()
    }

    pub fn sample_count(&self) -> usize {
        self.labels.len()
    }

    /// Write to `path`, replacing any previous model atomically.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let io = |source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }

        let tmp = tmp_path(path);
        self.recognizer.write(&tmp.to_string_lossy())?;
        std::fs::rename(&tmp, path).map_err(io)?;

        tracing::info!(path = %path.display(), samples = self.labels.len(), "model saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::NotFound(path.display().to_string()));
        }

        let mut recognizer = Self::create()?;
        recognizer.read(&path.to_string_lossy())?;
        if recognizer.get_grid_x()? != GRID_X
            || recognizer.get_grid_y()? != GRID_Y
            || recognizer.get_radius()? != RADIUS
            || recognizer.get_neighbors()? != NEIGHBORS
        {
            return Err(ModelError::Unsupported(format!(
                "{}: expected radius {RADIUS}, {NEIGHBORS} neighbours, {GRID_X}x{GRID_Y} grid",
                path.display()
            )));
        }

        let stored = recognizer.get_labels()?;
        let labels = stored
            .data_typed::<i32>()?
            .iter()
            .map(|&l| {
                u32::try_from(l).map_err(|_| ModelError::Unsupported(format!("negative label {l}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if labels.is_empty() {
            return Err(ModelError::Empty);
        }

        tracing::info!(path = %path.display(), samples = labels.len(), "model loaded");
        Ok(Self { recognizer, labels })
    }

    /// Delete the model artifact. Missing is fine.
    pub fn remove(path: &Path) -> Result<bool, ModelError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ModelError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// `classifier.xml` -> `classifier.tmp.xml`. OpenCV picks the storage
/// format from the extension, so it has to stay last.
fn tmp_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    match path.extension() {
        Some(ext) => path.with_file_name(format!("{stem}.tmp.{}", ext.to_string_lossy())),
        None => path.with_file_name(format!("{stem}.tmp.xml")),
    }
}

fn fit_canvas(face: &GrayImage) -> GrayImage {
    if face.dimensions() == (SAMPLE_SIZE, SAMPLE_SIZE) {
        face.clone()
    } else {
        imageops::resize(face, SAMPLE_SIZE, SAMPLE_SIZE, FilterType::Triangle)
    }
}

/// Copy a grayscale image into an owned single-channel `Mat`.
pub(crate) fn to_mat(face: &GrayImage) -> Result<Mat, opencv::Error> {
    gray_mat(face.as_raw(), face.width(), face.height())
}

pub(crate) fn gray_mat(gray: &[u8], width: u32, height: u32) -> Result<Mat, opencv::Error> {
    Mat::new_rows_cols_with_data(height as i32, width as i32, gray)?.try_clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn checker(period: u32) -> GrayImage {
        GrayImage::from_fn(SAMPLE_SIZE, SAMPLE_SIZE, |x, y| {
            Luma([if (x / period + y / period) % 2 == 0 { 220 } else { 30 }])
        })
    }

    fn stripes(period: u32) -> GrayImage {
        GrayImage::from_fn(SAMPLE_SIZE, SAMPLE_SIZE, |x, _| Luma([((x / period) % 4 * 60) as u8]))
    }

    #[test]
    fn test_train_empty_fails() {
        let err = LbphModel::train(Vec::new()).unwrap_err();
        assert!(matches!(err, ModelError::Empty));
    }

    #[test]
    fn test_identical_face_has_zero_distance() {
        let model = LbphModel::train(vec![(1, checker(10)), (2, stripes(7))]).unwrap();
        let p = model.predict(&checker(10)).unwrap();
        assert_eq!(p.label, 1);
        assert!(p.distance.abs() < 1e-6);

        let p = model.predict(&stripes(7)).unwrap();
        assert_eq!(p.label, 2);
    }

    #[test]
    fn test_never_predicts_untrained_label() {
        let model = LbphModel::train(vec![(1, checker(10)), (2, stripes(7))]).unwrap();
        assert_eq!(model.labels(), BTreeSet::from([1, 2]));
        assert_eq!(model.sample_count(), 2);
        for face in [checker(3), stripes(20), GrayImage::from_pixel(50, 80, Luma([128]))] {
            let p = model.predict(&face).unwrap();
            assert!(p.label == 1 || p.label == 2);
            assert!(p.distance.is_finite());
        }
    }

    #[test]
    fn test_smaller_face_is_resized_to_canvas() {
        let model = LbphModel::train(vec![(4, checker(10)), (5, stripes(7))]).unwrap();
        let small = imageops::resize(&checker(10), 100, 100, FilterType::Nearest);
        assert_eq!(model.predict(&small).unwrap().label, 4);
    }

    #[test]
    fn test_save_load_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.xml");

        LbphModel::train(vec![(1, checker(10))]).unwrap().save(&path).unwrap();
        let second = LbphModel::train(vec![(2, stripes(7)), (3, checker(5))]).unwrap();
        second.save(&path).unwrap();

        assert!(!tmp_path(&path).exists());
        let loaded = LbphModel::load(&path).unwrap();
        assert_eq!(loaded.labels(), BTreeSet::from([2, 3]));
        assert_eq!(loaded.predict(&stripes(7)).unwrap().label, 2);
    }

    #[test]
    fn test_tmp_path_keeps_extension_last() {
        assert_eq!(
            tmp_path(Path::new("/data/classifier.xml")),
            PathBuf::from("/data/classifier.tmp.xml")
        );
    }

    #[test]
    fn test_load_missing_model() {
        let err = LbphModel::load(Path::new("/nonexistent/classifier.xml")).unwrap_err();
        assert!(matches!(err, ModelError::NotFound(_)));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.xml");
        std::fs::write(&path, "not a model").unwrap();
        assert!(LbphModel::load(&path).is_err());
    }
}
