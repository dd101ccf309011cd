//! Haar cascade face detector.
//!
//! Wraps OpenCV's `CascadeClassifier`. The two parameter sets keep enrollment
//! permissive and live recognition strict.

use crate::lbph::gray_mat;
use crate::types::BoundingBox;
use opencv::core::{Rect, Size, Vector};
use opencv::objdetect::{self, CascadeClassifierTrait, CascadeClassifierTraitConst};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}")]
    NotFound(String),
    #[error("failed to load cascade {path}: {reason}")]
    Load { path: String, reason: String },
    #[error("frame buffer of {len} bytes is shorter than {width}x{height}")]
    ShortFrame { len: usize, width: u32, height: u32 },
    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Multi-scale search parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    /// Window growth factor between scales (> 1.0).
    pub scale_factor: f32,
    /// Minimum number of merged raw hits a face needs to be reported.
    pub min_neighbors: u32,
    /// Smallest face size searched, in pixels.
    pub min_size: Option<(u32, u32)>,
}

impl DetectionParams {
    /// Enrollment: permissive, to maximise the sample yield.
    pub const CAPTURE: DetectionParams = DetectionParams {
        scale_factor: 1.3,
        min_neighbors: 5,
        min_size: None,
    };

    /// Live recognition and attendance: strict, to keep false positives down.
    pub const RECOGNITION: DetectionParams = DetectionParams {
        scale_factor: 1.1,
        min_neighbors: 10,
        min_size: None,
    };
}

/// Face localisation seam used by enrollment and recognition.
pub trait FaceDetector: Send + Sync {
    /// Detect faces in a row-major grayscale buffer of `width` × `height` bytes.
    ///
    /// Results are ordered strongest first.
    fn detect(
        &self,
        gray: &[u8],
        width: u32,
        height: u32,
        params: &DetectionParams,
    ) -> Result<Vec<BoundingBox>, CascadeError>;
}

/// A trained Haar cascade loaded from OpenCV's XML format.
pub struct CascadeClassifier {
    // detect_multi_scale needs &mut; one frame at a time is enough
    inner: Mutex<objdetect::CascadeClassifier>,
    path: PathBuf,
}

impl CascadeClassifier {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CascadeError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let load_error = |reason: String| CascadeError::Load {
            path: path.display().to_string(),
            reason,
        };

        let inner = objdetect::CascadeClassifier::new(&path.to_string_lossy())
            .map_err(|e| load_error(e.message))?;
        if inner.empty().map_err(|e| load_error(e.message))? {
            return Err(load_error("not a cascade classifier".into()));
        }

        tracing::info!(path = %path.display(), "loaded face cascade");
        Ok(Self {
            inner: Mutex::new(inner),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FaceDetector for CascadeClassifier {
    fn detect(
        &self,
        gray: &[u8],
        width: u32,
        height: u32,
        params: &DetectionParams,
    ) -> Result<Vec<BoundingBox>, CascadeError> {
        let len = width as usize * height as usize;
        if gray.len() < len {
            return Err(CascadeError::ShortFrame {
                len: gray.len(),
                width,
                height,
            });
        }
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let frame = gray_mat(&gray[..len], width, height)?;
        let min_size = params
            .min_size
            .map(|(w, h)| Size::new(w as i32, h as i32))
            .unwrap_or_default();
        let mut objects = Vector::<Rect>::new();
        let mut num_detections = Vector::<i32>::new();
        {
            let mut cascade = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            cascade.detect_multi_scale2(
                &frame,
                &mut objects,
                &mut num_detections,
                params.scale_factor as f64,
                params.min_neighbors as i32,
                0,
                min_size,
                Size::default(),
            )?;
        }

        let mut faces: Vec<BoundingBox> = objects
            .iter()
            .zip(num_detections.iter().chain(std::iter::repeat(0)))
            .filter_map(|(r, n)| {
                let x = u32::try_from(r.x.max(0)).ok()?;
                let y = u32::try_from(r.y.max(0)).ok()?;
                let w = u32::try_from(r.width).ok()?;
                let h = u32::try_from(r.height).ok()?;
                if w == 0 || h == 0 {
                    return None;
                }
                Some(BoundingBox {
                    x,
                    y,
                    width: w.min(width - x.min(width)),
                    height: h.min(height - y.min(height)),
                    neighbors: n.max(0) as u32,
                })
            })
            .collect();
        faces.sort_by(|a, b| b.neighbors.cmp(&a.neighbors).then(b.area().cmp(&a.area())));
        tracing::trace!(faces = faces.len(), "cascade pass complete");
        Ok(faces)
    }
}
