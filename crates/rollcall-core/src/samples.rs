//! Sample store: normalised face crops, one PNG per (identity, sequence).
//!
//! File names encode both fields as `user.<id>.<seq>.png`.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Side length of the square sample canvas.
pub const SAMPLE_SIZE: u32 = 200;

/// Upper bound on samples stored per enrollment session.
pub const MAX_SAMPLES: usize = 200;

#[derive(Error, Debug)]
pub enum SampleError {
    #[error("sample store io ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sample image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// A stored sample, located but not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SampleRef {
    pub owner_id: u32,
    pub sequence: u32,
    pub path: PathBuf,
}

/// Parse `user.<id>.<seq>.<ext>` into `(id, seq)`.
pub fn parse_sample_name(file_name: &str) -> Option<(u32, u32)> {
    let mut parts = file_name.split('.');
    if parts.next()? != "user" {
        return None;
    }
    let id = parts.next()?.parse().ok()?;
    let seq = parts.next()?.parse().ok()?;
    parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((id, seq))
}

/// Crop `bbox` out of a grayscale frame and scale it to the sample canvas.
///
/// The box is clamped to the frame; `None` if nothing of it remains.
pub fn normalize_face(gray: &[u8], width: u32, height: u32, bbox: &BoundingBox) -> Option<GrayImage> {
    let x0 = bbox.x.min(width);
    let y0 = bbox.y.min(height);
    let x1 = bbox.x.saturating_add(bbox.width).min(width);
    let y1 = bbox.y.saturating_add(bbox.height).min(height);
    if x1 <= x0 || y1 <= y0 || gray.len() < (width as usize) * (height as usize) {
        return None;
    }

    let stride = width as usize;
    let crop = GrayImage::from_fn(x1 - x0, y1 - y0, |x, y| {
        Luma([gray[(y0 + y) as usize * stride + (x0 + x) as usize]])
    });
    Some(imageops::resize(&crop, SAMPLE_SIZE, SAMPLE_SIZE, FilterType::Triangle))
}

/// Directory-backed sample store.
#[derive(Debug, Clone)]
pub struct SampleStore {
    dir: PathBuf,
}

impl SampleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, owner_id: u32, sequence: u32) -> PathBuf {
        self.dir.join(format!("user.{owner_id}.{sequence}.png"))
    }

    /// Write one sample, overwriting an older sample with the same key.
    pub fn put(&self, owner_id: u32, sequence: u32, face: &GrayImage) -> Result<PathBuf, SampleError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| SampleError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(owner_id, sequence);
        face.save(&path).map_err(|source| SampleError::Image {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(owner_id, sequence, path = %path.display(), "sample stored");
        Ok(path)
    }

    /// Every sample in the store, ordered by (id, sequence).
    ///
    /// Files whose names do not follow the sample scheme are ignored. A
    /// missing directory is an empty store.
    pub fn list(&self) -> Result<Vec<SampleRef>, SampleError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SampleError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut samples = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SampleError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match parse_sample_name(name) {
                Some((owner_id, sequence)) => samples.push(SampleRef {
                    owner_id,
                    sequence,
                    path,
                }),
                None => tracing::warn!(file = %path.display(), "ignoring file with unexpected name"),
            }
        }
        samples.sort();
        Ok(samples)
    }

    pub fn load(&self, sample: &SampleRef) -> Result<GrayImage, SampleError> {
        image::open(&sample.path)
            .map(|img| img.to_luma8())
            .map_err(|source| SampleError::Image {
                path: sample.path.clone(),
                source,
            })
    }

    pub fn count_for(&self, owner_id: u32) -> Result<usize, SampleError> {
        Ok(self.list()?.iter().filter(|s| s.owner_id == owner_id).count())
    }

    /// Remove the whole store directory. Missing is fine.
    pub fn clear(&self) -> Result<bool, SampleError> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(SampleError::Io {
                path: self.dir.clone(),
                source,
            }),
        }
    }
}
