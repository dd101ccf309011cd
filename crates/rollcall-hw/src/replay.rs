//! Replay a directory of still images as a frame stream.
//!
//! Lets every streaming operation run without a camera: recorded sessions,
//! demos, and tests.

use crate::camera::CameraError;
use crate::frame::Frame;
use crate::source::FrameSource;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "pgm"];

/// Frame source backed by image files, read in file-name order.
pub struct ImageSequence {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageSequence {
    /// Scan `dir` for image files.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CameraError> {
        let dir = dir.as_ref().to_path_buf();
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| CameraError::DeviceNotFound(format!("{}: {e}", dir.display())))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        tracing::info!(dir = %dir.display(), frames = files.len(), "opened image sequence");

        Ok(Self {
            dir,
            files,
            next: 0,
        })
    }

    /// Number of frames not yet read.
    pub fn remaining(&self) -> usize {
        self.files.len() - self.next
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        let sequence = self.next as u32;
        self.next += 1;

        let gray = image::open(path)
            .map_err(|e| CameraError::CaptureFailed(format!("{}: {e}", path.display())))?
            .to_luma8();
        let (width, height) = gray.dimensions();

        Frame::from_gray(gray.into_raw(), width, height, sequence)
            .map(Some)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    fn describe(&self) -> String {
        format!("image sequence {}", self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_replays_in_name_order_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(4, 3, Luma([200]))
            .save(dir.path().join("b.png"))
            .unwrap();
        GrayImage::from_pixel(2, 2, Luma([50]))
            .save(dir.path().join("a.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut seq = ImageSequence::open(dir.path()).unwrap();
        assert_eq!(seq.remaining(), 2);

        let first = seq.next_frame().unwrap().unwrap();
        assert_eq!((first.width, first.height), (2, 2));
        assert_eq!(first.data, vec![50; 4]);

        let second = seq.next_frame().unwrap().unwrap();
        assert_eq!((second.width, second.height), (4, 3));
        assert_eq!(second.sequence, 1);

        assert!(seq.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_missing_directory() {
        let result = ImageSequence::open("/nonexistent/rollcall-replay");
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));
    }
}
