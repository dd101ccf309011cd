//! rollcall-hw: Video sources for the attendance pipeline.
//!
//! Provides V4L2 camera access and an image-directory replay source, both
//! yielding grayscale frames through the [`FrameSource`] trait.

pub mod camera;
pub mod frame;
pub mod replay;
pub mod source;

pub use camera::{Camera, CameraError, PixelFormat};
pub use frame::Frame;
pub use replay::ImageSequence;
pub use source::FrameSource;
