use crate::camera::CameraError;
use crate::frame::Frame;

/// A blocking, exclusively owned stream of grayscale frames.
///
/// `next_frame` blocks until a frame is available. `Ok(None)` signals end of
/// stream; the loop consuming the source stops and drops it, which releases
/// the underlying device.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        (**self).next_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
