use crate::camera::CameraError;
use crate::frame::Frame;

/// A device that yields grayscale frames until it runs dry.
pub trait FrameSource {
    /// Block until the next frame is available.
    ///
    /// `Ok(None)` signals end of stream; a source never yields again after it.
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Give the device back. Idempotent; later `next_frame` calls return
    /// `Ok(None)`.
    fn release(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        (**self).next_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}
