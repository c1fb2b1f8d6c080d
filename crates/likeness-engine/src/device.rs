//! Scoped ownership of a frame source.

use likeness_hw::{CameraError, Frame, FrameSource};

/// Releases the wrapped source when dropped, whatever the exit path.
pub struct DeviceGuard<S: FrameSource> {
    source: S,
}

impl<S: FrameSource> DeviceGuard<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        self.source.next_frame()
    }

    /// Release now instead of at drop. Safe to call more than once.
    pub fn release(&mut self) {
        self.source.release();
    }

    /// Discard up to `count` frames, stopping early at end of stream.
    pub fn skip(&mut self, count: usize) -> Result<usize, CameraError> {
        let mut skipped = 0;
        while skipped < count {
            if self.source.next_frame()?.is_none() {
                break;
            }
            skipped += 1;
        }
        if skipped > 0 {
            tracing::debug!(skipped, "discarded warmup frames");
        }
        Ok(skipped)
    }
}

impl<S: FrameSource> Drop for DeviceGuard<S> {
    fn drop(&mut self) {
        self.source.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use likeness_hw::ReplaySource;

    fn frames(n: u32) -> Vec<Frame> {
        (0..n).map(|i| Frame::new(vec![0; 4], 2, 2, i).unwrap()).collect()
    }

    #[test]
    fn test_skip_stops_at_end_of_stream() {
        let mut guard = DeviceGuard::new(ReplaySource::new(frames(3)));
        assert_eq!(guard.skip(2).unwrap(), 2);
        assert_eq!(guard.next_frame().unwrap().unwrap().sequence, 2);
        assert_eq!(guard.skip(5).unwrap(), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut guard = DeviceGuard::new(ReplaySource::new(frames(2)));
        guard.release();
        guard.release();
        assert!(guard.next_frame().unwrap().is_none());
    }
}
