//! Frame replay from memory or a directory of recorded images.

use crate::camera::CameraError;
use crate::frame::Frame;
use crate::source::FrameSource;
use std::collections::VecDeque;
use std::path::Path;

/// Yields a fixed sequence of frames, then end of stream.
#[derive(Debug, Default)]
pub struct ReplaySource {
    frames: VecDeque<Frame>,
    released: bool,
}

impl ReplaySource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            released: false,
        }
    }

    /// Load every PNG in `dir` in file-name order, converted to 8-bit luma.
    pub fn from_dir(dir: &Path) -> Result<Self, CameraError> {
        let replay_err = |message: String| CameraError::Replay {
            path: dir.display().to_string(),
            message,
        };

        let entries = std::fs::read_dir(dir).map_err(|e| replay_err(e.to_string()))?;
        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
            })
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for (sequence, path) in paths.iter().enumerate() {
            let gray = image::open(path)
                .map_err(|e| replay_err(format!("{}: {e}", path.display())))?
                .into_luma8();
            let (width, height) = gray.dimensions();
            let frame = Frame::new(gray.into_raw(), width, height, sequence as u32)
                .map_err(|e| replay_err(e.to_string()))?;
            frames.push(frame);
        }

        tracing::info!(dir = %dir.display(), frames = frames.len(), "replay source loaded");
        Ok(Self::new(frames))
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if self.released {
            return Ok(None);
        }
        Ok(self.frames.pop_front())
    }

    fn release(&mut self) {
        self.released = true;
        self.frames.clear();
    }
}
