#![allow(dead_code)]

use likeness_core::{FaceBox, FaceLocator, LocatorError};
use likeness_engine::{CancelToken, Config, Engine, EnrollEvent, EnrollOutcome};
use likeness_hw::{CameraError, Frame, FrameSource, ReplaySource};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const FRAME_W: u32 = 160;
pub const FRAME_H: u32 = 120;

pub const FACE: FaceBox = FaceBox {
    x: 40,
    y: 20,
    width: 64,
    height: 64,
    confidence: 1.0,
};

pub const SECOND_FACE: FaceBox = FaceBox {
    x: 8,
    y: 8,
    width: 28,
    height: 28,
    confidence: 0.9,
};

pub fn test_config(dir: &Path) -> Config {
    Config {
        db_path: dir.join("identities.db"),
        model_path: dir.join("model.json"),
        capture_target: 50,
        minimum_required: 20,
        warmup_frames: 0,
        canonical_size: 48,
        frame_throttle: 2,
        ..Config::default()
    }
}

pub fn open_engine(dir: &Path) -> Engine {
    Engine::open(test_config(dir)).unwrap()
}

fn texel(seed: u32, bx: u32, by: u32) -> u8 {
    let mut h = seed.wrapping_mul(0x9E37_79B9) ^ bx.wrapping_mul(73_856_093) ^ by.wrapping_mul(19_349_663);
    h ^= h >> 13;
    h = h.wrapping_mul(0x5BD1_E995);
    h ^= h >> 15;
    40 + (h % 150) as u8
}

/// A frame with a blocky per-seed texture inside [`FACE`] on a flat
/// background, brightened by `offset`.
pub fn face_frame(seed: u32, offset: u8, sequence: u32) -> Frame {
    let mut data = vec![128u8; (FRAME_W * FRAME_H) as usize];
    for y in FACE.y..FACE.y + FACE.height {
        for x in FACE.x..FACE.x + FACE.width {
            let value = texel(seed, (x - FACE.x) / 4, (y - FACE.y) / 4);
            data[(y * FRAME_W + x) as usize] = value + offset;
        }
    }
    Frame::new(data, FRAME_W, FRAME_H, sequence).unwrap()
}

pub fn face_frames(seed: u32, count: u32) -> Vec<Frame> {
    (0..count).map(|i| face_frame(seed, (i % 25) as u8, i)).collect()
}

/// Returns scripted results call by call, then no faces.
#[derive(Default)]
pub struct ScriptedLocator {
    script: VecDeque<Result<Vec<FaceBox>, String>>,
    pub calls: usize,
}

impl ScriptedLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faces(mut self, calls: usize, boxes: &[FaceBox]) -> Self {
        for _ in 0..calls {
            self.script.push_back(Ok(boxes.to_vec()));
        }
        self
    }

    pub fn fail(mut self, message: &str) -> Self {
        self.script.push_back(Err(message.to_string()));
        self
    }
}

impl FaceLocator for ScriptedLocator {
    fn locate(&mut self, _frame: &[u8], _width: u32, _height: u32) -> Result<Vec<FaceBox>, LocatorError> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(Ok(boxes)) => Ok(boxes),
            Some(Err(message)) => Err(LocatorError::Failed(message)),
            None => Ok(Vec::new()),
        }
    }
}

/// Replay source that reports its release through a shared flag.
pub struct TrackedSource {
    inner: ReplaySource,
    released: Arc<AtomicBool>,
}

impl TrackedSource {
    pub fn new(frames: Vec<Frame>) -> (Self, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        let source = Self {
            inner: ReplaySource::new(frames),
            released: Arc::clone(&released),
        };
        (source, released)
    }
}

impl FrameSource for TrackedSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        self.inner.next_frame()
    }

    fn release(&mut self) {
        self.inner.release();
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Enroll `name` from `count` frames of texture `seed`, one face per frame.
pub fn enroll(engine: &Engine, name: &str, seed: u32, count: u32) -> EnrollOutcome {
    let mut locator = ScriptedLocator::new().faces(count as usize, &[FACE]);
    let frames = face_frames(seed, count);
    engine
        .enrollment(&mut locator)
        .run(
            || Ok::<_, CameraError>(ReplaySource::new(frames)),
            name,
            None,
            &CancelToken::new(),
            |_: EnrollEvent| {},
        )
        .unwrap()
}
