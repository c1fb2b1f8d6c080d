use serde::{Deserialize, Serialize};

/// Boxes narrower or shorter than this (in pixels) are discarded by locators.
pub const MIN_FACE_SIZE: u32 = 24;

/// Pixel-aligned bounding box of a located face, clipped to its frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Locator score in [0, 1]; scripted locators report 1.0.
    pub confidence: f32,
}

impl FaceBox {
    /// Clip a floating-point detection to a `frame_width` x `frame_height` frame.
    ///
    /// Returns `None` if the clipped box is smaller than [`MIN_FACE_SIZE`] on
    /// either side.
    pub fn clamp_to(
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        confidence: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        let x1 = x.max(0.0).min(frame_width as f32);
        let y1 = y.max(0.0).min(frame_height as f32);
        let x2 = (x + width).max(0.0).min(frame_width as f32);
        let y2 = (y + height).max(0.0).min(frame_height as f32);

        let left = x1.round() as u32;
        let top = y1.round() as u32;
        let w = (x2.round() as u32).saturating_sub(left);
        let h = (y2.round() as u32).saturating_sub(top);

        if w < MIN_FACE_SIZE || h < MIN_FACE_SIZE {
            return None;
        }

        Some(Self {
            x: left,
            y: top,
            width: w,
            height: h,
            confidence,
        })
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Read-only access to an 8-bit grayscale raster.
pub trait GrayView {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Row-major pixels, exactly `width * height` bytes.
    fn pixels(&self) -> &[u8];

    /// Side length if this raster is already the output of a [`Preprocessor`](crate::Preprocessor).
    fn canonical_size(&self) -> Option<u32> {
        None
    }
}

/// A non-empty grayscale region cut out of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayCrop {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl GrayCrop {
    /// Wrap raw pixels. Returns `None` for zero dimensions or a length mismatch.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if width == 0 || height == 0 || data.len() != (width as usize) * (height as usize) {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    /// Copy the region under `face` out of a `frame_width` x `frame_height` frame.
    pub fn from_region(
        frame: &[u8],
        frame_width: u32,
        frame_height: u32,
        face: &FaceBox,
    ) -> Option<Self> {
        let fw = frame_width as usize;
        if frame.len() < fw * frame_height as usize
            || face.x + face.width > frame_width
            || face.y + face.height > frame_height
        {
            return None;
        }

        let mut data = Vec::with_capacity(face.area() as usize);
        for row in face.y..face.y + face.height {
            let start = row as usize * fw + face.x as usize;
            data.extend_from_slice(&frame[start..start + face.width as usize]);
        }
        Self::new(face.width, face.height, data)
    }
}

impl GrayView for GrayCrop {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn pixels(&self) -> &[u8] {
        &self.data
    }
}

/// A preprocessed, square, illumination-normalized face image.
///
/// Only produced by [`Preprocessor::preprocess`](crate::Preprocessor::preprocess)
/// or rebuilt from a persisted sample via [`CanonicalImage::from_raw`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalImage {
    size: u32,
    data: Vec<u8>,
}

impl CanonicalImage {
    pub(crate) fn new_unchecked(size: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (size as usize) * (size as usize));
        Self { size, data }
    }

    /// Rebuild a stored canonical image. Returns `None` on a length mismatch.
    pub fn from_raw(size: u32, data: Vec<u8>) -> Option<Self> {
        if size == 0 || data.len() != (size as usize) * (size as usize) {
            return None;
        }
        Some(Self { size, data })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }
}

impl GrayView for CanonicalImage {
    fn width(&self) -> u32 {
        self.size
    }

    fn height(&self) -> u32 {
        self.size
    }

    fn pixels(&self) -> &[u8] {
        &self.data
    }

    fn canonical_size(&self) -> Option<u32> {
        Some(self.size)
    }
}
