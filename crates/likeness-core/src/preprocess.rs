//! Face crop normalization: bilinear resize, histogram equalization, smoothing.
//!
//! Every step is integer-exact or uses fixed-order float arithmetic, so the
//! same input bytes always produce the same canonical image.

use crate::types::{CanonicalImage, GrayView};

/// Default side length of a canonical face image.
pub const DEFAULT_CANONICAL_SIZE: u32 = 96;

/// Turns arbitrary grayscale face crops into [`CanonicalImage`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preprocessor {
    size: u32,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(DEFAULT_CANONICAL_SIZE)
    }
}

impl Preprocessor {
    pub fn new(size: u32) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Resize to `size x size`, equalize, then smooth.
    ///
    /// Input that is already canonical at this size is returned unchanged.
    pub fn preprocess<V: GrayView + ?Sized>(&self, input: &V) -> CanonicalImage {
        if input.canonical_size() == Some(self.size) {
            return CanonicalImage::new_unchecked(self.size, input.pixels().to_vec());
        }

        let side = self.size as usize;
        let mut resized = resize_bilinear(
            input.pixels(),
            input.width() as usize,
            input.height() as usize,
            side,
            side,
        );
        equalize_histogram(&mut resized);
        let smoothed = smooth_binomial(&resized, side, side);

        CanonicalImage::new_unchecked(self.size, smoothed)
    }
}

/// Bilinear resize with half-pixel centers. Equal dimensions copy the input.
pub fn resize_bilinear(src: &[u8], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    if width == new_w && height == new_h {
        return src[..width * height].to_vec();
    }

    let scale_x = width as f32 / new_w as f32;
    let scale_y = height as f32 / new_h as f32;
    let mut out = vec![0u8; new_w * new_h];

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * width + x0] as f32;
            let tr = src[y0 * width + x1] as f32;
            let bl = src[y1 * width + x0] as f32;
            let br = src[y1 * width + x1] as f32;

            let top = tl + (tr - tl) * fx;
            let bottom = bl + (br - bl) * fx;
            let val = top + (bottom - top) * fy;

            out[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Global histogram equalization in place.
///
/// The darkest occupied level maps to 0 and the brightest to 255. A flat
/// image is left untouched.
pub fn equalize_histogram(gray: &mut [u8]) {
    let total = gray.len() as u64;
    if total == 0 {
        return;
    }

    let mut hist = [0u64; 256];
    for &p in gray.iter() {
        hist[p as usize] += 1;
    }

    let first = hist.iter().position(|&c| c > 0).unwrap_or(0);
    let denom = total - hist[first];
    if denom == 0 {
        return;
    }

    let mut lut = [0u8; 256];
    let mut cumulative = 0u64;
    for level in first + 1..256 {
        cumulative += hist[level];
        // Round half up in integers
        lut[level] = ((cumulative * 255 * 2 + denom) / (denom * 2)).min(255) as u8;
    }

    for p in gray.iter_mut() {
        *p = lut[*p as usize];
    }
}

/// 3x3 binomial blur (1-2-1 kernel) with edge replication.
pub fn smooth_binomial(gray: &[u8], width: usize, height: usize) -> Vec<u8> {
    const KERNEL: [u32; 3] = [1, 2, 1];

    let at = |x: isize, y: isize| -> u32 {
        let cx = x.clamp(0, width as isize - 1) as usize;
        let cy = y.clamp(0, height as isize - 1) as usize;
        gray[cy * width + cx] as u32
    };

    let mut out = vec![0u8; width * height];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0u32;
            for (ky, wy) in KERNEL.iter().enumerate() {
                for (kx, wx) in KERNEL.iter().enumerate() {
                    acc += wy * wx * at(x as isize + kx as isize - 1, y as isize + ky as isize - 1);
                }
            }
            out[y * width + x] = ((acc + 8) / 16) as u8;
        }
    }
    out
}
