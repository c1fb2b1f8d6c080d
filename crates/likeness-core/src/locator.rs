//! Face location: the [`FaceLocator`] seam and an SCRFD implementation.
//!
//! The SCRFD adapter letterboxes the frame into the network input, decodes the
//! three anchor-free stride heads, and suppresses overlaps with NMS. Keypoint
//! heads are ignored; only boxes are returned.

use crate::preprocess::resize_bilinear;
use crate::types::FaceBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("locator model not found: {0}")]
    ModelNotFound(String),
    #[error("face location failed: {0}")]
    Failed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds faces in a grayscale frame.
///
/// Zero boxes is a normal result. Callers decide what to do with several.
pub trait FaceLocator {
    fn locate(&mut self, frame: &[u8], width: u32, height: u32) -> Result<Vec<FaceBox>, LocatorError>;
}

impl<L: FaceLocator + ?Sized> FaceLocator for Box<L> {
    fn locate(&mut self, frame: &[u8], width: u32, height: u32) -> Result<Vec<FaceBox>, LocatorError> {
        (**self).locate(frame, width, height)
    }
}

/// Letterbox placement of the frame inside the square network input.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Floating-point detection in frame coordinates, before clipping.
#[derive(Debug, Clone, Copy)]
struct Detection {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

/// Output indices of the (score, box) heads for one stride.
type HeadIndices = (usize, usize);

/// SCRFD detector behind the [`FaceLocator`] trait.
pub struct ScrfdLocator {
    session: Session,
    heads: [HeadIndices; 3],
    score_threshold: f32,
    nms_threshold: f32,
}

impl ScrfdLocator {
    pub fn load(model_path: &Path) -> Result<Self, LocatorError> {
        if !model_path.exists() {
            return Err(LocatorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let outputs = session.outputs().len();
        if outputs < 6 {
            return Err(LocatorError::Failed(format!(
                "SCRFD model needs score and box heads for 3 strides, got {outputs} outputs"
            )));
        }

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let heads = resolve_heads(&names);
        tracing::info!(path = %model_path.display(), outputs, ?heads, "loaded SCRFD locator");

        Ok(Self {
            session,
            heads,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        })
    }

    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    fn input_tensor(frame: &[u8], width: usize, height: usize) -> (Array4<f32>, Letterbox) {
        let scale = (SCRFD_INPUT_SIZE as f32 / width as f32).min(SCRFD_INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
        let pad_x = ((SCRFD_INPUT_SIZE - new_w) / 2) as f32;
        let pad_y = ((SCRFD_INPUT_SIZE - new_h) / 2) as f32;

        let resized = resize_bilinear(frame, width, height, new_w, new_h);

        // Padding at the mean normalizes to 0.0
        let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
        let (ox, oy) = (pad_x as usize, pad_y as usize);
        for y in 0..SCRFD_INPUT_SIZE {
            for x in 0..SCRFD_INPUT_SIZE {
                let inside = y >= oy && y < oy + new_h && x >= ox && x < ox + new_w;
                let pixel = if inside {
                    resized[(y - oy) * new_w + (x - ox)] as f32
                } else {
                    SCRFD_MEAN
                };
                let v = (pixel - SCRFD_MEAN) / SCRFD_STD;
                for c in 0..3 {
                    tensor[[0, c, y, x]] = v;
                }
            }
        }

        (tensor, Letterbox { scale, pad_x, pad_y })
    }
}

impl FaceLocator for ScrfdLocator {
    fn locate(&mut self, frame: &[u8], width: u32, height: u32) -> Result<Vec<FaceBox>, LocatorError> {
        let expected = width as usize * height as usize;
        if width == 0 || height == 0 || frame.len() < expected {
            return Err(LocatorError::Failed(format!(
                "frame buffer has {} bytes, {width}x{height} needs {expected}",
                frame.len()
            )));
        }

        let (input, letterbox) = Self::input_tensor(frame, width as usize, height as usize);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();
        for (&stride, &(score_idx, box_idx)) in SCRFD_STRIDES.iter().zip(&self.heads) {
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| LocatorError::Failed(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[box_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| LocatorError::Failed(format!("boxes stride {stride}: {e}")))?;
            detections.extend(decode_stride(scores, boxes, stride, &letterbox, self.score_threshold));
        }

        let faces: Vec<FaceBox> = nms(detections, self.nms_threshold)
            .into_iter()
            .filter_map(|d| FaceBox::clamp_to(d.x1, d.y1, d.x2 - d.x1, d.y2 - d.y1, d.score, width, height))
            .collect();

        tracing::trace!(faces = faces.len(), "located faces");
        Ok(faces)
    }
}

/// Map each stride to its score and box outputs.
///
/// Exports that name their heads `score_8`, `bbox_16`, ... are matched by
/// name in whatever order they appear. Anything else gets the standard
/// positional order: `[0-2]` scores, `[3-5]` boxes, `[6-8]` keypoints.
fn resolve_heads(names: &[String]) -> [HeadIndices; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };
    let named: Option<Vec<HeadIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named.as_deref() {
        Some(&[s8, s16, s32]) => {
            tracing::debug!("SCRFD heads matched by output name");
            [s8, s16, s32]
        }
        _ => {
            tracing::debug!(?names, "SCRFD output names not recognized; using positional heads");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode one stride head into frame-space detections above `threshold`.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Detection> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let unletterbox_x = |v: f32| (v - letterbox.pad_x) / letterbox.scale;
    let unletterbox_y = |v: f32| (v - letterbox.pad_y) / letterbox.scale;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= threshold {
                return None;
            }
            let offsets = boxes.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid_w) as f32 * s;
            let ay = (cell / grid_w) as f32 * s;

            Some(Detection {
                x1: unletterbox_x(ax - offsets[0] * s),
                y1: unletterbox_y(ay - offsets[1] * s),
                x2: unletterbox_x(ax + offsets[2] * s),
                y2: unletterbox_y(ay + offsets[3] * s),
                score,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression, highest score first.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = inter_w * inter_h;
    let union = (a.x2 - a.x1) * (a.y2 - a.y1) + (b.x2 - b.x1) * (b.y2 - b.y1) - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
