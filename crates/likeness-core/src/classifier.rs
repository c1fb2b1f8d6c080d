//! Local binary pattern histogram (LBPH) face classifier.
//!
//! Each training image is reduced to a grid of per-cell LBP code histograms.
//! Classification is nearest neighbour under the chi-square distance, so a
//! sample taken from the training set classifies at distance 0.

use crate::types::{CanonicalImage, GrayView};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Identity label attached to training samples (a person id).
pub type Label = i64;

const LBP_EPSILON: f64 = 1e-9;
const MAX_NEIGHBORS: u32 = 16;
const MODEL_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("no samples to train on")]
    NoSamples,
    #[error("sample size mismatch: expected {expected}x{expected}, got {actual}x{actual}")]
    SizeMismatch { expected: u32, actual: u32 },
    #[error("invalid LBPH parameters: {0}")]
    InvalidParams(String),
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    Missing(PathBuf),
    #[error("model I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed model file {path}: {source}")]
    Format {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("inconsistent model: {0}")]
    Corrupt(String),
    #[error("image is {actual}x{actual}, model expects {expected}x{expected}")]
    SizeMismatch { expected: u32, actual: u32 },
}

/// LBPH hyperparameters. Fixed configuration, never tuned from data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbphParams {
    /// Radius of the circular sampling neighbourhood.
    pub radius: u32,
    /// Number of sampling points on the circle.
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
    /// Distance beyond which the model itself would consider a match rejected.
    pub threshold: f64,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
            threshold: f64::MAX,
        }
    }
}

impl LbphParams {
    /// Check that these parameters can train on `image_size` square images.
    pub fn validate(&self, image_size: u32) -> Result<(), TrainingError> {
        if self.radius == 0 {
            return Err(TrainingError::InvalidParams("radius must be positive".into()));
        }
        if self.neighbors == 0 || self.neighbors > MAX_NEIGHBORS {
            return Err(TrainingError::InvalidParams(format!(
                "neighbors must be in 1..={MAX_NEIGHBORS}, got {}",
                self.neighbors
            )));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(TrainingError::InvalidParams("grid dimensions must be positive".into()));
        }
        let inner = image_size.saturating_sub(2 * self.radius);
        if inner < self.grid_x || inner < self.grid_y {
            return Err(TrainingError::InvalidParams(format!(
                "{image_size}px image leaves {inner}px of LBP codes, too few for a {}x{} grid",
                self.grid_x, self.grid_y
            )));
        }
        Ok(())
    }

    fn bins(&self) -> usize {
        1usize << self.neighbors
    }
}

/// Best guess for an image: always returned, however distant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: Label,
    /// Chi-square distance to the nearest training sample; 0 is identical.
    pub distance: f64,
}

impl Prediction {
    /// Whether the distance falls under the model's own rejection bound.
    pub fn within_threshold(&self, params: &LbphParams) -> bool {
        self.distance < params.threshold
    }
}

/// A trained LBPH model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    version: u32,
    params: LbphParams,
    image_size: u32,
    labels: Vec<Label>,
    histograms: Vec<Vec<f32>>,
}

impl Model {
    /// Train from `(image, label)` pairs, in order.
    pub fn train(
        params: LbphParams,
        samples: &[(CanonicalImage, Label)],
    ) -> Result<Self, TrainingError> {
        let (first, _) = samples.first().ok_or(TrainingError::NoSamples)?;
        let image_size = first.size();
        params.validate(image_size)?;

        let mut labels = Vec::with_capacity(samples.len());
        let mut histograms = Vec::with_capacity(samples.len());
        for (image, label) in samples {
            if image.size() != image_size {
                return Err(TrainingError::SizeMismatch {
                    expected: image_size,
                    actual: image.size(),
                });
            }
            histograms.push(spatial_histogram(image, &params));
            labels.push(*label);
        }

        tracing::debug!(
            samples = labels.len(),
            image_size,
            radius = params.radius,
            neighbors = params.neighbors,
            grid_x = params.grid_x,
            grid_y = params.grid_y,
            "trained LBPH model"
        );

        Ok(Self {
            version: MODEL_FORMAT_VERSION,
            params,
            image_size,
            labels,
            histograms,
        })
    }

    /// Nearest-neighbour classification. Ties go to the earliest sample.
    pub fn classify(&self, image: &CanonicalImage) -> Result<Prediction, ModelError> {
        if image.size() != self.image_size {
            return Err(ModelError::SizeMismatch {
                expected: self.image_size,
                actual: image.size(),
            });
        }

        let query = spatial_histogram(image, &self.params);
        let mut best = Prediction {
            label: self.labels[0],
            distance: f64::INFINITY,
        };
        for (hist, &label) in self.histograms.iter().zip(&self.labels) {
            let distance = chi_square(hist, &query);
            if distance < best.distance {
                best = Prediction { label, distance };
            }
        }
        Ok(best)
    }

    pub fn params(&self) -> &LbphParams {
        &self.params
    }

    /// Side length of the canonical images this model was trained on.
    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    pub fn sample_count(&self) -> usize {
        self.labels.len()
    }

    /// Distinct labels, ascending.
    pub fn labels(&self) -> Vec<Label> {
        let mut labels = self.labels.clone();
        labels.sort_unstable();
        labels.dedup();
        labels
    }

    /// Write the model as JSON, replacing `path` atomically.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let io_err = |source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;

        let json = serde_json::to_vec(self).map_err(|source| ModelError::Format {
            path: path.to_path_buf(),
            source,
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;

        tracing::info!(path = %path.display(), samples = self.labels.len(), "saved model");
        Ok(())
    }

    /// Read a model written by [`Model::save`].
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ModelError::Missing(path.to_path_buf()));
            }
            Err(source) => {
                return Err(ModelError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let model: Model = serde_json::from_slice(&data).map_err(|source| ModelError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        model.check()?;

        tracing::info!(
            path = %path.display(),
            samples = model.labels.len(),
            image_size = model.image_size,
            "loaded model"
        );
        Ok(model)
    }

    fn check(&self) -> Result<(), ModelError> {
        if self.version != MODEL_FORMAT_VERSION {
            return Err(ModelError::Corrupt(format!("unsupported format version {}", self.version)));
        }
        if self.labels.is_empty() || self.labels.len() != self.histograms.len() {
            return Err(ModelError::Corrupt(format!(
                "{} labels for {} histograms",
                self.labels.len(),
                self.histograms.len()
            )));
        }
        self.params
            .validate(self.image_size)
            .map_err(|e| ModelError::Corrupt(e.to_string()))?;
        let expected = (self.params.grid_x * self.params.grid_y) as usize * self.params.bins();
        if self.histograms.iter().any(|h| h.len() != expected) {
            return Err(ModelError::Corrupt(format!("histograms must have {expected} bins")));
        }
        Ok(())
    }
}

/// Extended (circular) LBP codes, bilinearly sampled.
///
/// Output is `(size - 2r) x (size - 2r)`; the border of width `r` has no
/// complete neighbourhood and is skipped.
fn lbp_codes(image: &CanonicalImage, params: &LbphParams) -> (Vec<u32>, usize) {
    let size = image.size() as usize;
    let r = params.radius as usize;
    let inner = size - 2 * r;
    let src = image.pixels();
    let mut codes = vec![0u32; inner * inner];

    for n in 0..params.neighbors {
        let angle = 2.0 * PI * n as f64 / params.neighbors as f64;
        let sx = params.radius as f64 * angle.cos();
        let sy = -(params.radius as f64) * angle.sin();

        let fx = sx.floor();
        let fy = sy.floor();
        let cx = sx.ceil();
        let cy = sy.ceil();
        let tx = sx - fx;
        let ty = sy - fy;

        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        let (fx, fy, cx, cy) = (fx as isize, fy as isize, cx as isize, cy as isize);
        let px = |row: usize, dy: isize, col: usize, dx: isize| -> f64 {
            src[(row as isize + dy) as usize * size + (col as isize + dx) as usize] as f64
        };

        for row in r..size - r {
            for col in r..size - r {
                let center = src[row * size + col] as f64;
                let t = w1 * px(row, fy, col, fx)
                    + w2 * px(row, fy, col, cx)
                    + w3 * px(row, cy, col, fx)
                    + w4 * px(row, cy, col, cx);
                if t > center || (t - center).abs() < LBP_EPSILON {
                    codes[(row - r) * inner + (col - r)] |= 1 << n;
                }
            }
        }
    }

    (codes, inner)
}

/// Concatenated per-cell code histograms, each normalized to sum to 1.
fn spatial_histogram(image: &CanonicalImage, params: &LbphParams) -> Vec<f32> {
    let (codes, inner) = lbp_codes(image, params);
    let bins = params.bins();
    let (gx, gy) = (params.grid_x as usize, params.grid_y as usize);
    let cell_w = inner / gx;
    let cell_h = inner / gy;

    let mut out = vec![0f32; gx * gy * bins];
    for cy in 0..gy {
        for cx in 0..gx {
            let cell = &mut out[(cy * gx + cx) * bins..(cy * gx + cx + 1) * bins];
            for row in cy * cell_h..(cy + 1) * cell_h {
                for col in cx * cell_w..(cx + 1) * cell_w {
                    cell[codes[row * inner + col] as usize] += 1.0;
                }
            }
            let count = (cell_w * cell_h) as f32;
            for v in cell.iter_mut() {
                *v /= count;
            }
        }
    }
    out
}

/// Symmetric chi-square distance: `sum 2 (a - b)^2 / (a + b)`.
fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let sum = x as f64 + y as f64;
            if sum > 0.0 {
                let diff = x as f64 - y as f64;
                2.0 * diff * diff / sum
            } else {
                0.0
            }
        })
        .sum()
}
