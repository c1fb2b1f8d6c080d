//! likeness-core: Face preprocessing, location, and classification.
//!
//! Face crops are normalized into a fixed-size [`CanonicalImage`] and fed to a
//! local binary pattern histogram (LBPH) classifier. Face location runs SCRFD
//! via ONNX Runtime behind the [`FaceLocator`] trait.

pub mod classifier;
pub mod locator;
pub mod preprocess;
pub mod tiers;
pub mod types;

pub use classifier::{Label, LbphParams, Model, ModelError, Prediction, TrainingError};
pub use locator::{FaceLocator, LocatorError, ScrfdLocator};
pub use preprocess::Preprocessor;
pub use tiers::{ConfidenceTiers, Tier, TierError};
pub use types::{CanonicalImage, FaceBox, GrayCrop, GrayView};
