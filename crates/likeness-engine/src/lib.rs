//! likeness-engine: enrollment, training, and live recognition.
//!
//! Ties the identity store, the LBPH classifier, and a frame source together.
//! Workflows are blocking; async callers run them on a blocking thread.

pub mod cancel;
pub mod config;
pub mod device;
pub mod engine;
pub mod enrollment;
pub mod recognition;
pub mod registry;
pub mod training;

pub use cancel::CancelToken;
pub use config::{Config, ConfigError};
pub use device::DeviceGuard;
pub use engine::{Engine, RemoveOutcome};
pub use enrollment::{
    EnrollEvent, EnrollOutcome, Enrollment, EnrollmentPolicy, EnrollmentState, StopReason,
    TransitionError,
};
pub use recognition::{
    FaceVerdict, FrameReport, Recognition, RecognitionState, RecognitionSummary, Verdict,
};
pub use registry::ModelRegistry;
pub use training::{TrainSummary, Trainer};

use likeness_core::{LocatorError, ModelError, TrainingError};
use likeness_hw::CameraError;
use likeness_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("locator error: {0}")]
    Locator(#[from] LocatorError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("training error: {0}")]
    Training(#[from] TrainingError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("no trained model at {0}; enroll someone first")]
    MissingModel(PathBuf),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}
