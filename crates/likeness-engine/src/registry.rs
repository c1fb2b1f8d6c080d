//! Location and live copy of the trained model.

use likeness_core::{Model, ModelError};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Owns the model file and the in-memory model readers classify against.
///
/// Readers take an `Arc` snapshot and never block on a retrain. Writers
/// (publish, clear, and the lazy first load) are serialized so a load of an
/// old file can never overwrite a newer publish.
pub struct ModelRegistry {
    path: PathBuf,
    live: RwLock<Option<Arc<Model>>>,
    write: Mutex<()>,
}

impl ModelRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            live: RwLock::new(None),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The current model, loading it from disk on first use.
    ///
    /// `Ok(None)` means nothing has been trained yet.
    pub fn current(&self) -> Result<Option<Arc<Model>>, ModelError> {
        if let Some(model) = self.live.read().as_ref() {
            return Ok(Some(Arc::clone(model)));
        }

        let _write = self.write.lock();
        if let Some(model) = self.live.read().as_ref() {
            return Ok(Some(Arc::clone(model)));
        }
        match Model::load(&self.path) {
            Ok(model) => {
                let model = Arc::new(model);
                tracing::info!(
                    path = %self.path.display(),
                    samples = model.sample_count(),
                    "model loaded"
                );
                *self.live.write() = Some(Arc::clone(&model));
                Ok(Some(model))
            }
            Err(ModelError::Missing(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Persist `model` and make it the live one.
    pub fn publish(&self, model: Model) -> Result<Arc<Model>, ModelError> {
        let _write = self.write.lock();
        model.save(&self.path)?;
        let model = Arc::new(model);
        *self.live.write() = Some(Arc::clone(&model));
        tracing::debug!(persons = model.labels().len(), "model published");
        Ok(model)
    }

    /// Remove the model file and the live copy.
    pub fn clear(&self) -> Result<(), ModelError> {
        let _write = self.write.lock();
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ModelError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        }
        *self.live.write() = None;
        tracing::info!(path = %self.path.display(), "model cleared");
        Ok(())
    }
}
