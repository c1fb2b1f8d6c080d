//! Service bundle shared by every workflow.

use crate::config::Config;
use crate::enrollment::{Enrollment, EnrollmentPolicy};
use crate::recognition::{Recognition, RecognitionState};
use crate::registry::ModelRegistry;
use crate::training::{TrainSummary, Trainer};
use crate::EngineError;
use likeness_core::{FaceLocator, Preprocessor, TrainingError};
use likeness_store::{IdentityStore, Person, PersonId};

/// Result of removing a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// No such person.
    NotFound,
    /// Removed; the model was retrained on the remaining persons.
    Retrained(TrainSummary),
    /// Removed the last person; no model remains.
    ModelCleared,
}

/// Owns the identity store, the model registry, and the trainer.
///
/// `Engine` is `Sync`: share it behind an `Arc` and run workflows from
/// blocking threads.
pub struct Engine {
    config: Config,
    store: IdentityStore,
    registry: ModelRegistry,
    trainer: Trainer,
}

impl Engine {
    /// Validate `config` and open the store it points at.
    pub fn open(config: Config) -> Result<Self, EngineError> {
        config.validate()?;
        let store = IdentityStore::open(&config.db_path, config.pool_size)?;
        let registry = ModelRegistry::new(&config.model_path);
        let trainer = Trainer::new(config.lbph);
        tracing::info!(
            db = %config.db_path.display(),
            model = %config.model_path.display(),
            "engine ready"
        );
        Ok(Self {
            config,
            store,
            registry,
            trainer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn list_persons(&self) -> Result<Vec<Person>, EngineError> {
        Ok(self.store.list_persons()?)
    }

    /// Retrain from the stored corpus.
    pub fn retrain(&self) -> Result<TrainSummary, EngineError> {
        self.trainer.retrain(&self.store, &self.registry)
    }

    /// Delete a person with their samples, then retrain without them.
    pub fn remove_person(&self, person: PersonId) -> Result<RemoveOutcome, EngineError> {
        if !self.store.delete_person(person)? {
            return Ok(RemoveOutcome::NotFound);
        }
        tracing::info!(person, "person removed");
        match self.retrain() {
            Ok(summary) => Ok(RemoveOutcome::Retrained(summary)),
            Err(EngineError::Training(TrainingError::NoSamples)) => Ok(RemoveOutcome::ModelCleared),
            Err(e) => Err(e),
        }
    }

    /// Start an enrollment session that locates faces with `locator`.
    pub fn enrollment<'a, L: FaceLocator + ?Sized>(&'a self, locator: &'a mut L) -> Enrollment<'a, L> {
        Enrollment {
            store: &self.store,
            registry: &self.registry,
            trainer: &self.trainer,
            preprocessor: Preprocessor::new(self.config.canonical_size),
            locator,
            policy: EnrollmentPolicy {
                capture_target: self.config.capture_target,
                minimum_required: self.config.minimum_required,
            },
            warmup_frames: self.config.warmup_frames,
        }
    }

    /// Prepare an idle recognition session that locates faces with `locator`.
    pub fn recognition<'a, L: FaceLocator + ?Sized>(
        &'a self,
        locator: &'a mut L,
    ) -> Result<Recognition<'a, L>, EngineError> {
        Ok(Recognition {
            store: &self.store,
            registry: &self.registry,
            locator,
            tiers: self.config.tiers()?,
            throttle: self.config.frame_throttle,
            state: RecognitionState::Idle,
            model: None,
        })
    }
}
