//! Full retraining from the persisted corpus.

use crate::registry::ModelRegistry;
use crate::EngineError;
use likeness_core::{LbphParams, Model, TrainingError};
use likeness_store::IdentityStore;
use parking_lot::Mutex;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainSummary {
    pub persons: usize,
    pub samples: usize,
}

/// Rebuilds the model from every stored sample.
///
/// One retrain runs at a time, so a retrain over an older corpus snapshot
/// cannot publish after a newer one.
pub struct Trainer {
    params: LbphParams,
    running: Mutex<()>,
}

impl Trainer {
    pub fn new(params: LbphParams) -> Self {
        Self {
            params,
            running: Mutex::new(()),
        }
    }

    pub fn params(&self) -> LbphParams {
        self.params
    }

    /// Train on the whole corpus and publish the result.
    ///
    /// An empty corpus clears the published model and reports
    /// [`TrainingError::NoSamples`]. The identity cache is invalidated in
    /// both cases.
    pub fn retrain(
        &self,
        store: &IdentityStore,
        registry: &ModelRegistry,
    ) -> Result<TrainSummary, EngineError> {
        let _running = self.running.lock();
        let started = Instant::now();

        let corpus = store.load_corpus()?;
        if corpus.is_empty() {
            registry.clear()?;
            store.invalidate();
            tracing::info!("no samples left; model cleared");
            return Err(TrainingError::NoSamples.into());
        }

        let model = Model::train(self.params, &corpus)?;
        let summary = TrainSummary {
            persons: model.labels().len(),
            samples: model.sample_count(),
        };
        registry.publish(model)?;
        store.invalidate();

        tracing::info!(
            persons = summary.persons,
            samples = summary.samples,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrained model"
        );
        Ok(summary)
    }
}
