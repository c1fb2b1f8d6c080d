//! Live recognition over a frame source.

use crate::cancel::CancelToken;
use crate::device::DeviceGuard;
use crate::enrollment::StopReason;
use crate::registry::ModelRegistry;
use crate::EngineError;
use likeness_core::{
    ConfidenceTiers, FaceBox, FaceLocator, GrayCrop, Model, Prediction, Preprocessor, Tier,
};
use likeness_hw::FrameSource;
use likeness_store::{IdentityMap, IdentityStore, PersonId};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionState {
    Idle,
    Running,
    Stopped,
}

/// Outcome for one located face.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Matched {
        person: PersonId,
        name: String,
        distance: f64,
    },
    Uncertain {
        person: PersonId,
        name: String,
        distance: f64,
    },
    Unknown {
        distance: f64,
    },
}

impl Verdict {
    /// Map a prediction onto a verdict.
    ///
    /// Labels without a current name resolve to `Unknown`, whatever the
    /// distance.
    pub fn resolve(prediction: Prediction, tiers: &ConfidenceTiers, names: &IdentityMap) -> Self {
        let distance = prediction.distance;
        let tier = tiers.tier(distance);
        match (tier, names.get(&prediction.label)) {
            (Tier::Matched, Some(name)) => Self::Matched {
                person: prediction.label,
                name: name.clone(),
                distance,
            },
            (Tier::Uncertain, Some(name)) => Self::Uncertain {
                person: prediction.label,
                name: name.clone(),
                distance,
            },
            _ => Self::Unknown { distance },
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            Self::Matched { .. } => Tier::Matched,
            Self::Uncertain { .. } => Tier::Uncertain,
            Self::Unknown { .. } => Tier::Unknown,
        }
    }

    pub fn distance(&self) -> f64 {
        match *self {
            Self::Matched { distance, .. }
            | Self::Uncertain { distance, .. }
            | Self::Unknown { distance } => distance,
        }
    }

    pub fn person(&self) -> Option<PersonId> {
        match *self {
            Self::Matched { person, .. } | Self::Uncertain { person, .. } => Some(person),
            Self::Unknown { .. } => None,
        }
    }

    /// Display label: the person's name, or `"unknown"`.
    pub fn label(&self) -> &str {
        match self {
            Self::Matched { name, .. } | Self::Uncertain { name, .. } => name,
            Self::Unknown { .. } => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceVerdict {
    pub face: FaceBox,
    pub verdict: Verdict,
}

/// Per-frame result handed to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    /// False when the frame was throttled and `faces` repeats the last
    /// processed frame.
    pub processed: bool,
    pub faces: Vec<FaceVerdict>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecognitionSummary {
    pub frames: u64,
    pub processed: u64,
    pub stop: StopReason,
}

/// Recognition session. `Idle -> Running -> Stopped`.
pub struct Recognition<'a, L: FaceLocator + ?Sized> {
    pub(crate) store: &'a IdentityStore,
    pub(crate) registry: &'a ModelRegistry,
    pub(crate) locator: &'a mut L,
    pub(crate) tiers: ConfidenceTiers,
    pub(crate) throttle: u32,
    pub(crate) state: RecognitionState,
    pub(crate) model: Option<(Arc<Model>, Preprocessor)>,
}

impl<L: FaceLocator + ?Sized> Recognition<'_, L> {
    pub fn state(&self) -> RecognitionState {
        self.state
    }

    /// Load the current model and enter `Running`.
    ///
    /// Fails with [`EngineError::MissingModel`] while still `Idle` when
    /// nothing has been trained.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state != RecognitionState::Idle {
            return Err(crate::TransitionError {
                state: state_name(self.state),
                event: "start",
            }
            .into());
        }
        let model = self
            .registry
            .current()?
            .ok_or_else(|| EngineError::MissingModel(self.registry.path().to_path_buf()))?;
        let preprocessor = Preprocessor::new(model.image_size());
        tracing::info!(
            persons = model.labels().len(),
            throttle = self.throttle,
            t_low = self.tiers.t_low(),
            t_high = self.tiers.t_high(),
            "recognition started"
        );
        self.model = Some((model, preprocessor));
        self.state = RecognitionState::Running;
        Ok(())
    }

    /// Stream frames from `source` until it ends or `cancel` fires.
    ///
    /// Every `throttle`-th frame (starting with the first) is located and
    /// classified; the others repeat the previous verdicts. The source is
    /// released and the session is `Stopped` on every exit path.
    pub fn run<S: FrameSource>(
        &mut self,
        source: S,
        cancel: &CancelToken,
        mut on_frame: impl FnMut(&FrameReport),
    ) -> Result<RecognitionSummary, EngineError> {
        let mut device = DeviceGuard::new(source);
        if self.state != RecognitionState::Running {
            return Err(crate::TransitionError {
                state: state_name(self.state),
                event: "run",
            }
            .into());
        }

        let result = self.stream(&mut device, cancel, &mut on_frame);
        device.release();
        self.state = RecognitionState::Stopped;

        match &result {
            Ok(summary) => tracing::info!(
                frames = summary.frames,
                processed = summary.processed,
                stop = ?summary.stop,
                "recognition stopped"
            ),
            Err(e) => tracing::warn!(error = %e, "recognition aborted"),
        }
        result
    }

    fn stream<S: FrameSource>(
        &mut self,
        device: &mut DeviceGuard<S>,
        cancel: &CancelToken,
        on_frame: &mut impl FnMut(&FrameReport),
    ) -> Result<RecognitionSummary, EngineError> {
        let throttle = u64::from(self.throttle.max(1));
        let mut frames = 0u64;
        let mut processed = 0u64;
        let mut last: Vec<FaceVerdict> = Vec::new();

        let stop = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            let Some(frame) = device.next_frame()? else {
                break StopReason::EndOfStream;
            };
            let index = frames;
            frames += 1;

            let fresh = index % throttle == 0;
            if fresh {
                last = self.recognize(&frame.data, frame.width, frame.height)?;
                processed += 1;
            }
            on_frame(&FrameReport {
                frame: index,
                processed: fresh,
                faces: last.clone(),
            });
        };

        Ok(RecognitionSummary {
            frames,
            processed,
            stop,
        })
    }

    fn recognize(&mut self, frame: &[u8], width: u32, height: u32) -> Result<Vec<FaceVerdict>, EngineError> {
        self.refresh_model()?;
        let Some((model, preprocessor)) = self.model.as_ref() else {
            return Err(EngineError::MissingModel(self.registry.path().to_path_buf()));
        };

        let faces = self.locator.locate(frame, width, height)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }

        let names = self.store.identity_map()?;
        let mut verdicts = Vec::with_capacity(faces.len());
        for face in faces {
            let Some(crop) = GrayCrop::from_region(frame, width, height, &face) else {
                tracing::warn!(?face, "face box outside frame; skipped");
                continue;
            };
            let prediction = model.classify(&preprocessor.preprocess(&crop))?;
            let verdict = if prediction.within_threshold(model.params()) {
                Verdict::resolve(prediction, &self.tiers, &names)
            } else {
                Verdict::Unknown {
                    distance: prediction.distance,
                }
            };
            tracing::trace!(?face, label = verdict.label(), distance = verdict.distance(), "face classified");
            verdicts.push(FaceVerdict { face, verdict });
        }
        Ok(verdicts)
    }

    /// Pick up a model published since the last processed frame.
    ///
    /// A cleared model keeps the session on its last snapshot; its stale
    /// labels resolve to unknown through the identity map.
    fn refresh_model(&mut self) -> Result<(), EngineError> {
        let Some(latest) = self.registry.current()? else {
            return Ok(());
        };
        let stale = match &self.model {
            Some((model, _)) => !Arc::ptr_eq(model, &latest),
            None => true,
        };
        if stale {
            tracing::info!(persons = latest.labels().len(), "switched to retrained model");
            let preprocessor = Preprocessor::new(latest.image_size());
            self.model = Some((latest, preprocessor));
        }
        Ok(())
    }
}

fn state_name(state: RecognitionState) -> &'static str {
    match state {
        RecognitionState::Idle => "idle",
        RecognitionState::Running => "running",
        RecognitionState::Stopped => "stopped",
    }
}
