//! Capture session that turns live frames into a new identity.
//!
//! A session creates an uncommitted person up front, streams samples into the
//! store as they are captured, and then either commits (and retrains) or rolls
//! the person back with all of its samples. Retrains that run meanwhile never
//! see the uncommitted samples. A failed enrollment leaves nothing behind.

use crate::cancel::CancelToken;
use crate::device::DeviceGuard;
use crate::registry::ModelRegistry;
use crate::training::{TrainSummary, Trainer};
use crate::EngineError;
use likeness_core::{FaceBox, FaceLocator, GrayCrop, Preprocessor};
use likeness_hw::{CameraError, FrameSource};
use likeness_store::{IdentityStore, PersonId};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollmentPolicy {
    /// Capture stops on its own after this many samples.
    pub capture_target: usize,
    /// Fewer samples than this at stop time rolls the person back.
    pub minimum_required: usize,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot {event} an enrollment that is {state}")]
pub struct TransitionError {
    pub state: &'static str,
    pub event: &'static str,
}

/// Lifecycle of one enrollment session.
///
/// `Created -> Capturing -> Committed | RolledBack`. The terminal states
/// accept no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    Created { person: PersonId },
    Capturing { person: PersonId, count: usize },
    Committed { person: PersonId, count: usize },
    RolledBack { person: PersonId, count: usize },
}

impl EnrollmentState {
    pub fn new(person: PersonId) -> Self {
        Self::Created { person }
    }

    pub fn person(&self) -> PersonId {
        match *self {
            Self::Created { person }
            | Self::Capturing { person, .. }
            | Self::Committed { person, .. }
            | Self::RolledBack { person, .. } => person,
        }
    }

    /// Samples captured so far.
    pub fn count(&self) -> usize {
        match *self {
            Self::Created { .. } => 0,
            Self::Capturing { count, .. }
            | Self::Committed { count, .. }
            | Self::RolledBack { count, .. } => count,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed { .. } | Self::RolledBack { .. })
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Capturing { .. } => "capturing",
            Self::Committed { .. } => "committed",
            Self::RolledBack { .. } => "rolled back",
        }
    }

    fn invalid(&self, event: &'static str) -> TransitionError {
        TransitionError {
            state: self.name(),
            event,
        }
    }

    pub fn begin_capture(self) -> Result<Self, TransitionError> {
        match self {
            Self::Created { person } => Ok(Self::Capturing { person, count: 0 }),
            other => Err(other.invalid("begin capture on")),
        }
    }

    pub fn record_sample(self) -> Result<Self, TransitionError> {
        match self {
            Self::Capturing { person, count } => Ok(Self::Capturing {
                person,
                count: count + 1,
            }),
            other => Err(other.invalid("record a sample on")),
        }
    }

    /// Stop capturing: commit if enough samples were collected.
    pub fn finish(self, policy: &EnrollmentPolicy) -> Result<Self, TransitionError> {
        match self {
            Self::Capturing { person, count } if count >= policy.minimum_required => {
                Ok(Self::Committed { person, count })
            }
            Self::Capturing { person, count } => Ok(Self::RolledBack { person, count }),
            other => Err(other.invalid("finish")),
        }
    }

    /// Give up without regard to the sample count.
    pub fn abort(self) -> Result<Self, TransitionError> {
        match self {
            Self::Created { person } => Ok(Self::RolledBack { person, count: 0 }),
            Self::Capturing { person, count } => Ok(Self::RolledBack { person, count }),
            other => Err(other.invalid("abort")),
        }
    }
}

/// Why the capture loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    TargetReached,
    EndOfStream,
}

/// Progress notifications emitted while a session runs.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollEvent {
    Started { person: PersonId },
    NoFace { frame: u64 },
    MultipleFaces { frame: u64, faces: usize },
    SampleCaptured {
        frame: u64,
        face: FaceBox,
        count: usize,
        target: usize,
    },
    Training { samples: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    Committed {
        person: PersonId,
        samples: usize,
        stop: StopReason,
        training: TrainSummary,
    },
    RolledBack {
        person: PersonId,
        samples: usize,
        required: usize,
        stop: StopReason,
    },
}

/// One enrollment session bound to the engine's store and model.
pub struct Enrollment<'a, L: FaceLocator + ?Sized> {
    pub(crate) store: &'a IdentityStore,
    pub(crate) registry: &'a ModelRegistry,
    pub(crate) trainer: &'a Trainer,
    pub(crate) preprocessor: Preprocessor,
    pub(crate) locator: &'a mut L,
    pub(crate) policy: EnrollmentPolicy,
    pub(crate) warmup_frames: usize,
}

impl<L: FaceLocator + ?Sized> Enrollment<'_, L> {
    pub fn policy(&self) -> EnrollmentPolicy {
        self.policy
    }

    /// Enroll `name` from frames supplied by the device `open_device` opens.
    ///
    /// The device is opened before the person exists, so a device failure
    /// creates nothing. Errors during capture roll the person back before
    /// they are returned. The device is released before retraining and on
    /// every exit path.
    pub fn run<S, F>(
        &mut self,
        open_device: F,
        name: &str,
        note: Option<&str>,
        cancel: &CancelToken,
        mut on_event: impl FnMut(EnrollEvent),
    ) -> Result<EnrollOutcome, EngineError>
    where
        S: FrameSource,
        F: FnOnce() -> Result<S, CameraError>,
    {
        let mut device = DeviceGuard::new(open_device()?);
        device.skip(self.warmup_frames)?;

        let person = self.store.create_person(name, note)?;
        tracing::info!(person, name, target = self.policy.capture_target, "enrollment started");
        on_event(EnrollEvent::Started { person });

        let mut state = EnrollmentState::new(person).begin_capture()?;
        let captured = self.capture(&mut device, &mut state, cancel, &mut on_event);
        device.release();

        let stop = match captured {
            Ok(stop) => stop,
            Err(e) => {
                let aborted = state.abort()?;
                tracing::warn!(person, samples = aborted.count(), error = %e, "enrollment failed; rolling back");
                self.discard(aborted.person());
                return Err(e);
            }
        };

        let state = state.finish(&self.policy)?;
        let samples = state.count();
        if !state.is_committed() {
            self.store.delete_person(person)?;
            tracing::warn!(
                person,
                samples,
                required = self.policy.minimum_required,
                ?stop,
                "too few samples; enrollment rolled back"
            );
            return Ok(EnrollOutcome::RolledBack {
                person,
                samples,
                required: self.policy.minimum_required,
                stop,
            });
        }

        if let Err(e) = self.store.commit_person(person) {
            tracing::warn!(person, error = %e, "commit failed; rolling back");
            self.discard(person);
            return Err(e.into());
        }
        tracing::info!(person, samples, ?stop, "enrollment committed");
        on_event(EnrollEvent::Training { samples });
        let training = self.trainer.retrain(self.store, self.registry)?;
        Ok(EnrollOutcome::Committed {
            person,
            samples,
            stop,
            training,
        })
    }

    fn capture<S: FrameSource>(
        &mut self,
        device: &mut DeviceGuard<S>,
        state: &mut EnrollmentState,
        cancel: &CancelToken,
        on_event: &mut impl FnMut(EnrollEvent),
    ) -> Result<StopReason, EngineError> {
        let target = self.policy.capture_target;
        let mut next_index = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Ok(StopReason::Cancelled);
            }
            if state.count() >= target {
                return Ok(StopReason::TargetReached);
            }
            let Some(frame) = device.next_frame()? else {
                return Ok(StopReason::EndOfStream);
            };
            let index = next_index;
            next_index += 1;

            let faces = self.locator.locate(&frame.data, frame.width, frame.height)?;
            let face = match faces.as_slice() {
                [face] => *face,
                [] => {
                    on_event(EnrollEvent::NoFace { frame: index });
                    continue;
                }
                many => {
                    tracing::debug!(frame = index, faces = many.len(), "several faces; frame skipped");
                    on_event(EnrollEvent::MultipleFaces {
                        frame: index,
                        faces: many.len(),
                    });
                    continue;
                }
            };

            let Some(crop) = GrayCrop::from_region(&frame.data, frame.width, frame.height, &face)
            else {
                tracing::warn!(frame = index, ?face, "face box outside frame; skipped");
                on_event(EnrollEvent::NoFace { frame: index });
                continue;
            };

            let image = self.preprocessor.preprocess(&crop);
            self.store.add_sample(state.person(), &image)?;
            *state = state.record_sample()?;
            on_event(EnrollEvent::SampleCaptured {
                frame: index,
                face,
                count: state.count(),
                target,
            });
        }
    }

    fn discard(&self, person: PersonId) {
        if let Err(e) = self.store.delete_person(person) {
            tracing::error!(person, error = %e, "rollback failed; person left behind");
        }
    }
}
