mod common;

use common::*;
use likeness_core::{GrayCrop, LbphParams, Preprocessor};
use likeness_engine::{
    CancelToken, ConfigError, Engine, EngineError, EnrollEvent, EnrollOutcome, StopReason,
    TrainSummary,
};
use likeness_hw::{CameraError, ReplaySource};
use std::sync::atomic::Ordering;

#[test]
fn test_commit_after_early_stop() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let cy = match enroll(&engine, "Cy", 2, 20) {
        EnrollOutcome::Committed { person, .. } => person,
        other => panic!("unexpected outcome: {other:?}"),
    };

    let mut locator = ScriptedLocator::new().faces(40, &[FACE]);
    let (source, released) = TrackedSource::new(face_frames(1, 40));
    let cancel = CancelToken::new();
    let stopper = cancel.clone();

    let outcome = engine
        .enrollment(&mut locator)
        .run(
            || Ok::<_, CameraError>(source),
            "Ana",
            Some("front desk"),
            &cancel,
            |event| {
                if let EnrollEvent::SampleCaptured { count: 25, .. } = event {
                    stopper.cancel();
                }
            },
        )
        .unwrap();

    let EnrollOutcome::Committed { person: ana, samples, stop, training } = outcome else {
        panic!("expected commit, got {outcome:?}");
    };
    assert_eq!(samples, 25);
    assert_eq!(stop, StopReason::Cancelled);
    assert_eq!(training, TrainSummary { persons: 2, samples: 45 });
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(engine.store().sample_count(ana).unwrap(), 25);
    assert_eq!(
        engine.store().get_person(ana).unwrap().unwrap().note.as_deref(),
        Some("front desk")
    );

    // A brightened capture never seen in training still lands on Ana.
    let model = engine.registry().current().unwrap().unwrap();
    let held_out = face_frame(1, 30, 99);
    let crop = GrayCrop::from_region(&held_out.data, held_out.width, held_out.height, &FACE).unwrap();
    let prediction = model
        .classify(&Preprocessor::new(model.image_size()).preprocess(&crop))
        .unwrap();
    assert_eq!(prediction.label, ana);
    assert!(prediction.distance < 60.0, "distance {}", prediction.distance);
    assert_eq!(model.labels(), vec![cy, ana]);
}

#[test]
fn test_too_few_samples_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    enroll(&engine, "Cy", 2, 20);
    let corpus_before = engine.store().load_corpus().unwrap().len();

    let mut locator = ScriptedLocator::new().faces(30, &[FACE]);
    let cancel = CancelToken::new();
    let stopper = cancel.clone();
    let outcome = engine
        .enrollment(&mut locator)
        .run(
            || Ok::<_, CameraError>(ReplaySource::new(face_frames(3, 30))),
            "Bo",
            None,
            &cancel,
            |event| {
                if let EnrollEvent::SampleCaptured { count: 10, .. } = event {
                    stopper.cancel();
                }
            },
        )
        .unwrap();

    let EnrollOutcome::RolledBack { person, samples, required, stop } = outcome else {
        panic!("expected rollback, got {outcome:?}");
    };
    assert_eq!((samples, required, stop), (10, 20, StopReason::Cancelled));
    assert!(engine.store().get_person(person).unwrap().is_none());
    assert_eq!(engine.store().sample_count(person).unwrap(), 0);
    let names: Vec<_> = engine.list_persons().unwrap().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["Cy"]);
    assert_eq!(engine.store().load_corpus().unwrap().len(), corpus_before);
    assert!(!engine.store().identity_map().unwrap().contains_key(&person));
}

#[test]
fn test_retrain_during_capture_skips_unfinished_person() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let cy = match enroll(&engine, "Cy", 2, 20) {
        EnrollOutcome::Committed { person, .. } => person,
        other => panic!("unexpected outcome: {other:?}"),
    };

    let mut locator = ScriptedLocator::new().faces(30, &[FACE]);
    let cancel = CancelToken::new();
    let stopper = cancel.clone();
    let mut concurrent = None;
    let outcome = engine
        .enrollment(&mut locator)
        .run(
            || Ok::<_, CameraError>(ReplaySource::new(face_frames(3, 30))),
            "Bo",
            None,
            &cancel,
            |event| match event {
                EnrollEvent::SampleCaptured { count: 5, .. } => concurrent = Some(engine.retrain().unwrap()),
                EnrollEvent::SampleCaptured { count: 10, .. } => stopper.cancel(),
                _ => {}
            },
        )
        .unwrap();

    assert_eq!(concurrent, Some(TrainSummary { persons: 1, samples: 20 }));
    let EnrollOutcome::RolledBack { person: bo, .. } = outcome else {
        panic!("expected rollback, got {outcome:?}");
    };
    let labels = engine.registry().current().unwrap().unwrap().labels();
    assert!(!labels.contains(&bo));
    assert_eq!(labels, vec![cy]);
}

#[test]
fn test_stops_at_capture_target() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.capture_target = 20;
    let engine = Engine::open(config).unwrap();

    let mut locator = ScriptedLocator::new().faces(30, &[FACE]);
    let outcome = engine
        .enrollment(&mut locator)
        .run(
            || Ok::<_, CameraError>(ReplaySource::new(face_frames(1, 30))),
            "Ana",
            None,
            &CancelToken::new(),
            |_| {},
        )
        .unwrap();

    assert!(matches!(
        outcome,
        EnrollOutcome::Committed { samples: 20, stop: StopReason::TargetReached, .. }
    ));
    assert_eq!(locator.calls, 20);
}

#[test]
fn test_multiple_faces_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());

    let mut locator = ScriptedLocator::new()
        .faces(1, &[FACE, SECOND_FACE])
        .faces(1, &[])
        .faces(20, &[FACE]);
    let mut events = Vec::new();
    let outcome = engine
        .enrollment(&mut locator)
        .run(
            || Ok::<_, CameraError>(ReplaySource::new(face_frames(1, 22))),
            "Ana",
            None,
            &CancelToken::new(),
            |event| events.push(event),
        )
        .unwrap();

    assert!(matches!(
        outcome,
        EnrollOutcome::Committed { samples: 20, stop: StopReason::EndOfStream, .. }
    ));
    assert!(matches!(events[0], EnrollEvent::Started { .. }));
    assert_eq!(events[1], EnrollEvent::MultipleFaces { frame: 0, faces: 2 });
    assert_eq!(events[2], EnrollEvent::NoFace { frame: 1 });
    assert!(matches!(
        events[3],
        EnrollEvent::SampleCaptured { frame: 2, count: 1, .. }
    ));
    assert_eq!(events.last(), Some(&EnrollEvent::Training { samples: 20 }));
}

#[test]
fn test_device_failure_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut locator = ScriptedLocator::new();

    let err = engine
        .enrollment(&mut locator)
        .run(
            || Err::<ReplaySource, _>(CameraError::DeviceNotFound("/dev/video9".into())),
            "Ana",
            None,
            &CancelToken::new(),
            |_| {},
        )
        .unwrap_err();

    assert!(matches!(err, EngineError::Camera(CameraError::DeviceNotFound(_))));
    assert!(engine.list_persons().unwrap().is_empty());
    assert_eq!(locator.calls, 0);
}

#[test]
fn test_error_mid_capture_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());

    let mut locator = ScriptedLocator::new().faces(5, &[FACE]).fail("inference crashed");
    let (source, released) = TrackedSource::new(face_frames(1, 30));
    let err = engine
        .enrollment(&mut locator)
        .run(
            || Ok::<_, CameraError>(source),
            "Ana",
            None,
            &CancelToken::new(),
            |_| {},
        )
        .unwrap_err();

    assert!(matches!(err, EngineError::Locator(_)));
    assert!(released.load(Ordering::SeqCst));
    assert!(engine.list_persons().unwrap().is_empty());
    assert!(engine.store().load_corpus().unwrap().is_empty());
    assert!(engine.registry().current().unwrap().is_none());
}

#[test]
fn test_blank_name_is_rejected_before_capture() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    enroll(&engine, "Ana", 1, 20);

    let mut locator = ScriptedLocator::new().faces(20, &[FACE]);
    let (source, released) = TrackedSource::new(face_frames(1, 20));
    let err = engine
        .enrollment(&mut locator)
        .run(|| Ok::<_, CameraError>(source), "   ", None, &CancelToken::new(), |_| {})
        .unwrap_err();

    assert!(matches!(err, EngineError::Store(_)));
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(locator.calls, 0);
    assert_eq!(engine.list_persons().unwrap().len(), 1);
}

#[test]
fn test_grid_too_fine_for_canonical_size_is_rejected_at_open() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.lbph = LbphParams {
        grid_x: 60,
        ..LbphParams::default()
    };

    let err = Engine::open(config).err().unwrap();
    assert!(matches!(err, EngineError::Config(ConfigError::Invalid(_))), "{err}");
    assert!(!dir.path().join("identities.db").exists());
}
