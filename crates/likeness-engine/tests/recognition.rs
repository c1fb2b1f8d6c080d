mod common;

use common::*;
use likeness_core::Tier;
use likeness_engine::{
    CancelToken, EngineError, FrameReport, RecognitionState, RemoveOutcome, StopReason, Verdict,
};
use likeness_hw::ReplaySource;
use std::sync::atomic::Ordering;

fn two_person_engine(dir: &std::path::Path) -> (likeness_engine::Engine, i64, i64) {
    let engine = open_engine(dir);
    let ana = match enroll(&engine, "Ana", 1, 20) {
        likeness_engine::EnrollOutcome::Committed { person, .. } => person,
        other => panic!("unexpected outcome: {other:?}"),
    };
    let cy = match enroll(&engine, "Cy", 2, 20) {
        likeness_engine::EnrollOutcome::Committed { person, .. } => person,
        other => panic!("unexpected outcome: {other:?}"),
    };
    (engine, ana, cy)
}

#[test]
fn test_missing_model_fails_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let mut locator = ScriptedLocator::new();
    let mut session = engine.recognition(&mut locator).unwrap();

    let err = session.start().unwrap_err();
    assert!(matches!(err, EngineError::MissingModel(ref p) if p == &dir.path().join("model.json")));
    assert_eq!(session.state(), RecognitionState::Idle);
}

#[test]
fn test_throttled_frames_reuse_last_verdicts() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, ana, _) = two_person_engine(dir.path());

    let mut locator = ScriptedLocator::new().faces(3, &[FACE]);
    let (source, released) = TrackedSource::new((0..5).map(|i| face_frame(1, 7, i)).collect());
    let mut reports: Vec<FrameReport> = Vec::new();

    let summary = {
        let mut session = engine.recognition(&mut locator).unwrap();
        session.start().unwrap();
        assert_eq!(session.state(), RecognitionState::Running);
        let summary = session
            .run(source, &CancelToken::new(), |report| reports.push(report.clone()))
            .unwrap();
        assert_eq!(session.state(), RecognitionState::Stopped);
        summary
    };

    assert_eq!(locator.calls, 3);
    assert_eq!((summary.frames, summary.processed), (5, 3));
    assert_eq!(summary.stop, StopReason::EndOfStream);
    assert!(released.load(Ordering::SeqCst));

    let processed: Vec<bool> = reports.iter().map(|r| r.processed).collect();
    assert_eq!(processed, vec![true, false, true, false, true]);
    assert_eq!(reports[1].faces, reports[0].faces);
    assert_eq!(reports[3].faces, reports[2].faces);

    let verdict = &reports[0].faces[0].verdict;
    assert_eq!(verdict.person(), Some(ana));
    assert_eq!(verdict.label(), "Ana");
    assert_eq!(verdict.tier(), Tier::Matched);
    assert_eq!(reports[0].faces[0].face, FACE);
}

#[test]
fn test_every_face_in_frame_gets_a_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _, _) = two_person_engine(dir.path());

    let mut locator = ScriptedLocator::new().faces(1, &[FACE, SECOND_FACE]);
    let mut session = engine.recognition(&mut locator).unwrap();
    session.start().unwrap();
    let mut reports = Vec::new();
    session
        .run(
            ReplaySource::new(vec![face_frame(2, 0, 0)]),
            &CancelToken::new(),
            |report| reports.push(report.clone()),
        )
        .unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].faces.len(), 2);
    assert_eq!(reports[0].faces[0].verdict.label(), "Cy");
    assert_eq!(reports[0].faces[1].face, SECOND_FACE);
}

#[test]
fn test_distance_between_thresholds_is_uncertain() {
    let dir = tempfile::tempdir().unwrap();
    let config = likeness_engine::Config {
        t_low: 0.0,
        t_high: 1000.0,
        ..test_config(dir.path())
    };
    let engine = likeness_engine::Engine::open(config).unwrap();
    let ana = match enroll(&engine, "Ana", 1, 20) {
        likeness_engine::EnrollOutcome::Committed { person, .. } => person,
        other => panic!("unexpected outcome: {other:?}"),
    };

    let mut locator = ScriptedLocator::new().faces(1, &[FACE]);
    let mut session = engine.recognition(&mut locator).unwrap();
    session.start().unwrap();
    let mut reports = Vec::new();
    session
        .run(
            ReplaySource::new(vec![face_frame(1, 30, 0)]),
            &CancelToken::new(),
            |report| reports.push(report.clone()),
        )
        .unwrap();

    let verdict = &reports[0].faces[0].verdict;
    let Verdict::Uncertain { person, name, distance } = verdict else {
        panic!("expected an uncertain verdict, got {verdict:?}");
    };
    assert_eq!((*person, name.as_str()), (ana, "Ana"));
    assert!((0.0..1000.0).contains(distance), "distance {distance}");
}

#[test]
fn test_deleted_person_is_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, ana, _) = two_person_engine(dir.path());

    // Delete without retraining: the model still carries Ana's label.
    assert!(engine.store().delete_person(ana).unwrap());

    let mut locator = ScriptedLocator::new().faces(1, &[FACE]);
    let mut session = engine.recognition(&mut locator).unwrap();
    session.start().unwrap();
    let mut reports = Vec::new();
    session
        .run(
            ReplaySource::new(vec![face_frame(1, 0, 0)]),
            &CancelToken::new(),
            |report| reports.push(report.clone()),
        )
        .unwrap();

    assert!(matches!(reports[0].faces[0].verdict, Verdict::Unknown { .. }));
    assert_eq!(reports[0].faces[0].verdict.label(), "unknown");
}

#[test]
fn test_cancel_stops_and_releases() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _, _) = two_person_engine(dir.path());

    let mut locator = ScriptedLocator::new().faces(10, &[FACE]);
    let (source, released) = TrackedSource::new((0..10).map(|i| face_frame(1, 0, i)).collect());
    let cancel = CancelToken::new();
    let stopper = cancel.clone();
    let mut session = engine.recognition(&mut locator).unwrap();
    session.start().unwrap();

    let summary = session
        .run(source, &cancel, |report| {
            if report.frame == 2 {
                stopper.cancel();
            }
        })
        .unwrap();

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.stop, StopReason::Cancelled);
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(session.state(), RecognitionState::Stopped);
}

#[test]
fn test_run_requires_start() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _, _) = two_person_engine(dir.path());

    let mut locator = ScriptedLocator::new();
    let mut session = engine.recognition(&mut locator).unwrap();
    let (source, released) = TrackedSource::new(vec![face_frame(1, 0, 0)]);

    let err = session.run(source, &CancelToken::new(), |_| {}).unwrap_err();
    assert!(matches!(err, EngineError::Transition(_)));
    assert!(released.load(Ordering::SeqCst));

    session.start().unwrap();
    assert!(matches!(session.start(), Err(EngineError::Transition(_))));
}

#[test]
fn test_removal_retrains_without_person() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, ana, cy) = two_person_engine(dir.path());

    let RemoveOutcome::Retrained(summary) = engine.remove_person(ana).unwrap() else {
        panic!("expected retrain");
    };
    assert_eq!((summary.persons, summary.samples), (1, 20));
    assert_eq!(engine.registry().current().unwrap().unwrap().labels(), vec![cy]);

    // Ana's face now resolves to the only remaining label, far away.
    let mut locator = ScriptedLocator::new().faces(1, &[FACE]);
    let mut session = engine.recognition(&mut locator).unwrap();
    session.start().unwrap();
    let mut reports = Vec::new();
    session
        .run(
            ReplaySource::new(vec![face_frame(1, 0, 0)]),
            &CancelToken::new(),
            |report| reports.push(report.clone()),
        )
        .unwrap();
    assert_ne!(reports[0].faces[0].verdict.person(), Some(ana));

    assert_eq!(engine.remove_person(cy).unwrap(), RemoveOutcome::ModelCleared);
    assert!(engine.registry().current().unwrap().is_none());
    assert!(!engine.registry().path().exists());
    assert_eq!(engine.remove_person(cy).unwrap(), RemoveOutcome::NotFound);
}

#[test]
fn test_retrain_is_picked_up_mid_session() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    enroll(&engine, "Cy", 2, 20);

    let mut locator = ScriptedLocator::new().faces(2, &[FACE]);
    let mut session = engine.recognition(&mut locator).unwrap();
    session.start().unwrap();

    let ana = match enroll(&engine, "Ana", 1, 20) {
        likeness_engine::EnrollOutcome::Committed { person, .. } => person,
        other => panic!("unexpected outcome: {other:?}"),
    };

    let mut reports = Vec::new();
    session
        .run(
            ReplaySource::new(vec![face_frame(1, 0, 0)]),
            &CancelToken::new(),
            |report| reports.push(report.clone()),
        )
        .unwrap();
    assert_eq!(reports[0].faces[0].verdict.person(), Some(ana));
}
