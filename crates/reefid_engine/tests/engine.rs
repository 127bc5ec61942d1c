mod common;

use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use common::{at, fixed_clock, init_logging, species, FakeLibrary, FakeService, Reply};
use pretty_assertions::assert_eq;
use reefid_core::{DialogEffect, DialogEvent, DialogState, TaskId};
use reefid_engine::{
    AnalysisOutcome, AssetReference, BatchItemResponse, BatchResponse, CapturedImage,
    DeviceOrientation, EngineConfig, EngineEvent, EngineHandle, FailureKind, IdentifyError,
};
use tempfile::TempDir;

fn config(temp: &TempDir) -> EngineConfig {
    EngineConfig {
        clock: fixed_clock(at(9)),
        ..EngineConfig::default_with_dirs(temp.path().join("pending"), temp.path().join("photos"))
    }
}

fn capture() -> CapturedImage {
    CapturedImage {
        bytes: b"frame".to_vec(),
        orientation: DeviceOrientation::LandscapeLeft,
    }
}

#[test]
fn capture_reports_outcome_and_dialog() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let service = FakeService::new(vec![Reply::Error(IdentifyError::new(
        FailureKind::Network,
        "offline",
    ))]);
    let engine =
        EngineHandle::with_services(config(&temp), service, FakeLibrary::new()).unwrap();
    let dialog = engine.dialog();

    engine.capture(capture());

    match engine.recv() {
        Some(EngineEvent::AnalysisFinished(Ok(AnalysisOutcome::Failed { asset, .. }))) => {
            assert_eq!(asset, Some(AssetReference::new("photo-1")));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(*dialog.borrow(), Some(DialogState::Offline));
    assert_eq!(engine.store().pending_count(), 1);
    assert_eq!(
        engine.dispatch_dialog(DialogEvent::RetryRequested),
        vec![DialogEffect::StartRetry]
    );
}

#[test]
fn retry_then_delete_clears_the_queue() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let library = FakeLibrary::new();
    library.insert("queued", b"bytes");
    let service = FakeService::new(vec![Reply::Species(species("Nudibranch"))]);
    let engine = EngineHandle::with_services(config(&temp), service, library).unwrap();
    let asset = AssetReference::new("queued");
    engine.store().upsert(&asset, at(1), None).unwrap();

    engine.retry_pending(asset.clone());
    assert!(matches!(
        engine.recv(),
        Some(EngineEvent::AnalysisFinished(Ok(AnalysisOutcome::Identified { .. })))
    ));
    assert!(engine.store().get(&asset).unwrap().is_processed);

    engine.delete_pending(BTreeSet::from([asset.clone(), AssetReference::new("unknown")]));
    assert!(matches!(
        engine.recv(),
        Some(EngineEvent::PendingDeleted(Ok(1)))
    ));
    assert!(engine.store().is_empty());
}

#[test]
fn batch_streams_progress_before_finishing() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let library = FakeLibrary::new();
    library.insert("one", b"1");
    library.insert("two", b"2");
    let service = FakeService::with_batch(Ok(BatchResponse {
        results: vec![
            BatchItemResponse {
                index: 0,
                result: Ok(species("Eel")),
            },
            BatchItemResponse {
                index: 1,
                result: Ok(species("Ray")),
            },
        ],
    }));
    let engine = EngineHandle::with_services(config(&temp), service, library).unwrap();
    let selected: BTreeSet<_> = ["one", "two"].into_iter().map(AssetReference::new).collect();
    for asset in &selected {
        engine.store().upsert(asset, at(1), None).unwrap();
    }

    engine.identify_batch(selected);

    let mut fractions = Vec::new();
    let finished = loop {
        match engine.recv() {
            Some(EngineEvent::BatchProgress(progress)) => fractions.push(progress.fraction),
            Some(EngineEvent::BatchFinished(result)) => break result.unwrap(),
            other => panic!("unexpected event: {other:?}"),
        }
    };
    assert_eq!(fractions.len(), 4);
    assert_eq!(fractions.last().copied(), Some(1.0));
    assert_eq!(finished.success_count, 2);
    assert_eq!(engine.store().pending_count(), 0);
}

#[test]
fn locked_capture_exit_is_forwarded() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let engine = EngineHandle::with_services(
        config(&temp),
        FakeService::new(Vec::new()),
        FakeLibrary::new(),
    )
    .unwrap();

    engine.notify_locked_capture_exited(2);

    assert_eq!(*engine.dialog().borrow(), Some(DialogState::Unlocked));
}

#[test]
fn cancel_ends_a_running_capture() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let service = FakeService::new(vec![Reply::Hang]);
    let engine =
        EngineHandle::with_services(config(&temp), service.clone(), FakeLibrary::new()).unwrap();

    engine.capture(capture());
    while service.identified.lock().unwrap().is_empty() {
        thread::sleep(Duration::from_millis(5));
    }
    engine.cancel_analysis();

    match engine.recv() {
        Some(EngineEvent::AnalysisFinished(Ok(outcome))) => {
            assert_eq!(outcome, AnalysisOutcome::Cancelled { task_id: TaskId(1) });
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(service.cancelled(), vec![TaskId(1)]);
    assert!(engine.store().is_empty());
}

fn finished_analyses(engine: &EngineHandle, count: usize) -> Vec<AnalysisOutcome> {
    let mut outcomes: Vec<_> = (0..count)
        .map(|_| match engine.recv() {
            Some(EngineEvent::AnalysisFinished(Ok(outcome))) => outcome,
            other => panic!("unexpected event: {other:?}"),
        })
        .collect();
    outcomes.sort_by_key(AnalysisOutcome::task_id);
    outcomes
}

#[test]
fn cancel_issued_right_after_capture_applies_to_it() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let service = FakeService::new(vec![Reply::Hang]);
    let engine =
        EngineHandle::with_services(config(&temp), service.clone(), FakeLibrary::new()).unwrap();

    engine.capture(capture());
    engine.cancel_analysis();

    assert_eq!(
        finished_analyses(&engine, 1),
        vec![AnalysisOutcome::Cancelled { task_id: TaskId(1) }]
    );
    assert_eq!(service.cancelled(), vec![TaskId(1)]);
    assert!(engine.store().is_empty());
}

#[test]
fn commands_supersede_in_issue_order() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let service = FakeService::new(vec![Reply::Hang, Reply::Hang]);
    let engine =
        EngineHandle::with_services(config(&temp), service.clone(), FakeLibrary::new()).unwrap();

    engine.capture(capture());
    engine.capture(capture());
    engine.cancel_analysis();

    assert_eq!(
        finished_analyses(&engine, 2),
        vec![
            AnalysisOutcome::Cancelled { task_id: TaskId(1) },
            AnalysisOutcome::Cancelled { task_id: TaskId(2) },
        ]
    );
    assert_eq!(service.cancelled(), vec![TaskId(1), TaskId(2)]);
    assert_eq!(
        engine.dispatch_dialog(DialogEvent::Dismissed),
        vec![DialogEffect::Close]
    );
    assert_eq!(*engine.dialog().borrow(), None);
}
