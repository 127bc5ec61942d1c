use std::sync::Once;

use pretty_assertions::assert_eq;
use reefid_core::{
    update, DialogAction, DialogEffect, DialogEvent, DialogState, FailureCategory,
    IdentificationOutcome, SessionDialog, SpeciesData, TaskId,
};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(reefid_logging::initialize_for_tests);
}

fn clownfish() -> SpeciesData {
    SpeciesData {
        common_name: "Clown anemonefish".to_string(),
        scientific_name: Some("Amphiprion ocellaris".to_string()),
        confidence: Some(0.93),
        ..SpeciesData::default()
    }
}

fn started(task: u64) -> SessionDialog {
    let (dialog, effects) = update(
        SessionDialog::new(),
        DialogEvent::AnalysisStarted {
            task_id: TaskId(task),
        },
    );
    assert!(effects.is_empty());
    dialog
}

fn finish(dialog: SessionDialog, task: u64, outcome: IdentificationOutcome) -> SessionDialog {
    update(
        dialog,
        DialogEvent::OutcomeReceived {
            task_id: TaskId(task),
            outcome,
        },
    )
    .0
}

#[test]
fn analysis_start_enters_loading() {
    init_logging();
    let mut dialog = started(1);
    assert_eq!(dialog.state(), Some(&DialogState::Loading));
    assert_eq!(dialog.active_task(), Some(TaskId(1)));
    assert!(dialog.consume_dirty());
    assert!(!dialog.consume_dirty());
}

#[test]
fn each_failure_category_has_its_dialog() {
    init_logging();
    let cases = [
        (FailureCategory::NetworkUnavailable, DialogState::Offline),
        (FailureCategory::RateLimited, DialogState::RateLimited),
        (FailureCategory::NoMatch, DialogState::Unidentified),
        (FailureCategory::Malformed, DialogState::Unidentified),
    ];
    for (category, expected) in cases {
        let dialog = finish(started(3), 3, IdentificationOutcome::Failure(category));
        assert_eq!(dialog.state(), Some(&expected));
        assert_eq!(dialog.active_task(), None);
        assert_eq!(
            dialog.view().actions,
            vec![
                DialogAction::Retry,
                DialogAction::ViewPending,
                DialogAction::Dismiss
            ]
        );
    }
}

#[test]
fn success_shows_identified_with_details_action() {
    init_logging();
    let dialog = finish(started(1), 1, IdentificationOutcome::Success(clownfish()));
    assert_eq!(dialog.state(), Some(&DialogState::Identified(clownfish())));

    let (dialog, effects) = update(dialog, DialogEvent::ViewDetailsRequested);
    assert_eq!(effects, vec![DialogEffect::ShowDetails(clownfish())]);

    let (dialog, effects) = update(dialog, DialogEvent::RetryRequested);
    assert!(effects.is_empty());

    let (dialog, effects) = update(dialog, DialogEvent::Dismissed);
    assert_eq!(effects, vec![DialogEffect::Close]);
    assert_eq!(dialog.state(), None);
}

#[test]
fn stale_outcome_is_ignored() {
    init_logging();
    let dialog = started(1);
    let (dialog, _) = update(
        dialog,
        DialogEvent::AnalysisStarted {
            task_id: TaskId(2),
        },
    );

    let dialog = finish(dialog, 1, IdentificationOutcome::Success(clownfish()));
    assert_eq!(dialog.state(), Some(&DialogState::Loading));

    let dialog = finish(
        dialog,
        2,
        IdentificationOutcome::Failure(FailureCategory::NoMatch),
    );
    assert_eq!(dialog.state(), Some(&DialogState::Unidentified));
}

#[test]
fn outcome_after_settling_does_not_override() {
    init_logging();
    let dialog = finish(
        started(4),
        4,
        IdentificationOutcome::Failure(FailureCategory::RateLimited),
    );
    let dialog = finish(dialog, 4, IdentificationOutcome::Success(clownfish()));
    assert_eq!(dialog.state(), Some(&DialogState::RateLimited));
}

#[test]
fn abandoned_task_keeps_state_and_blocks_late_outcome() {
    init_logging();
    let (dialog, effects) = update(
        started(5),
        DialogEvent::AnalysisAbandoned {
            task_id: TaskId(5),
        },
    );
    assert!(effects.is_empty());
    assert_eq!(dialog.state(), Some(&DialogState::Loading));
    assert_eq!(dialog.active_task(), None);

    let dialog = finish(dialog, 5, IdentificationOutcome::Success(clownfish()));
    assert_eq!(dialog.state(), Some(&DialogState::Loading));
}

#[test]
fn outcome_without_loading_is_unreachable() {
    init_logging();
    let dialog = finish(
        SessionDialog::new(),
        1,
        IdentificationOutcome::Success(clownfish()),
    );
    assert_eq!(dialog.state(), None);
}

#[test]
fn failure_dialog_offers_retry_and_pending_view() {
    init_logging();
    let dialog = finish(
        started(1),
        1,
        IdentificationOutcome::Failure(FailureCategory::NetworkUnavailable),
    );

    let (dialog, effects) = update(dialog, DialogEvent::RetryRequested);
    assert_eq!(effects, vec![DialogEffect::StartRetry]);
    assert_eq!(dialog.state(), Some(&DialogState::Offline));

    let (dialog, effects) = update(dialog, DialogEvent::ViewPendingRequested);
    assert_eq!(effects, vec![DialogEffect::ShowPendingItems]);
    assert_eq!(dialog.state(), Some(&DialogState::Offline));

    let (dialog, _) = update(
        dialog,
        DialogEvent::AnalysisStarted {
            task_id: TaskId(2),
        },
    );
    assert_eq!(dialog.state(), Some(&DialogState::Loading));
}

#[test]
fn unlocked_requires_queued_photos() {
    init_logging();
    let (dialog, _) = update(
        SessionDialog::new(),
        DialogEvent::LockedCaptureExited { queued: 0 },
    );
    assert_eq!(dialog.state(), None);

    let (dialog, _) = update(dialog, DialogEvent::LockedCaptureExited { queued: 2 });
    assert_eq!(dialog.state(), Some(&DialogState::Unlocked));
    assert_eq!(
        dialog.view().actions,
        vec![DialogAction::ViewPending, DialogAction::Dismiss]
    );

    let (dialog, effects) = update(dialog, DialogEvent::RetryRequested);
    assert!(effects.is_empty());

    let (_dialog, effects) = update(dialog, DialogEvent::ViewPendingRequested);
    assert_eq!(effects, vec![DialogEffect::ShowPendingItems]);
}

#[test]
fn loading_cannot_be_dismissed_or_unlocked() {
    init_logging();
    let (dialog, effects) = update(started(1), DialogEvent::Dismissed);
    assert!(effects.is_empty());
    let (dialog, _) = update(dialog, DialogEvent::LockedCaptureExited { queued: 3 });
    assert_eq!(dialog.state(), Some(&DialogState::Loading));
    assert!(dialog.view().actions.is_empty());
}

#[test]
fn abandoned_loading_can_be_dismissed() {
    init_logging();
    let (dialog, _) = update(
        started(6),
        DialogEvent::AnalysisAbandoned {
            task_id: TaskId(6),
        },
    );
    assert_eq!(dialog.view().actions, vec![DialogAction::Dismiss]);

    let (dialog, effects) = update(dialog, DialogEvent::RetryRequested);
    assert!(effects.is_empty());

    let (dialog, effects) = update(dialog, DialogEvent::Dismissed);
    assert_eq!(effects, vec![DialogEffect::Close]);
    assert_eq!(dialog.state(), None);
}

#[test]
fn abandoned_loading_gives_way_to_unlocked() {
    init_logging();
    let (dialog, _) = update(
        started(7),
        DialogEvent::AnalysisAbandoned {
            task_id: TaskId(7),
        },
    );
    let (dialog, _) = update(dialog, DialogEvent::LockedCaptureExited { queued: 1 });
    assert_eq!(dialog.state(), Some(&DialogState::Unlocked));
}

#[test]
fn offline_headline_does_not_promise_a_queued_photo() {
    let dialog = finish(
        started(1),
        1,
        IdentificationOutcome::Failure(FailureCategory::NetworkUnavailable),
    );
    assert!(!dialog.view().headline.contains("saved"));
}
