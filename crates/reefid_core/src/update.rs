use crate::{
    DialogEffect, DialogEvent, DialogState, FailureCategory, IdentificationOutcome, SessionDialog,
};

/// Pure update function: applies an event to the dialog and returns any effects.
pub fn update(mut dialog: SessionDialog, event: DialogEvent) -> (SessionDialog, Vec<DialogEffect>) {
    let effects = match event {
        DialogEvent::AnalysisStarted { task_id } => {
            dialog.begin(task_id);
            Vec::new()
        }
        DialogEvent::OutcomeReceived { task_id, outcome } => {
            // Only the attempt the dialog is waiting on may settle it.
            if dialog.active_task() != Some(task_id)
                || dialog.state() != Some(&DialogState::Loading)
            {
                return (dialog, Vec::new());
            }
            let next = match outcome {
                IdentificationOutcome::Success(data) => DialogState::Identified(data),
                IdentificationOutcome::Failure(category) => failure_state(category),
            };
            dialog.settle(next);
            Vec::new()
        }
        DialogEvent::AnalysisAbandoned { task_id } => {
            if dialog.active_task() == Some(task_id) {
                dialog.release_task();
            }
            Vec::new()
        }
        DialogEvent::LockedCaptureExited { queued } => {
            if queued > 0 && !dialog.is_awaiting_outcome() {
                dialog.settle(DialogState::Unlocked);
            }
            Vec::new()
        }
        DialogEvent::RetryRequested => match dialog.state() {
            Some(state) if state.is_failure() => vec![DialogEffect::StartRetry],
            _ => Vec::new(),
        },
        DialogEvent::ViewPendingRequested => match dialog.state() {
            Some(state) if state.is_failure() || *state == DialogState::Unlocked => {
                vec![DialogEffect::ShowPendingItems]
            }
            _ => Vec::new(),
        },
        DialogEvent::ViewDetailsRequested => match dialog.state() {
            Some(DialogState::Identified(data)) => vec![DialogEffect::ShowDetails(data.clone())],
            _ => Vec::new(),
        },
        DialogEvent::Dismissed => {
            if dialog.state().is_none() || dialog.is_awaiting_outcome() {
                Vec::new()
            } else {
                dialog.close();
                vec![DialogEffect::Close]
            }
        }
    };

    (dialog, effects)
}

fn failure_state(category: FailureCategory) -> DialogState {
    match category {
        FailureCategory::NetworkUnavailable => DialogState::Offline,
        FailureCategory::RateLimited => DialogState::RateLimited,
        FailureCategory::NoMatch | FailureCategory::Malformed => DialogState::Unidentified,
    }
}
