use crate::{IdentificationOutcome, TaskId};

#[derive(Debug, Clone, PartialEq)]
pub enum DialogEvent {
    /// A new identification attempt began (capture or retry).
    AnalysisStarted { task_id: TaskId },
    /// An attempt finished with a classified outcome.
    OutcomeReceived {
        task_id: TaskId,
        outcome: IdentificationOutcome,
    },
    /// An attempt was cancelled or timed out; no outcome will follow.
    AnalysisAbandoned { task_id: TaskId },
    /// User left locked-capture mode with `queued` photos waiting.
    LockedCaptureExited { queued: usize },
    /// User tapped "retry" / "capture more".
    RetryRequested,
    /// User tapped "view pending items".
    ViewPendingRequested,
    /// User tapped "view details" on an identified result.
    ViewDetailsRequested,
    /// User dismissed the dialog.
    Dismissed,
}
