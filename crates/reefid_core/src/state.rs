use std::fmt;

use crate::view_model::{DialogAction, DialogView};
use crate::SpeciesData;

/// Identifier of one identification attempt. Allocated monotonically per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// The dialog shown for a capture session.
#[derive(Debug, Clone, PartialEq)]
pub enum DialogState {
    Loading,
    Unlocked,
    Offline,
    Unidentified,
    RateLimited,
    Identified(SpeciesData),
}

impl DialogState {
    /// Failure dialogs offer retry and the pending-items view.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DialogState::Offline | DialogState::Unidentified | DialogState::RateLimited
        )
    }
}

/// Dialog state of one capture session plus the task whose outcome it awaits.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionDialog {
    state: Option<DialogState>,
    active_task: Option<TaskId>,
    dirty: bool,
}

impl SessionDialog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Option<&DialogState> {
        self.state.as_ref()
    }

    /// Task whose outcome the dialog is waiting for, if any.
    pub fn active_task(&self) -> Option<TaskId> {
        self.active_task
    }

    /// True while `Loading` and an attempt can still settle it.
    pub fn is_awaiting_outcome(&self) -> bool {
        self.state == Some(DialogState::Loading) && self.active_task.is_some()
    }

    pub fn view(&self) -> DialogView {
        let mut view = DialogView::from_state(self.state.as_ref(), self.dirty);
        if self.state == Some(DialogState::Loading) && !self.is_awaiting_outcome() {
            // The attempt was cancelled or timed out; nothing will settle it.
            view.actions = vec![DialogAction::Dismiss];
        }
        view
    }

    /// Returns whether the dialog changed since the last call, and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn begin(&mut self, task_id: TaskId) {
        self.state = Some(DialogState::Loading);
        self.active_task = Some(task_id);
        self.dirty = true;
    }

    pub(crate) fn settle(&mut self, state: DialogState) {
        self.state = Some(state);
        self.active_task = None;
        self.dirty = true;
    }

    pub(crate) fn release_task(&mut self) {
        self.active_task = None;
    }

    pub(crate) fn close(&mut self) {
        self.state = None;
        self.active_task = None;
        self.dirty = true;
    }
}
