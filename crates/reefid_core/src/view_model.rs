use crate::DialogState;

/// Actions the presentation layer may offer for the current dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogAction {
    Retry,
    ViewPending,
    ViewDetails,
    Dismiss,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DialogView {
    pub state: Option<DialogState>,
    pub headline: &'static str,
    pub actions: Vec<DialogAction>,
    pub dirty: bool,
}

impl DialogView {
    pub fn from_state(state: Option<&DialogState>, dirty: bool) -> Self {
        let (headline, actions) = match state {
            None => ("", Vec::new()),
            Some(DialogState::Loading) => ("Identifying...", Vec::new()),
            Some(DialogState::Unlocked) => (
                "Photos saved for later identification",
                vec![DialogAction::ViewPending, DialogAction::Dismiss],
            ),
            Some(DialogState::Offline) => (
                "No connection to the identification service.",
                failure_actions(),
            ),
            Some(DialogState::Unidentified) => ("Could not identify this photo", failure_actions()),
            Some(DialogState::RateLimited) => (
                "Too many requests. Try again shortly.",
                failure_actions(),
            ),
            Some(DialogState::Identified(_)) => (
                "Species identified",
                vec![DialogAction::ViewDetails, DialogAction::Dismiss],
            ),
        };
        Self {
            state: state.cloned(),
            headline,
            actions,
            dirty,
        }
    }
}

fn failure_actions() -> Vec<DialogAction> {
    vec![
        DialogAction::Retry,
        DialogAction::ViewPending,
        DialogAction::Dismiss,
    ]
}
