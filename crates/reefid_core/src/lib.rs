//! Reefid core: pure identification domain types and the dialog state machine.
mod effect;
mod msg;
mod outcome;
mod state;
mod update;
mod view_model;

pub use effect::DialogEffect;
pub use msg::DialogEvent;
pub use outcome::{FailureCategory, IdentificationOutcome, SpeciesData};
pub use state::{DialogState, SessionDialog, TaskId};
pub use update::update;
pub use view_model::{DialogAction, DialogView};
