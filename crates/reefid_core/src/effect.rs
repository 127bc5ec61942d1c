use crate::SpeciesData;

/// Requests the dialog makes of its host; the host decides how to honour them.
#[derive(Debug, Clone, PartialEq)]
pub enum DialogEffect {
    /// Capture again or re-run identification for the same photo.
    StartRetry,
    /// Hand control to the pending-items view.
    ShowPendingItems,
    /// Open the detail view for an identified species.
    ShowDetails(SpeciesData),
    /// Close the dialog.
    Close,
}
