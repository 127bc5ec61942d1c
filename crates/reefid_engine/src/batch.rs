use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use reefid_core::{FailureCategory, IdentificationOutcome};
use reefid_logging::{reef_debug, reef_info, reef_warn};
use thiserror::Error;

use crate::classify::classify;
use crate::client::IdentificationService;
use crate::library::{fetch_with_deadline, FetchedBytes, PhotoLibrary};
use crate::store::{PendingItemStore, StoreError};
use crate::{
    AssetReference, BatchItemOutcome, BatchOutcome, BatchProgress, BatchStage, ImagePayload,
};

/// Share of the progress bar covered by payload conversion.
const CONVERSION_SHARE: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Upper bound for loading each item's bytes from the photo library.
    pub fetch_deadline: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            fetch_deadline: Duration::from_secs(30),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, progress: BatchProgress);
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("no items selected")]
    EmptySelection,
    #[error("none of the selected items could be converted")]
    NoValidInput,
    #[error("batch request failed ({category}): {message}")]
    Request {
        category: FailureCategory,
        message: String,
    },
    /// The service answered but some successes could not be marked processed.
    /// `outcome` still reports every item as the service saw it.
    #[error("{} identified items could not be marked processed", failed.len())]
    Commit {
        outcome: BatchOutcome,
        failed: Vec<(AssetReference, StoreError)>,
    },
}

/// Identifies several pending items with a single service call.
pub struct BatchIdentifyCoordinator {
    service: Arc<dyn IdentificationService>,
    library: Arc<dyn PhotoLibrary>,
    store: Arc<PendingItemStore>,
    settings: BatchSettings,
}

impl BatchIdentifyCoordinator {
    pub fn new(
        service: Arc<dyn IdentificationService>,
        library: Arc<dyn PhotoLibrary>,
        store: Arc<PendingItemStore>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            service,
            library,
            store,
            settings,
        }
    }

    /// Converts, submits and settles `selected`.
    ///
    /// Only items with a pending record are sent. Successful items are marked
    /// processed and failed items keep their record as-is. If the request as a
    /// whole fails, no record is touched. A store error while marking one item
    /// does not stop the others from being marked.
    pub async fn run(
        &self,
        selected: &BTreeSet<AssetReference>,
        sink: &dyn ProgressSink,
    ) -> Result<BatchOutcome, BatchError> {
        if selected.is_empty() {
            return Err(BatchError::EmptySelection);
        }
        let total = selected.len();
        reef_info!("Batch identify started for {} items", total);

        // Slot per selected item: index into `payloads` if it converted.
        let mut slots: Vec<(AssetReference, Option<usize>)> = Vec::with_capacity(total);
        let mut payloads = Vec::with_capacity(total);
        for (position, asset) in selected.iter().enumerate() {
            let loaded = match self.store.get(asset) {
                Some(record) => self.load_bytes(asset, record.cached_bytes).await,
                None => {
                    reef_warn!("Batch item {} has no pending record; not sent", asset);
                    None
                }
            };
            let slot = match loaded {
                Some(bytes) => {
                    payloads.push(ImagePayload::from_bytes(&bytes));
                    Some(payloads.len() - 1)
                }
                None => None,
            };
            slots.push((asset.clone(), slot));
            let completed = position + 1;
            sink.emit(BatchProgress {
                fraction: CONVERSION_SHARE * completed as f32 / total as f32,
                stage: BatchStage::Converting,
                completed,
                total,
            });
        }

        if payloads.is_empty() {
            reef_warn!("Batch identify aborted: no item could be converted");
            return Err(BatchError::NoValidInput);
        }

        sink.emit(BatchProgress {
            fraction: CONVERSION_SHARE,
            stage: BatchStage::AwaitingResponse,
            completed: total,
            total,
        });
        let response = self
            .service
            .batch_identify(&payloads)
            .await
            .map_err(|err| {
                let category = classify(&err);
                reef_warn!("Batch request failed ({}): {}", category, err);
                BatchError::Request {
                    category,
                    message: err.to_string(),
                }
            })?;
        sink.emit(BatchProgress {
            fraction: 1.0,
            stage: BatchStage::Done,
            completed: total,
            total,
        });

        let mut answers: HashMap<usize, _> = response
            .results
            .into_iter()
            .map(|item| (item.index, item.result))
            .collect();

        let mut results = Vec::with_capacity(total);
        let mut failed = Vec::new();
        for (asset, slot) in slots {
            let outcome = match slot.map(|index| answers.remove(&index)) {
                Some(Some(Ok(species))) => {
                    if let Err(err) = self.store.mark_processed(&asset) {
                        reef_warn!("Batch item {} identified but not marked: {}", asset, err);
                        failed.push((asset.clone(), err));
                    }
                    IdentificationOutcome::Success(species)
                }
                Some(Some(Err(err))) => IdentificationOutcome::Failure(classify(&err)),
                // Sent but unanswered, or never converted.
                Some(None) | None => IdentificationOutcome::Failure(FailureCategory::Malformed),
            };
            results.push(BatchItemOutcome { asset, outcome });
        }

        let outcome = BatchOutcome::from_results(results);
        reef_info!(
            "Batch identify finished: {} succeeded, {} failed",
            outcome.success_count,
            outcome.failure_count
        );
        if !failed.is_empty() {
            return Err(BatchError::Commit { outcome, failed });
        }
        Ok(outcome)
    }

    async fn load_bytes(&self, asset: &AssetReference, cached: Option<Vec<u8>>) -> Option<Vec<u8>> {
        if let Some(bytes) = cached {
            return Some(bytes);
        }
        match fetch_with_deadline(self.library.as_ref(), asset, self.settings.fetch_deadline).await
        {
            FetchedBytes::Bytes(bytes) => Some(bytes),
            FetchedBytes::Missing => {
                reef_debug!("Batch item {} missing from library", asset);
                None
            }
            FetchedBytes::TimedOut => {
                reef_warn!("Batch item {} timed out while loading", asset);
                None
            }
            FetchedBytes::Failed(err) => {
                reef_warn!("Batch item {} could not be loaded: {}", asset, err);
                None
            }
        }
    }
}
