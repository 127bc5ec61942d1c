use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reefid_core::{
    update, DialogEffect, DialogEvent, DialogState, FailureCategory, IdentificationOutcome,
    SessionDialog, TaskId,
};
use reefid_logging::{reef_debug, reef_error, reef_info, reef_warn};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::classify::classify;
use crate::client::IdentificationService;
use crate::library::{fetch_with_deadline, FetchedBytes, PhotoLibrary};
use crate::store::{PendingItemStore, StoreError};
use crate::{AnalysisOutcome, AssetReference, CapturedImage, Clock, ImagePayload};

#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    /// Upper bound for loading source bytes from the photo library.
    pub fetch_deadline: Duration,
    /// Keep the payload with a new pending record so retries skip the library.
    pub cache_failed_bytes: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            fetch_deadline: Duration::from_secs(30),
            cache_failed_bytes: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("pending store update for {asset} failed: {source}")]
    Store {
        asset: AssetReference,
        #[source]
        source: StoreError,
    },
}

struct LiveTask {
    id: TaskId,
    token: CancellationToken,
}

enum AttemptSource {
    Capture {
        bytes: Vec<u8>,
        existing: Option<AssetReference>,
    },
    Pending {
        asset: AssetReference,
    },
}

/// Result of the input stage of an attempt.
enum Prepared {
    Ready {
        bytes: Vec<u8>,
        asset: AssetReference,
    },
    Finished(Result<AnalysisOutcome, AnalysisError>),
}

/// An attempt that already holds the analysis slot. Hand it to
/// [`AnalysisTaskController::run`] to carry out the asynchronous part.
#[must_use = "the dialog stays loading until the attempt is run"]
pub struct StartedAnalysis {
    task_id: TaskId,
    token: CancellationToken,
    captured_at: DateTime<Utc>,
    source: AttemptSource,
}

impl StartedAnalysis {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }
}

/// Runs identification attempts for one capture session, one at a time.
///
/// Starting an attempt supersedes the live one: its token is cancelled, the
/// service is told to drop the old task id, and any result it still produces
/// is discarded because outcomes are only applied while their id is current.
/// Claiming the slot (`begin_*`) is synchronous, so callers that issue
/// commands from one thread get supersede order equal to issue order.
pub struct AnalysisTaskController {
    service: Arc<dyn IdentificationService>,
    library: Arc<dyn PhotoLibrary>,
    store: Arc<PendingItemStore>,
    settings: AnalysisSettings,
    clock: Clock,
    next_task_id: AtomicU64,
    live: Mutex<Option<LiveTask>>,
    dialog: Mutex<SessionDialog>,
    dialog_tx: watch::Sender<Option<DialogState>>,
}

impl AnalysisTaskController {
    pub fn new(
        service: Arc<dyn IdentificationService>,
        library: Arc<dyn PhotoLibrary>,
        store: Arc<PendingItemStore>,
        settings: AnalysisSettings,
        clock: Clock,
    ) -> Self {
        let (dialog_tx, _) = watch::channel(None);
        Self {
            service,
            library,
            store,
            settings,
            clock,
            next_task_id: AtomicU64::new(0),
            live: Mutex::new(None),
            dialog: Mutex::new(SessionDialog::new()),
            dialog_tx,
        }
    }

    /// Entry point for the camera layer.
    pub async fn start_capture(
        &self,
        captured: CapturedImage,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let started = self.begin_capture(captured);
        self.run(started).await
    }

    /// Identifies `image`, saving it to the photo library first when no reference is given.
    pub async fn start_analysis(
        &self,
        image: Vec<u8>,
        existing: Option<AssetReference>,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let started = self.begin_analysis(image, existing);
        self.run(started).await
    }

    /// Re-runs identification for a pending record.
    pub async fn retry_pending(
        &self,
        asset: AssetReference,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let started = self.begin_retry(asset);
        self.run(started).await
    }

    pub fn begin_capture(&self, captured: CapturedImage) -> StartedAnalysis {
        reef_debug!(
            "Capture received ({} bytes, {:?})",
            captured.bytes.len(),
            captured.orientation
        );
        self.begin_analysis(captured.bytes, None)
    }

    pub fn begin_analysis(&self, image: Vec<u8>, existing: Option<AssetReference>) -> StartedAnalysis {
        self.claim_slot(AttemptSource::Capture {
            bytes: image,
            existing,
        })
    }

    pub fn begin_retry(&self, asset: AssetReference) -> StartedAnalysis {
        self.claim_slot(AttemptSource::Pending { asset })
    }

    /// Carries out an attempt claimed by one of the `begin_*` methods.
    pub async fn run(&self, started: StartedAnalysis) -> Result<AnalysisOutcome, AnalysisError> {
        let StartedAnalysis {
            task_id,
            token,
            captured_at,
            source,
        } = started;
        self.run_attempt(task_id, &token, captured_at, source).await
    }

    /// Cancels the live attempt, if any. Calling it with nothing running is a no-op.
    pub fn cancel_current_analysis(&self) {
        let taken = {
            let mut live = self.lock_live();
            let taken = live.take();
            if let Some(task) = &taken {
                self.apply_dialog(DialogEvent::AnalysisAbandoned { task_id: task.id });
            }
            taken
        };
        if let Some(task) = taken {
            reef_info!("Cancelling analysis {}", task.id);
            task.token.cancel();
            self.service.cancel(task.id);
        }
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.lock_live().as_ref().map(|task| task.id)
    }

    pub fn dialog_state(&self) -> Option<DialogState> {
        self.dialog_tx.borrow().clone()
    }

    /// Stream of dialog states; one active value at a time.
    pub fn subscribe(&self) -> watch::Receiver<Option<DialogState>> {
        self.dialog_tx.subscribe()
    }

    /// Forwards a user action to the dialog and returns what the host should do.
    pub fn dispatch(&self, event: DialogEvent) -> Vec<DialogEffect> {
        self.apply_dialog(event)
    }

    /// External trigger for the `Unlocked` dialog.
    pub fn notify_locked_capture_exited(&self, queued: usize) {
        self.apply_dialog(DialogEvent::LockedCaptureExited { queued });
    }

    fn claim_slot(&self, source: AttemptSource) -> StartedAnalysis {
        let task_id = TaskId(self.next_task_id.fetch_add(1, Ordering::SeqCst) + 1);
        let token = CancellationToken::new();
        let captured_at = (self.clock)();

        let superseded = {
            let mut live = self.lock_live();
            let previous = live.replace(LiveTask {
                id: task_id,
                token: token.clone(),
            });
            self.apply_dialog(DialogEvent::AnalysisStarted { task_id });
            previous
        };

        if let Some(previous) = superseded {
            reef_info!("Analysis {} supersedes {}", task_id, previous.id);
            previous.token.cancel();
            self.service.cancel(previous.id);
        } else {
            reef_info!("Analysis {} started", task_id);
        }
        StartedAnalysis {
            task_id,
            token,
            captured_at,
            source,
        }
    }

    async fn run_attempt(
        &self,
        task_id: TaskId,
        token: &CancellationToken,
        captured_at: DateTime<Utc>,
        source: AttemptSource,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let (bytes, asset) = match self.prepare(task_id, token, captured_at, source).await {
            Prepared::Ready { bytes, asset } => (bytes, asset),
            Prepared::Finished(result) => return result,
        };
        if token.is_cancelled() {
            return Ok(self.abandon(task_id, AnalysisOutcome::Cancelled { task_id }));
        }

        let payload = ImagePayload::from_bytes(&bytes);
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Ok(self.abandon(task_id, AnalysisOutcome::Cancelled { task_id }));
            }
            result = self.service.identify(&payload, task_id) => result,
        };

        let outcome = match result {
            Ok(species) => IdentificationOutcome::Success(species),
            Err(err) => {
                let category = classify(&err);
                reef_warn!("Analysis {} for {} failed ({}): {}", task_id, asset, category, err);
                IdentificationOutcome::Failure(category)
            }
        };
        self.finish(task_id, asset, outcome, captured_at, Some(bytes))
            .await
    }

    /// Resolves the asset reference and source bytes for an attempt.
    async fn prepare(
        &self,
        task_id: TaskId,
        token: &CancellationToken,
        captured_at: DateTime<Utc>,
        source: AttemptSource,
    ) -> Prepared {
        match source {
            AttemptSource::Capture {
                bytes,
                existing: Some(asset),
            } => Prepared::Ready { bytes, asset },
            AttemptSource::Capture {
                bytes,
                existing: None,
            } => {
                let saved = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        return Prepared::Finished(Ok(
                            self.abandon(task_id, AnalysisOutcome::Cancelled { task_id }),
                        ));
                    }
                    saved = self.library.save(&bytes) => saved,
                };
                match saved {
                    Ok(asset) => Prepared::Ready { bytes, asset },
                    Err(err) => {
                        // Nothing identifiable exists yet, so nothing is queued.
                        reef_warn!("Analysis {} could not store photo: {}", task_id, err);
                        Prepared::Finished(Ok(
                            self.finish_unqueued(task_id, FailureCategory::NetworkUnavailable),
                        ))
                    }
                }
            }
            AttemptSource::Pending { asset } => {
                if let Some(bytes) = self.store.get(&asset).and_then(|record| record.cached_bytes) {
                    return Prepared::Ready { bytes, asset };
                }
                let fetched = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        return Prepared::Finished(Ok(
                            self.abandon(task_id, AnalysisOutcome::Cancelled { task_id }),
                        ));
                    }
                    fetched = fetch_with_deadline(
                        self.library.as_ref(),
                        &asset,
                        self.settings.fetch_deadline,
                    ) => fetched,
                };
                match fetched {
                    FetchedBytes::Bytes(bytes) => Prepared::Ready { bytes, asset },
                    FetchedBytes::TimedOut => {
                        reef_info!("Analysis {} timed out loading {}", task_id, asset);
                        Prepared::Finished(Ok(
                            self.abandon(task_id, AnalysisOutcome::TimedOut { task_id }),
                        ))
                    }
                    FetchedBytes::Missing | FetchedBytes::Failed(_) => {
                        reef_warn!("Analysis {} has no source bytes for {}", task_id, asset);
                        Prepared::Finished(
                            self.finish(
                                task_id,
                                asset,
                                IdentificationOutcome::Failure(FailureCategory::NoMatch),
                                captured_at,
                                None,
                            )
                            .await,
                        )
                    }
                }
            }
        }
    }

    /// Applies an outcome for a photo that has an asset reference.
    async fn finish(
        &self,
        task_id: TaskId,
        asset: AssetReference,
        outcome: IdentificationOutcome,
        captured_at: DateTime<Utc>,
        bytes: Option<Vec<u8>>,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        if !self.claim_result(task_id) {
            return Ok(AnalysisOutcome::Cancelled { task_id });
        }

        let bytes = bytes.filter(|_| self.settings.cache_failed_bytes);
        let stored = self
            .persist_outcome(asset.clone(), &outcome, captured_at, bytes)
            .await;
        self.apply_dialog(DialogEvent::OutcomeReceived {
            task_id,
            outcome: outcome.clone(),
        });
        if let Err(source) = stored {
            reef_error!("Pending store update for {} failed: {}", asset, source);
            return Err(AnalysisError::Store { asset, source });
        }

        Ok(match outcome {
            IdentificationOutcome::Success(species) => AnalysisOutcome::Identified {
                task_id,
                asset,
                species,
            },
            IdentificationOutcome::Failure(category) => AnalysisOutcome::Failed {
                task_id,
                asset: Some(asset),
                category,
            },
        })
    }

    /// Applies a failure for a photo that never got an asset reference; nothing is queued.
    fn finish_unqueued(&self, task_id: TaskId, category: FailureCategory) -> AnalysisOutcome {
        if !self.claim_result(task_id) {
            return AnalysisOutcome::Cancelled { task_id };
        }
        self.apply_dialog(DialogEvent::OutcomeReceived {
            task_id,
            outcome: IdentificationOutcome::Failure(category),
        });
        AnalysisOutcome::Failed {
            task_id,
            asset: None,
            category,
        }
    }

    /// Releases the slot if `task_id` still holds it. A `false` result means the
    /// attempt was superseded or cancelled and its result must be dropped untouched.
    fn claim_result(&self, task_id: TaskId) -> bool {
        let mut live = self.lock_live();
        if live.as_ref().map(|task| task.id) != Some(task_id) {
            reef_debug!("Discarding stale result of {}", task_id);
            return false;
        }
        *live = None;
        true
    }

    /// Writes the outcome to the pending store on the blocking pool.
    async fn persist_outcome(
        &self,
        asset: AssetReference,
        outcome: &IdentificationOutcome,
        captured_at: DateTime<Utc>,
        bytes: Option<Vec<u8>>,
    ) -> Result<(), StoreError> {
        let store = self.store.clone();
        let failure = match outcome {
            IdentificationOutcome::Success(_) => None,
            IdentificationOutcome::Failure(category) => Some(*category),
        };
        tokio::task::spawn_blocking(move || match failure {
            None => resolve_pending(&store, &asset),
            Some(category) => remember_failure(&store, &asset, category, captured_at, bytes),
        })
        .await
        .map_err(|err| StoreError::Worker(err.to_string()))?
    }

    /// Ends an attempt silently: no store write, no dialog transition.
    fn abandon(&self, task_id: TaskId, outcome: AnalysisOutcome) -> AnalysisOutcome {
        let mut live = self.lock_live();
        if live.as_ref().map(|task| task.id) == Some(task_id) {
            *live = None;
            self.apply_dialog(DialogEvent::AnalysisAbandoned { task_id });
        }
        reef_debug!("Analysis {} ended silently: {:?}", task_id, outcome);
        outcome
    }

    fn apply_dialog(&self, event: DialogEvent) -> Vec<DialogEffect> {
        let mut dialog = self.dialog.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut next, effects) = update(std::mem::take(&mut *dialog), event);
        if next.consume_dirty() {
            self.dialog_tx.send_replace(next.state().cloned());
        }
        *dialog = next;
        effects
    }

    fn lock_live(&self) -> MutexGuard<'_, Option<LiveTask>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn resolve_pending(store: &PendingItemStore, asset: &AssetReference) -> Result<(), StoreError> {
    match store.get(asset) {
        Some(record) if !record.is_processed => {
            store.mark_processed(asset)?;
            Ok(())
        }
        _ => Ok(()),
    }
}

/// The first failure creates the record; later ones count as retries.
fn remember_failure(
    store: &PendingItemStore,
    asset: &AssetReference,
    category: FailureCategory,
    captured_at: DateTime<Utc>,
    bytes: Option<Vec<u8>>,
) -> Result<(), StoreError> {
    if store.get(asset).is_some() {
        store.record_failure(asset, category.as_str())?;
        return Ok(());
    }
    let record = store.upsert(asset, captured_at, Some(category.as_str().to_string()))?;
    if let (None, Some(bytes)) = (&record.cached_bytes, bytes) {
        store.attach_cached_bytes(asset, bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{system_clock, BatchResponse, FailureKind, IdentifyError, LibraryError};
    use reefid_core::SpeciesData;
    use tempfile::TempDir;

    struct Offline;

    #[async_trait::async_trait]
    impl IdentificationService for Offline {
        async fn identify(
            &self,
            _payload: &ImagePayload,
            _task_id: TaskId,
        ) -> Result<SpeciesData, IdentifyError> {
            Err(IdentifyError::new(FailureKind::Network, "offline"))
        }

        async fn batch_identify(
            &self,
            _payloads: &[ImagePayload],
        ) -> Result<BatchResponse, IdentifyError> {
            Ok(BatchResponse::default())
        }

        fn cancel(&self, _task_id: TaskId) {}
    }

    #[async_trait::async_trait]
    impl PhotoLibrary for Offline {
        async fn save(&self, _bytes: &[u8]) -> Result<AssetReference, LibraryError> {
            Err(LibraryError::Task("offline".to_string()))
        }

        async fn fetch_bytes(
            &self,
            _asset: &AssetReference,
        ) -> Result<Option<Vec<u8>>, LibraryError> {
            Ok(None)
        }
    }

    fn controller(temp: &TempDir) -> (AnalysisTaskController, Arc<PendingItemStore>) {
        let store = Arc::new(PendingItemStore::open(temp.path(), system_clock()).unwrap());
        let controller = AnalysisTaskController::new(
            Arc::new(Offline),
            Arc::new(Offline),
            store.clone(),
            AnalysisSettings::default(),
            system_clock(),
        );
        (controller, store)
    }

    #[tokio::test]
    async fn result_arriving_after_supersede_touches_nothing() {
        let temp = TempDir::new().unwrap();
        let (controller, store) = controller(&temp);
        let first = controller.begin_retry(AssetReference::new("late"));
        let second = controller.begin_retry(AssetReference::new("current"));

        // The first attempt's service call completed before it saw the cancellation.
        let outcome = controller
            .finish(
                first.task_id(),
                AssetReference::new("late"),
                IdentificationOutcome::Failure(FailureCategory::NoMatch),
                first.captured_at,
                Some(vec![1, 2, 3]),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            AnalysisOutcome::Cancelled {
                task_id: first.task_id()
            }
        );
        assert!(store.is_empty());
        assert_eq!(controller.current_task(), Some(second.task_id()));
        assert_eq!(controller.dialog_state(), Some(DialogState::Loading));
    }

    #[tokio::test]
    async fn claiming_a_result_releases_the_slot_once() {
        let temp = TempDir::new().unwrap();
        let (controller, _store) = controller(&temp);
        let started = controller.begin_retry(AssetReference::new("a"));

        assert!(controller.claim_result(started.task_id()));
        assert!(!controller.claim_result(started.task_id()));
        assert_eq!(controller.current_task(), None);
    }
}
