use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;

use reefid_core::{DialogEffect, DialogEvent, DialogState};
use reefid_logging::{reef_error, reef_info};
use thiserror::Error;
use tokio::sync::watch;

use crate::batch::{BatchError, BatchIdentifyCoordinator, BatchSettings, ProgressSink};
use crate::client::{ClientSettings, IdentificationService, ReqwestIdentifier};
use crate::controller::{
    AnalysisError, AnalysisSettings, AnalysisTaskController, StartedAnalysis,
};
use crate::library::{DirectoryPhotoLibrary, PhotoLibrary};
use crate::store::{PendingItemStore, StoreError};
use crate::{
    system_clock, AnalysisOutcome, AssetReference, BatchOutcome, BatchProgress, CapturedImage,
    Clock, IdentifyError,
};

#[derive(Clone)]
pub struct EngineConfig {
    pub client: ClientSettings,
    pub analysis: AnalysisSettings,
    pub batch: BatchSettings,
    pub store_dir: PathBuf,
    pub library_dir: PathBuf,
    pub clock: Clock,
}

impl EngineConfig {
    pub fn default_with_dirs(store_dir: PathBuf, library_dir: PathBuf) -> Self {
        Self {
            client: ClientSettings::default(),
            analysis: AnalysisSettings::default(),
            batch: BatchSettings::default(),
            store_dir,
            library_dir,
            clock: system_clock(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("pending store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("identification client unavailable: {0}")]
    Client(#[from] IdentifyError),
    #[error("async runtime unavailable: {0}")]
    Runtime(#[from] io::Error),
}

enum EngineCommand {
    Capture(CapturedImage),
    RetryPending(AssetReference),
    CancelAnalysis,
    IdentifyBatch(BTreeSet<AssetReference>),
    DeletePending(BTreeSet<AssetReference>),
}

#[derive(Debug)]
pub enum EngineEvent {
    AnalysisFinished(Result<AnalysisOutcome, AnalysisError>),
    BatchProgress(BatchProgress),
    BatchFinished(Result<BatchOutcome, BatchError>),
    PendingDeleted(Result<usize, StoreError>),
}

#[derive(Clone)]
struct EngineContext {
    controller: Arc<AnalysisTaskController>,
    batch: Arc<BatchIdentifyCoordinator>,
    store: Arc<PendingItemStore>,
}

/// Owns the background runtime that executes identification work.
///
/// Commands are taken in issue order on the engine thread. Starting or
/// cancelling an analysis claims the slot there, before the next command is
/// read; the asynchronous work then runs as its own task, so a capture issued
/// while another is in flight supersedes it instead of queueing behind it.
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
    context: EngineContext,
}

impl EngineHandle {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let service: Arc<dyn IdentificationService> =
            Arc::new(ReqwestIdentifier::new(config.client.clone())?);
        let library: Arc<dyn PhotoLibrary> =
            Arc::new(DirectoryPhotoLibrary::new(config.library_dir.clone()));
        Self::with_services(config, service, library)
    }

    /// Builds an engine around caller-supplied collaborators.
    pub fn with_services(
        config: EngineConfig,
        service: Arc<dyn IdentificationService>,
        library: Arc<dyn PhotoLibrary>,
    ) -> Result<Self, EngineError> {
        let store = Arc::new(PendingItemStore::open(
            config.store_dir.clone(),
            config.clock.clone(),
        )?);
        let controller = Arc::new(AnalysisTaskController::new(
            service.clone(),
            library.clone(),
            store.clone(),
            config.analysis.clone(),
            config.clock.clone(),
        ));
        let batch = Arc::new(BatchIdentifyCoordinator::new(
            service,
            library,
            store.clone(),
            config.batch.clone(),
        ));
        let context = EngineContext {
            controller,
            batch,
            store,
        };

        let runtime = tokio::runtime::Runtime::new()?;
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let worker_context = context.clone();

        thread::spawn(move || {
            // Lets synchronous steps reach the runtime, e.g. for service cancellation.
            let _guard = runtime.enter();
            while let Ok(command) = cmd_rx.recv() {
                handle_command(&runtime, &worker_context, command, &event_tx);
            }
            reef_info!("Engine command channel closed; shutting down");
        });

        Ok(Self {
            cmd_tx,
            event_rx,
            context,
        })
    }

    pub fn capture(&self, captured: CapturedImage) {
        self.send(EngineCommand::Capture(captured));
    }

    pub fn retry_pending(&self, asset: AssetReference) {
        self.send(EngineCommand::RetryPending(asset));
    }

    pub fn cancel_analysis(&self) {
        self.send(EngineCommand::CancelAnalysis);
    }

    pub fn identify_batch(&self, selected: BTreeSet<AssetReference>) {
        self.send(EngineCommand::IdentifyBatch(selected));
    }

    pub fn delete_pending(&self, selected: BTreeSet<AssetReference>) {
        self.send(EngineCommand::DeletePending(selected));
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Blocks until the next event; `None` once the engine thread is gone.
    pub fn recv(&self) -> Option<EngineEvent> {
        self.event_rx.recv().ok()
    }

    pub fn store(&self) -> &PendingItemStore {
        &self.context.store
    }

    pub fn dialog(&self) -> watch::Receiver<Option<DialogState>> {
        self.context.controller.subscribe()
    }

    pub fn dispatch_dialog(&self, event: DialogEvent) -> Vec<DialogEffect> {
        self.context.controller.dispatch(event)
    }

    pub fn notify_locked_capture_exited(&self, queued: usize) {
        self.context.controller.notify_locked_capture_exited(queued);
    }

    fn send(&self, command: EngineCommand) {
        if self.cmd_tx.send(command).is_err() {
            reef_error!("Engine thread is gone; command dropped");
        }
    }
}

struct ChannelProgressSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, progress: BatchProgress) {
        let _ = self.tx.send(EngineEvent::BatchProgress(progress));
    }
}

fn handle_command(
    runtime: &tokio::runtime::Runtime,
    context: &EngineContext,
    command: EngineCommand,
    event_tx: &mpsc::Sender<EngineEvent>,
) {
    match command {
        EngineCommand::Capture(captured) => {
            let started = context.controller.begin_capture(captured);
            spawn_analysis(runtime, context, started, event_tx);
        }
        EngineCommand::RetryPending(asset) => {
            let started = context.controller.begin_retry(asset);
            spawn_analysis(runtime, context, started, event_tx);
        }
        EngineCommand::CancelAnalysis => context.controller.cancel_current_analysis(),
        EngineCommand::IdentifyBatch(selected) => {
            let batch = context.batch.clone();
            let event_tx = event_tx.clone();
            runtime.spawn(async move {
                let sink = ChannelProgressSink {
                    tx: event_tx.clone(),
                };
                let result = batch.run(&selected, &sink).await;
                let _ = event_tx.send(EngineEvent::BatchFinished(result));
            });
        }
        EngineCommand::DeletePending(selected) => {
            let result = context.store.delete(&selected);
            let _ = event_tx.send(EngineEvent::PendingDeleted(result));
        }
    }
}

fn spawn_analysis(
    runtime: &tokio::runtime::Runtime,
    context: &EngineContext,
    started: StartedAnalysis,
    event_tx: &mpsc::Sender<EngineEvent>,
) {
    let controller = context.controller.clone();
    let event_tx = event_tx.clone();
    runtime.spawn(async move {
        let result = controller.run(started).await;
        let _ = event_tx.send(EngineEvent::AnalysisFinished(result));
    });
}
