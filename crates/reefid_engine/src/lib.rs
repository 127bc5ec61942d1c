//! Reefid engine: identification orchestration, offline retry queue and IO collaborators.
mod batch;
mod classify;
mod client;
mod controller;
mod engine;
mod filename;
mod library;
mod persist;
mod store;
mod types;

pub use batch::{BatchError, BatchIdentifyCoordinator, BatchSettings, ProgressSink};
pub use classify::classify;
pub use client::{ClientSettings, IdentificationService, ReqwestIdentifier};
pub use controller::{AnalysisError, AnalysisSettings, AnalysisTaskController, StartedAnalysis};
pub use engine::{EngineConfig, EngineError, EngineEvent, EngineHandle};
pub use library::{fetch_with_deadline, DirectoryPhotoLibrary, FetchedBytes, LibraryError, PhotoLibrary};
pub use persist::{ensure_data_dir, AtomicFileWriter, PersistError};
pub use store::{PendingImageRecord, PendingItemStore, PendingRecords, StoreError};
pub use types::{
    system_clock, AnalysisOutcome, AssetReference, BatchItemOutcome, BatchItemResponse,
    BatchOutcome, BatchProgress, BatchResponse, BatchStage, CapturedImage, Clock,
    DeviceOrientation, FailureKind, IdentifyError, ImagePayload,
};
