#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reefid_core::{SpeciesData, TaskId};
use reefid_engine::{
    AssetReference, BatchProgress, BatchResponse, Clock, IdentificationService, IdentifyError,
    ImagePayload, LibraryError, PhotoLibrary, ProgressSink,
};
use tokio::sync::Notify;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(reefid_logging::initialize_for_tests);
}

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
}

pub fn fixed_clock(now: DateTime<Utc>) -> Clock {
    Arc::new(move || now)
}

pub fn species(name: &str) -> SpeciesData {
    SpeciesData {
        common_name: name.to_string(),
        ..SpeciesData::default()
    }
}

pub enum Reply {
    Species(SpeciesData),
    Error(IdentifyError),
    /// Never completes; only cancellation ends the call.
    Hang,
    /// Fails once the gate is notified, whether or not the call was cancelled.
    ErrorAfter(Arc<Notify>, IdentifyError),
}

/// Identification service that replays scripted replies in call order.
#[derive(Default)]
pub struct FakeService {
    replies: Mutex<VecDeque<Reply>>,
    batch_reply: Mutex<Option<Result<BatchResponse, IdentifyError>>>,
    on_batch: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    pub entered: Notify,
    pub identified: Mutex<Vec<TaskId>>,
    pub cancelled: Mutex<Vec<TaskId>>,
    pub batch_sizes: Mutex<Vec<usize>>,
}

impl FakeService {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    pub fn with_batch(reply: Result<BatchResponse, IdentifyError>) -> Arc<Self> {
        let service = Self::default();
        *service.batch_reply.lock().unwrap() = Some(reply);
        Arc::new(service)
    }

    /// Runs `hook` when the batch request arrives, before it is answered.
    pub fn on_batch(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_batch.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn cancelled(&self) -> Vec<TaskId> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl IdentificationService for FakeService {
    async fn identify(
        &self,
        _payload: &ImagePayload,
        task_id: TaskId,
    ) -> Result<SpeciesData, IdentifyError> {
        self.identified.lock().unwrap().push(task_id);
        let reply = self.replies.lock().unwrap().pop_front();
        self.entered.notify_one();
        match reply {
            Some(Reply::Species(data)) => Ok(data),
            Some(Reply::Error(err)) => Err(err),
            Some(Reply::ErrorAfter(gate, err)) => {
                gate.notified().await;
                Err(err)
            }
            Some(Reply::Hang) | None => std::future::pending().await,
        }
    }

    async fn batch_identify(
        &self,
        payloads: &[ImagePayload],
    ) -> Result<BatchResponse, IdentifyError> {
        self.batch_sizes.lock().unwrap().push(payloads.len());
        let hook = self.on_batch.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.batch_reply
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok(BatchResponse::default()))
    }

    fn cancel(&self, task_id: TaskId) {
        self.cancelled.lock().unwrap().push(task_id);
    }
}

/// In-memory photo library with optional failure and latency injection.
#[derive(Default)]
pub struct FakeLibrary {
    photos: Mutex<HashMap<AssetReference, Vec<u8>>>,
    saved: AtomicUsize,
    pub fail_save: AtomicBool,
    pub fetch_delay: Mutex<Option<Duration>>,
}

impl FakeLibrary {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, asset: &str, bytes: &[u8]) {
        self.photos
            .lock()
            .unwrap()
            .insert(AssetReference::new(asset), bytes.to_vec());
    }

    pub fn saved(&self) -> usize {
        self.saved.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PhotoLibrary for FakeLibrary {
    async fn save(&self, bytes: &[u8]) -> Result<AssetReference, LibraryError> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(LibraryError::Task("photo library unavailable".to_string()));
        }
        let n = self.saved.fetch_add(1, Ordering::SeqCst) + 1;
        let asset = AssetReference::new(format!("photo-{n}"));
        self.photos
            .lock()
            .unwrap()
            .insert(asset.clone(), bytes.to_vec());
        Ok(asset)
    }

    async fn fetch_bytes(&self, asset: &AssetReference) -> Result<Option<Vec<u8>>, LibraryError> {
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.photos.lock().unwrap().get(asset).cloned())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<BatchProgress>>,
}

impl RecordingSink {
    pub fn fractions(&self) -> Vec<f32> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.fraction)
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, progress: BatchProgress) {
        self.events.lock().unwrap().push(progress);
    }
}
