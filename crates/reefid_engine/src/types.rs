use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use reefid_core::{FailureCategory, IdentificationOutcome, SpeciesData, TaskId};
use serde::{Deserialize, Serialize};

/// Source of "now" for record timestamps; injectable for tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Opaque identifier of a photo in external storage. Unique key of a pending record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetReference(String);

impl AssetReference {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for AssetReference {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceOrientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

/// One frame delivered by the camera layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    pub orientation: DeviceOrientation,
}

/// Base64 image body as sent to the identification service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload(String);

impl ImagePayload {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(STANDARD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Raw failure reported by the identification client, before classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct IdentifyError {
    pub kind: FailureKind,
    pub message: String,
}

impl IdentifyError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The service said so explicitly.
    RateLimited,
    InvalidUrl,
    Network,
    Timeout,
    HttpStatus(u16),
    /// 2xx with an empty body.
    EmptyResponse,
    /// Body could not be decoded.
    Decode,
    /// The service ran but matched nothing.
    NoMatch,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::RateLimited => write!(f, "rate limited"),
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::EmptyResponse => write!(f, "empty response"),
            FailureKind::Decode => write!(f, "decode error"),
            FailureKind::NoMatch => write!(f, "no match"),
            FailureKind::Other => write!(f, "error"),
        }
    }
}

/// Per-item answer inside a batch response, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItemResponse {
    pub index: usize,
    pub result: Result<SpeciesData, IdentifyError>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchResponse {
    pub results: Vec<BatchItemResponse>,
}

/// How an analysis attempt ended, as seen by its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Identified {
        task_id: TaskId,
        asset: AssetReference,
        species: SpeciesData,
    },
    /// `asset` is `None` when the photo could not be stored and nothing was queued.
    Failed {
        task_id: TaskId,
        asset: Option<AssetReference>,
        category: FailureCategory,
    },
    /// Cancelled explicitly or superseded by a newer attempt.
    Cancelled { task_id: TaskId },
    /// Fetching the source bytes overran the deadline.
    TimedOut { task_id: TaskId },
}

impl AnalysisOutcome {
    pub fn task_id(&self) -> TaskId {
        match self {
            AnalysisOutcome::Identified { task_id, .. }
            | AnalysisOutcome::Failed { task_id, .. }
            | AnalysisOutcome::Cancelled { task_id }
            | AnalysisOutcome::TimedOut { task_id } => *task_id,
        }
    }

    /// Silent endings never touch the dialog or the pending store.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            AnalysisOutcome::Cancelled { .. } | AnalysisOutcome::TimedOut { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStage {
    Converting,
    AwaitingResponse,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    /// Fraction in `[0, 1]`; conversion covers `[0, 0.5]`.
    pub fraction: f32,
    pub stage: BatchStage,
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchItemOutcome {
    pub asset: AssetReference,
    pub outcome: IdentificationOutcome,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchOutcome {
    pub results: Vec<BatchItemOutcome>,
    pub total_processed: usize,
    pub success_count: usize,
    pub failure_count: usize,
}

impl BatchOutcome {
    pub(crate) fn from_results(results: Vec<BatchItemOutcome>) -> Self {
        let success_count = results
            .iter()
            .filter(|item| item.outcome.is_success())
            .count();
        Self {
            total_processed: results.len(),
            failure_count: results.len() - success_count,
            success_count,
            results,
        }
    }
}
