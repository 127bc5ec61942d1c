use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::filename::{is_safe_reference, photo_filename};
use crate::persist::{AtomicFileWriter, PersistError};
use crate::AssetReference;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("invalid asset reference {0:?}")]
    InvalidReference(String),
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("library task failed: {0}")]
    Task(String),
}

/// Device photo library as seen by the identification pipeline.
#[async_trait::async_trait]
pub trait PhotoLibrary: Send + Sync {
    /// Stores a photo and returns the reference it can be fetched by.
    async fn save(&self, bytes: &[u8]) -> Result<AssetReference, LibraryError>;

    /// Returns `None` when the library no longer has the photo.
    async fn fetch_bytes(&self, asset: &AssetReference) -> Result<Option<Vec<u8>>, LibraryError>;
}

/// Result of a deadline-bounded fetch.
#[derive(Debug)]
pub enum FetchedBytes {
    Bytes(Vec<u8>),
    Missing,
    TimedOut,
    Failed(LibraryError),
}

/// Fetches `asset`, giving up once `deadline` has elapsed.
pub async fn fetch_with_deadline(
    library: &dyn PhotoLibrary,
    asset: &AssetReference,
    deadline: Duration,
) -> FetchedBytes {
    match tokio::time::timeout(deadline, library.fetch_bytes(asset)).await {
        Ok(Ok(Some(bytes))) => FetchedBytes::Bytes(bytes),
        Ok(Ok(None)) => FetchedBytes::Missing,
        Ok(Err(err)) => FetchedBytes::Failed(err),
        Err(_) => FetchedBytes::TimedOut,
    }
}

/// Photo library backed by a plain directory; references are file names.
#[derive(Debug, Clone)]
pub struct DirectoryPhotoLibrary {
    writer: AtomicFileWriter,
}

impl DirectoryPhotoLibrary {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            writer: AtomicFileWriter::new(dir),
        }
    }

    fn path_for(&self, asset: &AssetReference) -> Result<PathBuf, LibraryError> {
        if !is_safe_reference(asset.as_str()) {
            return Err(LibraryError::InvalidReference(asset.to_string()));
        }
        Ok(self.writer.dir().join(asset.as_str()))
    }
}

#[async_trait::async_trait]
impl PhotoLibrary for DirectoryPhotoLibrary {
    async fn save(&self, bytes: &[u8]) -> Result<AssetReference, LibraryError> {
        let filename = photo_filename(bytes);
        let writer = self.writer.clone();
        let content = bytes.to_vec();
        let name = filename.clone();
        tokio::task::spawn_blocking(move || writer.write(&name, &content))
            .await
            .map_err(|err| LibraryError::Task(err.to_string()))??;
        Ok(AssetReference::new(filename))
    }

    async fn fetch_bytes(&self, asset: &AssetReference) -> Result<Option<Vec<u8>>, LibraryError> {
        let path = self.path_for(asset)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
