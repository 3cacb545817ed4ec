use async_trait::async_trait;
use chrono::{DateTime, Utc};
use erased_serde::Serialize as ErasedSerialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage operation failed: {0}")]
    OperationError(String),

    #[error("serialization failed: {0}")]
    SerializationError(String),

    #[error("config does not belong to this backend: {0}")]
    InvalidConfig(&'static str),
}

impl From<std::io::Error> for StorageError {
    fn from(error: std::io::Error) -> Self {
        StorageError::OperationError(error.to_string())
    }
}

impl From<::csv::Error> for StorageError {
    fn from(error: ::csv::Error) -> Self {
        StorageError::SerializationError(error.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        StorageError::SerializationError(error.to_string())
    }
}

/// One payload on its way to a sink, with where it came from.
#[derive(Debug, Clone, Serialize)]
pub struct StorageItem<T: Serialize> {
    pub id: Uuid,
    /// Target the payload was produced for, e.g. `query:spa in Ohrid`.
    pub source: String,
    pub url: Option<Url>,
    pub timestamp: DateTime<Utc>,
    pub data: T,
    pub metadata: Option<Value>,
}

impl<T: Serialize> StorageItem<T> {
    pub fn new(source: impl Into<String>, url: Option<Url>, data: T) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: source.into(),
            url,
            timestamp: Utc::now(),
            data,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Host of the source URL, used to group files on disk.
    pub fn host(&self) -> &str {
        self.url
            .as_ref()
            .and_then(Url::host_str)
            .unwrap_or("unknown")
    }
}

/// Backend-specific settings for one collection, such as a subfolder or file.
pub trait StorageConfig: Send + Sync {
    fn as_any(&self) -> &dyn std::any::Any;

    fn destination(&self) -> &str;
}

pub type ErasedItem = StorageItem<Box<dyn ErasedSerialize + Send + Sync>>;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn create_config(&self, collection_name: &str) -> Box<dyn StorageConfig>;

    async fn store_serialized(
        &self,
        item: ErasedItem,
        config: &dyn StorageConfig,
    ) -> Result<(), StorageError>;

    /// Pushes buffered rows to disk. Backends that write through need not
    /// override this.
    async fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

pub trait IntoStorageData {
    fn into_storage_data(self) -> Box<dyn ErasedSerialize + Send + Sync>;
}

impl<T: Serialize + Send + Sync + 'static> IntoStorageData for T {
    fn into_storage_data(self) -> Box<dyn ErasedSerialize + Send + Sync> {
        Box::new(self)
    }
}

pub(crate) fn downcast<'a, C: 'static>(
    config: &'a dyn StorageConfig,
    backend: &'static str,
) -> Result<&'a C, StorageError> {
    config
        .as_any()
        .downcast_ref::<C>()
        .ok_or(StorageError::InvalidConfig(backend))
}
