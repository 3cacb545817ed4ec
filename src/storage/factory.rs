use super::base::{ErasedItem, StorageError};
use super::{CsvStorage, DiskStorage, StorageBackend, StorageConfig};
use async_trait::async_trait;
use std::path::PathBuf;
use std::str::FromStr;

/// Output format selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl FromStr for OutputFormat {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(StorageError::OperationError(format!(
                "unknown output format {}",
                other
            ))),
        }
    }
}

pub enum StorageType {
    Disk { path: PathBuf },
    Csv { path: PathBuf },
}

impl StorageType {
    pub fn new(format: OutputFormat, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match format {
            OutputFormat::Csv => Self::Csv { path },
            OutputFormat::Json => Self::Disk { path },
        }
    }
}

pub enum Storage {
    Disk(Box<DiskStorage>),
    Csv(Box<CsvStorage>),
}

#[async_trait]
impl StorageBackend for Storage {
    fn create_config(&self, destination: &str) -> Box<dyn StorageConfig> {
        match self {
            Storage::Disk(storage) => storage.create_config(destination),
            Storage::Csv(storage) => storage.create_config(destination),
        }
    }

    async fn store_serialized(
        &self,
        item: ErasedItem,
        config: &dyn StorageConfig,
    ) -> Result<(), StorageError> {
        match self {
            Storage::Disk(storage) => storage.store_serialized(item, config).await,
            Storage::Csv(storage) => storage.store_serialized(item, config).await,
        }
    }

    async fn flush(&self) -> Result<(), StorageError> {
        match self {
            Storage::Disk(storage) => storage.flush().await,
            Storage::Csv(storage) => storage.flush().await,
        }
    }
}

pub fn create_storage(storage_type: StorageType) -> Result<Storage, StorageError> {
    match storage_type {
        StorageType::Disk { path } => Ok(Storage::Disk(Box::new(DiskStorage::new(path)?))),
        StorageType::Csv { path } => Ok(Storage::Csv(Box::new(CsvStorage::new(path)?))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format() {
        assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xlsx".parse::<OutputFormat>().is_err());
    }
}
