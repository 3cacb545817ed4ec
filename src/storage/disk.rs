use super::base::{downcast, ErasedItem, StorageBackend, StorageConfig, StorageError};
use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};

/// One pretty-printed JSON file per item under
/// `<base>/<collection>/<host>/`.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    base_path: PathBuf,
}

impl DiskStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[derive(Debug, Clone)]
pub struct DiskConfig {
    pub subfolder: String,
    pub filename_prefix: Option<String>,
}

impl StorageConfig for DiskConfig {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn destination(&self) -> &str {
        &self.subfolder
    }
}

#[async_trait]
impl StorageBackend for DiskStorage {
    fn create_config(&self, collection_name: &str) -> Box<dyn StorageConfig> {
        Box::new(DiskConfig {
            subfolder: collection_name.to_string(),
            filename_prefix: None,
        })
    }

    async fn store_serialized(
        &self,
        item: ErasedItem,
        config: &dyn StorageConfig,
    ) -> Result<(), StorageError> {
        let config: &DiskConfig = downcast(config, "disk")?;

        let timestamp = item.timestamp.format("%Y%m%d_%H%M%S");
        let prefix = config.filename_prefix.as_deref().unwrap_or("");
        let filename = format!("{}{}_{}.json", prefix, timestamp, item.id);
        let dir = self.base_path.join(&config.subfolder).join(item.host());
        let final_path = dir.join(filename);

        let json = serde_json::to_string_pretty(&item)?;
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(&final_path, json).await?;
        debug!("Stored {} at {}", item.source, final_path.display());
        Ok(())
    }
}
