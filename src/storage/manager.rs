use super::base::{IntoStorageData, StorageBackend, StorageError, StorageItem};
use super::{factory::Storage, StorageCategory, StorageConfig};
use serde::Serialize;
use std::collections::HashMap;

/// Routes items to a sink per category, falling back to the default one.
pub struct StorageManager {
    storages: HashMap<StorageCategory, (Storage, Box<dyn StorageConfig>)>,
    default_storage: StorageCategory,
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageManager {
    pub fn new() -> Self {
        Self {
            storages: HashMap::new(),
            default_storage: StorageCategory::default(),
        }
    }

    pub fn register_storage(
        mut self,
        category: StorageCategory,
        storage: Storage,
        destination: &str,
    ) -> Self {
        let config = storage.create_config(destination);
        self.storages.insert(category, (storage, config));

        self
    }

    pub fn set_default_storage(mut self, category: StorageCategory) -> Self {
        self.default_storage = category;
        self
    }

    pub fn get_storage(&self, category: &StorageCategory) -> Option<&(Storage, Box<dyn StorageConfig>)> {
        self.storages
            .get(category)
            .or_else(|| self.get_default_storage())
    }

    pub fn get_default_storage(&self) -> Option<&(Storage, Box<dyn StorageConfig>)> {
        self.storages.get(&self.default_storage)
    }

    pub async fn store<T>(&self, category: StorageCategory, item: StorageItem<T>) -> Result<(), StorageError>
    where
        T: Serialize + Send + Sync + 'static,
    {
        let (storage, config) = self.get_storage(&category).ok_or_else(|| {
            StorageError::OperationError(format!("no storage registered for {:?}", category))
        })?;

        let erased = StorageItem {
            id: item.id,
            source: item.source,
            url: item.url,
            timestamp: item.timestamp,
            data: item.data.into_storage_data(),
            metadata: item.metadata,
        };
        storage.store_serialized(erased, config.as_ref()).await
    }

    pub async fn flush_all(&self) -> Result<(), StorageError> {
        for (storage, _) in self.storages.values() {
            storage.flush().await?;
        }
        Ok(())
    }
}
