use super::base::{downcast, ErasedItem, StorageBackend, StorageConfig, StorageError};
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Encoded rows are written out once this many bytes are pending.
const WRITE_THRESHOLD: usize = 64 * 1024;

/// One CSV file per collection, `<base>/<collection>.csv`.
///
/// The header comes from the first item's fields. A file is truncated on
/// the first write of a run, so every run produces a complete table.
pub struct CsvStorage {
    base_path: PathBuf,
    files: Mutex<HashMap<PathBuf, CsvFile>>,
}

struct CsvFile {
    columns: Vec<String>,
    file: File,
    pending: Vec<u8>,
}

impl CsvFile {
    async fn write_pending(&mut self) -> Result<(), StorageError> {
        if !self.pending.is_empty() {
            self.file.write_all(&self.pending).await?;
            self.pending.clear();
        }
        Ok(())
    }
}

impl CsvStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            files: Mutex::new(HashMap::new()),
        })
    }

    pub fn path_for(&self, collection: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", collection))
    }
}

#[derive(Debug, Clone)]
pub struct CsvConfig {
    pub collection: String,
}

impl StorageConfig for CsvConfig {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn destination(&self) -> &str {
        &self.collection
    }
}

/// One RFC 4180 record with CRLF line ending.
fn encode_row<I, T>(row: I) -> Result<Vec<u8>, StorageError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = ::csv::WriterBuilder::new()
        .terminator(::csv::Terminator::CRLF)
        .from_writer(Vec::new());
    writer.write_record(row)?;
    writer
        .into_inner()
        .map_err(|e| StorageError::OperationError(e.to_string()))
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(nested) => nested.to_string(),
    }
}

/// Flattens an item's payload into named cells. Non-object payloads land
/// in a single `value` column.
fn fields(data: Value) -> Map<String, Value> {
    match data {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

#[async_trait]
impl StorageBackend for CsvStorage {
    fn create_config(&self, collection_name: &str) -> Box<dyn StorageConfig> {
        Box::new(CsvConfig {
            collection: collection_name.to_string(),
        })
    }

    async fn store_serialized(
        &self,
        item: ErasedItem,
        config: &dyn StorageConfig,
    ) -> Result<(), StorageError> {
        let config: &CsvConfig = downcast(config, "csv")?;
        let path = self.path_for(&config.collection);
        let row = fields(serde_json::to_value(&item.data)?);

        let mut files = self.files.lock().await;
        if !files.contains_key(&path) {
            let columns: Vec<String> = row.keys().cloned().collect();
            let file = File::create(&path).await?;
            let pending = encode_row(&columns)?;
            debug!("Started {} with columns {:?}", path.display(), columns);
            files.insert(
                path.clone(),
                CsvFile {
                    columns,
                    file,
                    pending,
                },
            );
        }
        let Some(file) = files.get_mut(&path) else {
            return Err(StorageError::OperationError(format!(
                "{} is not open",
                path.display()
            )));
        };

        let unknown: Vec<&String> = row.keys().filter(|k| !file.columns.contains(*k)).collect();
        if !unknown.is_empty() {
            warn!(
                "Dropping fields {:?} not in the header of {}",
                unknown,
                path.display()
            );
        }

        let cells: Vec<String> = file.columns.iter().map(|c| cell(row.get(c))).collect();
        let encoded = encode_row(&cells)?;
        file.pending.extend_from_slice(&encoded);
        if file.pending.len() >= WRITE_THRESHOLD {
            file.write_pending().await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let mut files = self.files.lock().await;
        for file in files.values_mut() {
            file.write_pending().await?;
            file.file.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::BusinessRecord;
    use crate::storage::base::{IntoStorageData, StorageItem};

    fn item(record: BusinessRecord) -> ErasedItem {
        StorageItem::new("test", None, record.into_storage_data())
    }

    #[test]
    fn test_row_quoting() {
        let row = vec![
            "plain".to_string(),
            "Kej Makedonija 1, Ohrid".to_string(),
            "say \"hi\"".to_string(),
            "two\nlines".to_string(),
            String::new(),
        ];
        let out = encode_row(&row).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "plain,\"Kej Makedonija 1, Ohrid\",\"say \"\"hi\"\"\",\"two\nlines\",\r\n"
        );
    }

    #[tokio::test]
    async fn test_header_from_first_record() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CsvStorage::new(dir.path()).unwrap();
        let config = storage.create_config("places");

        let mut first = BusinessRecord::named("Spa, Ohrid");
        first.phone = Some("+389 46 111 222".into());
        first
            .social_links
            .insert("facebook".into(), "https://facebook.com/spa".into());
        storage.store_serialized(item(first), config.as_ref()).await.unwrap();
        storage
            .store_serialized(item(BusinessRecord::named("Barber")), config.as_ref())
            .await
            .unwrap();
        storage.flush().await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("places.csv")).unwrap();
        let lines: Vec<&str> = written.split("\r\n").collect();
        assert_eq!(
            lines[0],
            "name,category,address,phone,email,website,source_url,social_links,extra"
        );
        assert_eq!(
            lines[1],
            "\"Spa, Ohrid\",,,+389 46 111 222,,,,\"{\"\"facebook\"\":\"\"https://facebook.com/spa\"\"}\",{}"
        );
        assert_eq!(lines[2], "Barber,,,,,,,{},{}");
        assert_eq!(lines.len(), 4);
    }

    #[tokio::test]
    async fn test_large_tables_are_written_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CsvStorage::new(dir.path()).unwrap();
        let config = storage.create_config("big");

        for i in 0..3000 {
            let row = serde_json::json!({"n": i, "note": "Kej Makedonija, Ohrid"});
            storage
                .store_serialized(
                    StorageItem::new("test", None, row.into_storage_data()),
                    config.as_ref(),
                )
                .await
                .unwrap();
        }
        storage.flush().await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("big.csv")).unwrap();
        let lines: Vec<&str> = written.split_terminator("\r\n").collect();
        assert_eq!(lines.len(), 3001);
        assert_eq!(lines[0], "n,note");
        assert_eq!(lines[1], "0,\"Kej Makedonija, Ohrid\"");
        assert_eq!(lines[3000], "2999,\"Kej Makedonija, Ohrid\"");
    }

    #[tokio::test]
    async fn test_first_write_truncates_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pages.csv"), "stale,data\r\n1,2\r\n").unwrap();

        let storage = CsvStorage::new(dir.path()).unwrap();
        let config = storage.create_config("pages");
        storage
            .store_serialized(
                StorageItem::new("test", None, serde_json::json!({"a": 1}).into_storage_data()),
                config.as_ref(),
            )
            .await
            .unwrap();
        storage.flush().await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("pages.csv")).unwrap();
        assert_eq!(written, "a\r\n1\r\n");
    }
}
