use serde::Serialize;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Default)]
pub enum StorageCategory {
    #[default]
    Data, // Extracted business records
    Error, // Targets that ended as Exhausted or Permanent
}
