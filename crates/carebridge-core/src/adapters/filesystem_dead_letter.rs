//! Filesystem-backed [`DeadLetterStore`].
//!
//! Records are stored as JSON files with time-based partitioning:
//! `<base>/year=YYYY/month=MM/day=DD/<id>.json`. Payloads inside the records
//! are already encrypted by the service layer; this adapter never sees
//! plaintext.

use crate::dead_letter::{DeadLetterError, DeadLetterFilters, DeadLetterRecord, DeadLetterStore};
use crate::Uuid;
use async_trait::async_trait;
use chrono::Datelike;
use std::path::PathBuf;
use tokio::fs;

/// JSON-file store rooted at a base directory.
#[derive(Debug, Clone)]
pub struct FilesystemDeadLetterStore {
    base_path: PathBuf,
}

impl FilesystemDeadLetterStore {
    /// Create the store, ensuring the base directory exists.
    pub async fn new(base_path: PathBuf) -> Result<Self, DeadLetterError> {
        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| DeadLetterError::Storage {
                message: format!("Failed to create base directory: {}", e),
            })?;

        Ok(Self { base_path })
    }

    fn record_path(&self, record: &DeadLetterRecord) -> PathBuf {
        let ts = record.failed_at.as_datetime();
        self.base_path
            .join(format!("year={}", ts.year()))
            .join(format!("month={:02}", ts.month()))
            .join(format!("day={:02}", ts.day()))
            .join(format!("{}.json", record.id))
    }

    /// Walk the partition tree collecting every record file.
    async fn collect_records(&self) -> Result<Vec<DeadLetterRecord>, DeadLetterError> {
        let mut records = Vec::new();
        let mut pending_dirs = vec![self.base_path.clone()];

        while let Some(dir) = pending_dirs.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(DeadLetterError::Storage {
                        message: format!("Failed to read dead-letter directory: {}", e),
                    })
                }
            };

            while let Some(entry) =
                entries
                    .next_entry()
                    .await
                    .map_err(|e| DeadLetterError::Storage {
                        message: format!("Failed to enumerate dead-letter directory: {}", e),
                    })?
            {
                let path = entry.path();
                if path.is_dir() {
                    pending_dirs.push(path);
                } else if path.extension().is_some_and(|ext| ext == "json") {
                    let bytes = fs::read(&path).await.map_err(|e| DeadLetterError::Storage {
                        message: format!("Failed to read dead-letter record: {}", e),
                    })?;
                    let record: DeadLetterRecord =
                        serde_json::from_slice(&bytes).map_err(|e| DeadLetterError::Storage {
                            message: format!("Corrupt dead-letter record at {:?}: {}", path, e),
                        })?;
                    records.push(record);
                }
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl DeadLetterStore for FilesystemDeadLetterStore {
    async fn put(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError> {
        let path = self.record_path(record);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DeadLetterError::Storage {
                    message: format!("Failed to create directory structure: {}", e),
                })?;
        }

        let json =
            serde_json::to_vec_pretty(record).map_err(|e| DeadLetterError::Serialization {
                message: e.to_string(),
            })?;

        fs::write(&path, &json)
            .await
            .map_err(|e| DeadLetterError::Storage {
                message: format!("Failed to write dead-letter record: {}", e),
            })
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterRecord>, DeadLetterError> {
        // Point lookups scan the partition tree; the record id does not
        // encode its partition date.
        let records = self.collect_records().await?;
        Ok(records.into_iter().find(|r| r.id == id))
    }

    async fn list(
        &self,
        filters: &DeadLetterFilters,
    ) -> Result<Vec<DeadLetterRecord>, DeadLetterError> {
        let mut records = self.collect_records().await?;

        records.retain(|r| filters.provider.map_or(true, |p| r.provider == p));
        records.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));

        if let Some(limit) = filters.limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}

#[cfg(test)]
#[path = "filesystem_dead_letter_tests.rs"]
mod tests;
