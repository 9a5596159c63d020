//! Filesystem-backed [`IdempotencyTracker`] for single-node deployments.
//!
//! One JSON file per idempotency key under `<base>/<provider>/<digest>.json`,
//! where the digest is the SHA-256 of the event id (event ids can contain
//! characters that are not filesystem-safe). Claim atomicity within the
//! process comes from a single async mutex over all mutations; the files
//! give durability across restarts.

use crate::idempotency::{
    apply_failure, apply_reclaim, apply_success, ClaimOutcome, IdempotencyError,
    IdempotencyRecord, IdempotencyTracker,
};
use crate::{CorrelationId, Provider};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// JSON-file tracker rooted at a base directory.
#[derive(Debug)]
pub struct FilesystemIdempotencyTracker {
    base_path: PathBuf,
    // Serializes all mutations; claim must be a single atomic upsert.
    write_lock: Mutex<()>,
}

impl FilesystemIdempotencyTracker {
    /// Create the tracker, ensuring the base directory exists.
    pub async fn new(base_path: PathBuf) -> Result<Self, IdempotencyError> {
        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| IdempotencyError::Storage {
                message: format!("Failed to create base directory: {}", e),
            })?;

        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, event_id: &str, provider: Provider) -> PathBuf {
        let digest = hex::encode(Sha256::digest(event_id.as_bytes()));
        self.base_path
            .join(provider.as_str())
            .join(format!("{}.json", digest))
    }

    async fn read_record(
        &self,
        event_id: &str,
        provider: Provider,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        let path = self.record_path(event_id, provider);
        match fs::read(&path).await {
            Ok(bytes) => {
                let record = serde_json::from_slice(&bytes).map_err(|e| {
                    IdempotencyError::Storage {
                        message: format!("Corrupt idempotency record at {:?}: {}", path, e),
                    }
                })?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IdempotencyError::Storage {
                message: format!("Failed to read idempotency record: {}", e),
            }),
        }
    }

    async fn write_record(&self, record: &IdempotencyRecord) -> Result<(), IdempotencyError> {
        let path = self.record_path(&record.event_id, record.provider);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| IdempotencyError::Storage {
                    message: format!("Failed to create directory structure: {}", e),
                })?;
        }

        let json =
            serde_json::to_vec_pretty(record).map_err(|e| IdempotencyError::Storage {
                message: format!("Failed to serialize idempotency record: {}", e),
            })?;

        // Write-then-rename so a crash mid-write never leaves a torn record.
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &json)
            .await
            .map_err(|e| IdempotencyError::Storage {
                message: format!("Failed to write idempotency record: {}", e),
            })?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| IdempotencyError::Storage {
                message: format!("Failed to finalize idempotency record: {}", e),
            })
    }
}

#[async_trait]
impl IdempotencyTracker for FilesystemIdempotencyTracker {
    #[instrument(skip(self), fields(correlation_id = %correlation_id))]
    async fn claim(
        &self,
        event_id: &str,
        provider: Provider,
        correlation_id: &CorrelationId,
    ) -> Result<ClaimOutcome, IdempotencyError> {
        let _guard = self.write_lock.lock().await;

        match self.read_record(event_id, provider).await? {
            None => {
                let record = IdempotencyRecord::new_pending(event_id, provider);
                self.write_record(&record).await?;
                debug!(event_id, provider = %provider, "Claimed new event");
                Ok(ClaimOutcome::NewlyClaimed(record))
            }
            Some(mut record) => {
                let redriven = apply_reclaim(&mut record);
                self.write_record(&record).await?;
                if redriven {
                    debug!(event_id, provider = %provider, "Re-drove failed event");
                    Ok(ClaimOutcome::NewlyClaimed(record))
                } else {
                    Ok(ClaimOutcome::AlreadyExists(record))
                }
            }
        }
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        provider: Provider,
    ) -> Result<IdempotencyRecord, IdempotencyError> {
        let _guard = self.write_lock.lock().await;

        let mut record = self.read_record(event_id, provider).await?.ok_or_else(|| {
            IdempotencyError::NotFound {
                event_id: event_id.to_string(),
                provider,
            }
        })?;

        apply_success(&mut record);
        self.write_record(&record).await?;
        Ok(record)
    }

    async fn mark_failed(
        &self,
        event_id: &str,
        provider: Provider,
        error_message: &str,
    ) -> Result<IdempotencyRecord, IdempotencyError> {
        let _guard = self.write_lock.lock().await;

        let mut record = self.read_record(event_id, provider).await?.ok_or_else(|| {
            IdempotencyError::NotFound {
                event_id: event_id.to_string(),
                provider,
            }
        })?;

        apply_failure(&mut record, error_message);
        self.write_record(&record).await?;
        Ok(record)
    }

    async fn find(
        &self,
        event_id: &str,
        provider: Provider,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        self.read_record(event_id, provider).await
    }
}

#[cfg(test)]
#[path = "filesystem_idempotency_tests.rs"]
mod tests;
