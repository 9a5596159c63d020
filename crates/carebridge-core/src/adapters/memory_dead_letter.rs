//! In-memory [`DeadLetterStore`] for testing and development.

use crate::dead_letter::{DeadLetterError, DeadLetterFilters, DeadLetterRecord, DeadLetterStore};
use crate::Uuid;
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Vec-backed store; records are appended in arrival order and listed
/// newest first.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterStore {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn put(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError> {
        let mut records = self.records.lock().await;
        records.push(record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterRecord>, DeadLetterError> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn list(
        &self,
        filters: &DeadLetterFilters,
    ) -> Result<Vec<DeadLetterRecord>, DeadLetterError> {
        let records = self.records.lock().await;

        let mut matched: Vec<DeadLetterRecord> = records
            .iter()
            .filter(|r| filters.provider.map_or(true, |p| r.provider == p))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));

        if let Some(limit) = filters.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}
