// src/store/memory.rs

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::errors::StoreError;
use crate::job::{JobId, JobRecord};
use crate::store::{JobStore, Mutation, newest_first};
use crate::types::BoxFuture;

/// Records held in a map behind one async mutex.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: Mutex<HashMap<JobId, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&self, record: JobRecord) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut records = self.records.lock().await;
            let id = record.id();
            if records.contains_key(&id) {
                return Err(StoreError::Duplicate(id));
            }
            records.insert(id, record);
            Ok(())
        })
    }

    fn get(&self, id: JobId) -> BoxFuture<'_, Result<JobRecord, StoreError>> {
        Box::pin(async move {
            self.records
                .lock()
                .await
                .get(&id)
                .cloned()
                .ok_or(StoreError::NotFound(id))
        })
    }

    fn update(&self, id: JobId, mutation: Mutation) -> BoxFuture<'_, Result<JobRecord, StoreError>> {
        Box::pin(async move {
            let mut records = self.records.lock().await;
            let current = records.get(&id).ok_or(StoreError::NotFound(id))?;

            let mut next = current.clone();
            mutation(&mut next)?;
            records.insert(id, next.clone());
            Ok(next)
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<JobRecord>, StoreError>> {
        Box::pin(async move {
            let mut all: Vec<JobRecord> = self.records.lock().await.values().cloned().collect();
            newest_first(&mut all);
            Ok(all)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[tokio::test]
    async fn rejected_mutation_leaves_record_untouched() {
        let store = MemoryJobStore::new();
        let rec = JobRecord::new(Map::new());
        let id = rec.id();
        store.insert(rec.clone()).await.unwrap();

        let err = store
            .update(
                id,
                Box::new(|r: &mut JobRecord| {
                    r.append_log("should not survive")?;
                    r.succeed(serde_json::json!({}))
                }),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Transition(_)));
        assert_eq!(store.get(id).await.unwrap(), rec);
    }

    #[tokio::test]
    async fn duplicate_and_missing_ids_are_reported() {
        let store = MemoryJobStore::new();
        let rec = JobRecord::new(Map::new());
        let id = rec.id();
        store.insert(rec.clone()).await.unwrap();

        assert!(matches!(
            store.insert(rec).await,
            Err(StoreError::Duplicate(dup)) if dup == id
        ));

        let missing = JobId::new();
        assert!(matches!(
            store.get(missing).await,
            Err(StoreError::NotFound(m)) if m == missing
        ));
    }
}
