// src/store/mod.rs

//! Persistence boundary for job records.
//!
//! The store is shared by every orchestration task but each record has a
//! single writer. [`JobStore::update`] is an atomic read-modify-write: the
//! mutation runs against a copy and is only committed when it succeeds, so a
//! rejected transition never leaves a half-applied record behind.
//!
//! - [`memory`] keeps records in a map (default, lost on restart).
//! - [`file`] writes one JSON document per job through the
//!   [`FileSystem`](crate::fs::FileSystem) seam.

pub mod file;
pub mod memory;

use std::sync::Arc;

use crate::config::{ConfigFile, StoreSection};
use crate::errors::{Result, StoreError, TransitionError};
use crate::fs::RealFileSystem;
use crate::job::{JobId, JobRecord};
use crate::types::{BoxFuture, StoreKind};

pub use file::FileJobStore;
pub use memory::MemoryJobStore;

/// A mutation applied to one record under the store's per-record lock.
pub type Mutation = Box<dyn FnOnce(&mut JobRecord) -> std::result::Result<(), TransitionError> + Send>;

pub trait JobStore: Send + Sync {
    /// Persist a newly created record.
    fn insert(&self, record: JobRecord) -> BoxFuture<'_, std::result::Result<(), StoreError>>;

    /// Snapshot of the committed state of one record.
    fn get(&self, id: JobId) -> BoxFuture<'_, std::result::Result<JobRecord, StoreError>>;

    /// Atomically apply `mutation` and return the committed record.
    fn update(
        &self,
        id: JobId,
        mutation: Mutation,
    ) -> BoxFuture<'_, std::result::Result<JobRecord, StoreError>>;

    /// All records, most recently started first.
    fn list(&self) -> BoxFuture<'_, std::result::Result<Vec<JobRecord>, StoreError>>;
}

/// Build the store selected by `[store]`.
pub fn build_store(cfg: &ConfigFile) -> Result<Arc<dyn JobStore>> {
    let StoreSection { kind, dir } = &cfg.store;
    match kind {
        StoreKind::Memory => Ok(Arc::new(MemoryJobStore::new())),
        StoreKind::File => {
            let store = FileJobStore::open(RealFileSystem, dir.clone())?;
            Ok(Arc::new(store))
        }
    }
}

pub(crate) fn newest_first(records: &mut [JobRecord]) {
    records.sort_by(|a, b| b.started_at().cmp(&a.started_at()));
}
