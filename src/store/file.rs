// src/store/file.rs

//! One JSON document per job (`<dir>/<job id>.json`).
//!
//! Each write goes to `<id>.json.tmp` first and is then renamed over the
//! live document, so a reader never sees a torn record.
//!
//! Read-modify-write cycles are serialised by a fixed table of striped
//! locks keyed by a hash of the job id, so the lock table does not grow with
//! the number of jobs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::fs::FileSystem;
use crate::job::{JobId, JobRecord};
use crate::store::{JobStore, Mutation, newest_first};
use crate::types::BoxFuture;

/// Number of write locks shared by all records.
const LOCK_STRIPES: usize = 64;

#[derive(Debug)]
pub struct FileJobStore<F: FileSystem> {
    fs: F,
    dir: PathBuf,
    locks: Box<[Mutex<()>]>,
}

impl<F: FileSystem> FileJobStore<F> {
    /// Open (and create, if needed) a store rooted at `dir`.
    pub fn open(fs: F, dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs.create_dir_all(&dir)?;
        Ok(Self {
            fs,
            dir,
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn lock_for(&self, id: JobId) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.locks[(hasher.finish() % self.locks.len() as u64) as usize]
    }

    fn read(&self, id: JobId) -> Result<JobRecord, StoreError> {
        let path = self.path_for(id);
        if !self.fs.exists(&path) {
            return Err(StoreError::NotFound(id));
        }
        let raw = self.fs.read_to_string(&path)?;
        let record: JobRecord = serde_json::from_str(&raw)
            .with_context(|| format!("decoding job record {:?}", path))?;
        Ok(record)
    }

    fn write(&self, record: &JobRecord) -> Result<(), StoreError> {
        let path = self.path_for(record.id());
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(record).context("encoding job record")?;

        self.fs.write(&tmp, &body)?;
        self.fs.rename(&tmp, &path)?;
        debug!(job_id = %record.id(), path = ?path, "job record written");
        Ok(())
    }
}

impl<F: FileSystem> JobStore for FileJobStore<F> {
    fn insert(&self, record: JobRecord) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let id = record.id();
            let _guard = self.lock_for(id).lock().await;

            if self.fs.exists(&self.path_for(id)) {
                return Err(StoreError::Duplicate(id));
            }
            self.write(&record)
        })
    }

    fn get(&self, id: JobId) -> BoxFuture<'_, Result<JobRecord, StoreError>> {
        Box::pin(async move { self.read(id) })
    }

    fn update(&self, id: JobId, mutation: Mutation) -> BoxFuture<'_, Result<JobRecord, StoreError>> {
        Box::pin(async move {
            let _guard = self.lock_for(id).lock().await;

            let mut record = self.read(id)?;
            mutation(&mut record)?;
            self.write(&record)?;
            Ok(record)
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<JobRecord>, StoreError>> {
        Box::pin(async move {
            let mut records = Vec::new();
            for path in self.fs.read_dir(&self.dir)? {
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(id) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<JobId>().ok())
                else {
                    warn!(path = ?path, "ignoring non-job file in store directory");
                    continue;
                };
                records.push(self.read(id)?);
            }
            newest_first(&mut records);
            Ok(records)
        })
    }
}
