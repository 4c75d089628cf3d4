//! In-memory job store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{ControlError, ControlResult};
use crate::types::{JobId, JobRecord};

use super::{JobFilter, JobStore, JobUpdate};

/// In-memory job store for testing and degraded operation.
///
/// Data is lost when the process exits, so completed and failed records
/// survive only as long as the service does.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<String, JobRecord>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, record: &JobRecord) -> ControlResult<()> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let key = record.data.id.as_str().to_owned();
        if jobs.contains_key(&key) {
            return Err(ControlError::internal(format!("job {key} already exists")));
        }

        jobs.insert(key, record.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> ControlResult<Option<JobRecord>> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(jobs.get(id.as_str()).cloned())
    }

    async fn update(&self, id: &JobId, update: JobUpdate) -> ControlResult<JobRecord> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let record = jobs
            .get_mut(id.as_str())
            .ok_or_else(|| ControlError::JobNotFound(id.to_string()))?;

        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(machine_id) = update.machine_id {
            record.data.machine_id = Some(machine_id);
        }
        if let Some(target_id) = update.target_id {
            record.data.target_id = Some(target_id);
        }
        if let Some(detail) = update.status_detail {
            record.data.status_detail = detail;
        }
        record.data.updated_at = chrono::Utc::now();

        Ok(record.clone())
    }

    async fn list(&self, filter: &JobFilter) -> ControlResult<Vec<JobRecord>> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let mut results: Vec<_> = jobs.values().filter(|r| filter.matches(r)).cloned().collect();

        results.sort_by(|a, b| b.data.created_at.cmp(&a.data.created_at));

        let offset = filter.offset.unwrap_or(0) as usize;
        let results: Vec<_> = results.into_iter().skip(offset).collect();

        if let Some(limit) = filter.limit {
            Ok(results.into_iter().take(limit as usize).collect())
        } else {
            Ok(results)
        }
    }

    async fn count_where(&self, filter: &JobFilter) -> ControlResult<u64> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(jobs.values().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn delete(&self, id: &JobId) -> ControlResult<()> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        if jobs.remove(id.as_str()).is_none() {
            return Err(ControlError::JobNotFound(id.to_string()));
        }

        Ok(())
    }
}
