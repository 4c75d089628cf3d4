//! PostgreSQL job store implementation.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::error::{ControlError, ControlResult};
use crate::types::{
    DeploySpec, JobData, JobId, JobRecord, JobStatus, MachineId, MachineSpec, TargetId,
};

use super::{JobFilter, JobStore, JobUpdate};

/// PostgreSQL-backed job store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required tables are created if they don't exist.
    pub async fn new(url: &str, max_connections: u32) -> ControlResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;

        Ok(store)
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> ControlResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Ensure the required tables exist.
    async fn ensure_schema(&self) -> ControlResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                machine_spec JSONB NOT NULL,
                deploy_spec JSONB NOT NULL,
                status TEXT NOT NULL,
                machine_id BIGINT,
                target_id TEXT,
                status_detail TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_jobs_status
            ON jobs (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at
            ON jobs (created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Parse a row into a [`JobRecord`].
    fn row_to_record(row: &sqlx::postgres::PgRow) -> ControlResult<JobRecord> {
        let id: String = row.get("id");
        let machine_spec_json: serde_json::Value = row.get("machine_spec");
        let deploy_spec_json: serde_json::Value = row.get("deploy_spec");
        let status_str: String = row.get("status");
        let machine_id: Option<i64> = row.get("machine_id");
        let target_id: Option<String> = row.get("target_id");
        let status_detail: Option<String> = row.get("status_detail");
        let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
        let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");

        let machine_spec: MachineSpec = serde_json::from_value(machine_spec_json)
            .map_err(|e| ControlError::Serialization(format!("bad machine_spec: {e}")))?;
        let deploy_spec: DeploySpec = serde_json::from_value(deploy_spec_json)
            .map_err(|e| ControlError::Serialization(format!("bad deploy_spec: {e}")))?;

        let status: JobStatus = status_str
            .parse()
            .map_err(|e| ControlError::Serialization(format!("bad status '{status_str}': {e}")))?;

        Ok(JobRecord {
            data: JobData {
                id: JobId::new(id),
                machine_spec,
                deploy_spec,
                machine_id: machine_id.map(MachineId::new),
                target_id: target_id.map(TargetId::new),
                status_detail,
                created_at,
                updated_at,
            },
            status,
        })
    }

    /// Append filter clauses and collect status parameters.
    fn filter_clauses(filter: &JobFilter, query: &mut String, params: &mut Vec<String>) {
        if !filter.statuses.is_empty() {
            let placeholders: Vec<String> = filter
                .statuses
                .iter()
                .enumerate()
                .map(|(i, _)| format!("${}", params.len() + i + 1))
                .collect();
            query.push_str(&format!(" AND status IN ({})", placeholders.join(", ")));
            params.extend(filter.statuses.iter().map(|s| s.as_str().to_owned()));
        }

        match filter.has_machine {
            Some(true) => query.push_str(" AND machine_id IS NOT NULL"),
            Some(false) => query.push_str(" AND machine_id IS NULL"),
            None => {}
        }
    }
}

#[async_trait]
impl JobStore for PostgresStore {
    async fn insert(&self, record: &JobRecord) -> ControlResult<()> {
        let machine_spec = serde_json::to_value(&record.data.machine_spec)
            .map_err(|e| ControlError::Serialization(format!("machine_spec: {e}")))?;
        let deploy_spec = serde_json::to_value(&record.data.deploy_spec)
            .map_err(|e| ControlError::Serialization(format!("deploy_spec: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, machine_spec, deploy_spec, status,
                machine_id, target_id, status_detail, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.data.id.as_str())
        .bind(&machine_spec)
        .bind(&deploy_spec)
        .bind(record.status.as_str())
        .bind(record.data.machine_id.map(MachineId::as_i64))
        .bind(record.data.target_id.as_ref().map(TargetId::as_str))
        .bind(&record.data.status_detail)
        .bind(record.data.created_at)
        .bind(record.data.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &JobId) -> ControlResult<Option<JobRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, machine_spec, deploy_spec, status,
                   machine_id, target_id, status_detail, created_at, updated_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_record(&r)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, id: &JobId, update: JobUpdate) -> ControlResult<JobRecord> {
        // Only the owning worker writes a record, so read-merge-write is
        // safe here; the cross-job admission count goes through
        // count_where instead.
        let mut record = self
            .get(id)
            .await?
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

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, machine_id = $2, target_id = $3,
                status_detail = $4, updated_at = $5
            WHERE id = $6
            "#,
        )
        .bind(record.status.as_str())
        .bind(record.data.machine_id.map(MachineId::as_i64))
        .bind(record.data.target_id.as_ref().map(TargetId::as_str))
        .bind(&record.data.status_detail)
        .bind(record.data.updated_at)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ControlError::JobNotFound(id.to_string()));
        }

        Ok(record)
    }

    async fn list(&self, filter: &JobFilter) -> ControlResult<Vec<JobRecord>> {
        let mut query = String::from(
            r#"
            SELECT id, machine_spec, deploy_spec, status,
                   machine_id, target_id, status_detail, created_at, updated_at
            FROM jobs
            WHERE 1=1
            "#,
        );

        let mut params: Vec<String> = Vec::new();
        Self::filter_clauses(filter, &mut query, &mut params);

        query.push_str(" ORDER BY created_at DESC");

        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        if let Some(offset) = filter.offset {
            query.push_str(&format!(" OFFSET {offset}"));
        }

        let mut sqlx_query = sqlx::query(&query);
        for param in &params {
            sqlx_query = sqlx_query.bind(param);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn count_where(&self, filter: &JobFilter) -> ControlResult<u64> {
        let mut query = String::from("SELECT COUNT(*) AS count FROM jobs WHERE 1=1");

        let mut params: Vec<String> = Vec::new();
        Self::filter_clauses(filter, &mut query, &mut params);

        let mut sqlx_query = sqlx::query(&query);
        for param in &params {
            sqlx_query = sqlx_query.bind(param);
        }

        let row = sqlx_query.fetch_one(&self.pool).await?;
        let count: i64 = row.get("count");

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn delete(&self, id: &JobId) -> ControlResult<()> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ControlError::JobNotFound(id.to_string()));
        }

        Ok(())
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Store behavior is covered against MemoryStore; these only check the
    // SQL fragments assembled from filters.

    #[test]
    fn filter_clause_for_statuses() {
        let filter = JobFilter::new()
            .with_status(JobStatus::Pending)
            .with_status(JobStatus::Processing);

        let mut query = String::from("WHERE 1=1");
        let mut params = Vec::new();
        PostgresStore::filter_clauses(&filter, &mut query, &mut params);

        assert!(query.contains("status IN ($1, $2)"));
        assert_eq!(params, vec!["pending".to_owned(), "processing".to_owned()]);
    }

    #[test]
    fn filter_clause_for_machine_presence() {
        let mut query = String::from("WHERE 1=1");
        let mut params = Vec::new();
        PostgresStore::filter_clauses(
            &JobFilter::new().with_machine(true),
            &mut query,
            &mut params,
        );
        assert!(query.contains("machine_id IS NOT NULL"));
        assert!(params.is_empty());

        let mut query = String::from("WHERE 1=1");
        PostgresStore::filter_clauses(
            &JobFilter::new().with_machine(false),
            &mut query,
            &mut params,
        );
        assert!(query.contains("machine_id IS NULL"));
    }

    #[test]
    fn admission_filter_combines_clauses() {
        let mut query = String::from("WHERE 1=1");
        let mut params = Vec::new();
        PostgresStore::filter_clauses(&JobFilter::active(), &mut query, &mut params);

        assert!(query.contains("status IN ($1, $2, $3)"));
        assert!(query.contains("machine_id IS NOT NULL"));
        assert_eq!(params.len(), 3);
    }
}
