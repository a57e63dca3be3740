use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::instrument;

use super::VmStore;
use crate::error::{OrchestratorError, Result};
use crate::vm::{name_key, NewVm, VmId, VmRecord, VmStatus};

/// [`VmStore`] backed by the `vms` table.
#[derive(Debug, Clone)]
pub struct SqliteVmStore {
    pool: SqlitePool,
}

impl SqliteVmStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl VmStore for SqliteVmStore {
    async fn find_all(&self) -> Result<Vec<VmRecord>> {
        let rows = sqlx::query_as::<_, VmRow>("SELECT * FROM vms ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }

    async fn find_by_id(&self, id: VmId) -> Result<Option<VmRecord>> {
        let row = sqlx::query_as::<_, VmRow>("SELECT * FROM vms WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<VmRecord>> {
        let row = sqlx::query_as::<_, VmRow>("SELECT * FROM vms WHERE name_key = ?")
            .bind(name_key(name))
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, vm), fields(name = %vm.name))]
    async fn insert(&self, vm: NewVm) -> Result<VmRecord> {
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO vms (name, name_key, os_type, cpu, ram, storage, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&vm.name)
        .bind(name_key(&vm.name))
        .bind(&vm.os_type)
        .bind(vm.cpu)
        .bind(vm.ram)
        .bind(vm.storage)
        .bind(vm.status)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                OrchestratorError::AlreadyExists(vm.name.clone())
            }
            other => OrchestratorError::Database(other),
        })?;

        let id = result.last_insert_rowid();
        self.find_by_id(id)
            .await?
            .ok_or(OrchestratorError::NotFound(id))
    }

    #[instrument(skip(self, vm), fields(id = vm.id))]
    async fn save(&self, vm: &VmRecord) -> Result<VmRecord> {
        let result = sqlx::query(
            r#"
            UPDATE vms
            SET os_type = ?, cpu = ?, ram = ?, storage = ?, status = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&vm.os_type)
        .bind(vm.cpu)
        .bind(vm.ram)
        .bind(vm.storage)
        .bind(vm.status)
        .bind(Utc::now().timestamp())
        .bind(vm.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(vm.id));
        }

        self.find_by_id(vm.id)
            .await?
            .ok_or(OrchestratorError::NotFound(vm.id))
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: VmId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM vms WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// Internal row type for sqlx
#[derive(sqlx::FromRow)]
struct VmRow {
    id: i64,
    name: String,
    os_type: String,
    cpu: i64,
    ram: i64,
    storage: i64,
    status: VmStatus,
    created_at: i64,
    updated_at: i64,
}

impl From<VmRow> for VmRecord {
    fn from(row: VmRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            os_type: row.os_type,
            cpu: row.cpu,
            ram: row.ram,
            storage: row.storage,
            status: row.status,
            created_at: timestamp(row.created_at),
            updated_at: timestamp(row.updated_at),
        }
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
