use async_trait::async_trait;
use scheduler_core::models::{TaskProjection, WorkerProjection};
use scheduler_core::traits::{ProjectionStore, ProjectionTransaction};
use scheduler_core::SchedulerResult;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::database::errors::{projection_error, storage_error};
use crate::database::rows::{
    TaskRow, WorkerRow, INSERT_TASK, INSERT_WORKER, TASK_COLUMNS, UPDATE_TASK, UPDATE_WORKER,
    WORKER_COLUMNS,
};

pub struct SqliteProjectionStore {
    pool: SqlitePool,
}

impl SqliteProjectionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectionStore for SqliteProjectionStore {
    async fn begin(&self) -> SchedulerResult<Box<dyn ProjectionTransaction>> {
        let tx = self.pool.begin().await.map_err(storage_error)?;
        Ok(Box::new(SqliteProjectionTransaction { tx }))
    }

    async fn get_task(&self, uuid: &str) -> SchedulerResult<Option<TaskProjection>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM task WHERE uuid = $1");
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        row.map(TaskProjection::try_from).transpose()
    }

    async fn get_worker(&self, hostname: &str) -> SchedulerResult<Option<WorkerProjection>> {
        let sql = format!("SELECT {WORKER_COLUMNS} FROM worker WHERE hostname = $1");
        let row = sqlx::query_as::<_, WorkerRow>(&sql)
            .bind(hostname)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(row.map(WorkerProjection::from))
    }

    async fn list_workers(&self) -> SchedulerResult<Vec<WorkerProjection>> {
        let sql = format!("SELECT {WORKER_COLUMNS} FROM worker ORDER BY hostname");
        let rows = sqlx::query_as::<_, WorkerRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(rows.into_iter().map(WorkerProjection::from).collect())
    }
}

pub struct SqliteProjectionTransaction {
    tx: Transaction<'static, Sqlite>,
}

fn bind_task<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    task: &'q TaskProjection,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(&task.uuid)
        .bind(task.name.as_deref())
        .bind(task.state.as_str())
        .bind(task.args.as_ref().map(Json))
        .bind(task.kwargs.as_ref().map(Json))
        .bind(task.result.as_ref().map(Json))
        .bind(task.eta)
        .bind(task.expires)
        .bind(task.hostname.as_deref())
        .bind(task.client.as_deref())
        .bind(task.exchange.as_deref())
        .bind(task.queue.as_deref())
        .bind(task.routing_key.as_deref())
        .bind(task.parent_id.as_deref())
        .bind(task.root_id.as_deref())
        .bind(task.retries)
        .bind(task.runtime)
        .bind(task.exception.as_deref())
        .bind(task.traceback.as_deref())
        .bind(task.pid)
        .bind(task.requeue)
        .bind(task.utcoffset)
        .bind(task.sent)
        .bind(task.received)
        .bind(task.started)
        .bind(task.succeeded)
        .bind(task.failed)
        .bind(task.revoked)
        .bind(task.rejected)
        .bind(task.retried)
        .bind(task.clock)
        .bind(task.timestamp)
        .bind(task.event_type.as_deref())
        .bind(task.worker_id)
        .bind(Json(&task.field_clocks))
}

fn bind_worker<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    worker: &'q WorkerProjection,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(&worker.hostname)
        .bind(worker.freq)
        .bind(worker.clock)
        .bind(worker.alive)
        .bind(worker.active)
        .bind(worker.processed)
        .bind(worker.sw_ident.as_deref())
        .bind(worker.sw_ver.as_deref())
        .bind(worker.sw_sys.as_deref())
        .bind(worker.pid)
        .bind(worker.timestamp)
        .bind(worker.event_type.as_deref())
        .bind(worker.utcoffset)
        .bind(Json(&worker.field_clocks))
}

#[async_trait]
impl ProjectionTransaction for SqliteProjectionTransaction {
    async fn load_task(&mut self, uuid: &str) -> SchedulerResult<Option<TaskProjection>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM task WHERE uuid = $1");
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(uuid)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(projection_error)?;

        row.map(TaskProjection::try_from).transpose()
    }

    async fn find_worker_id(&mut self, hostname: &str) -> SchedulerResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM worker WHERE hostname = $1")
            .bind(hostname)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(projection_error)
    }

    async fn save_task(&mut self, task: &TaskProjection, exists: bool) -> SchedulerResult<()> {
        let sql = if exists { UPDATE_TASK } else { INSERT_TASK };
        bind_task(sqlx::query(sql), task)
            .execute(&mut *self.tx)
            .await
            .map_err(projection_error)?;

        debug!("保存任务投影: {} -> {}", task.uuid, task.state);
        Ok(())
    }

    async fn load_worker(&mut self, hostname: &str) -> SchedulerResult<Option<WorkerProjection>> {
        let sql = format!("SELECT {WORKER_COLUMNS} FROM worker WHERE hostname = $1");
        let row = sqlx::query_as::<_, WorkerRow>(&sql)
            .bind(hostname)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(projection_error)?;

        Ok(row.map(WorkerProjection::from))
    }

    async fn save_worker(&mut self, worker: &WorkerProjection) -> SchedulerResult<()> {
        let sql = if worker.id.is_some() {
            UPDATE_WORKER
        } else {
            INSERT_WORKER
        };
        bind_worker(sqlx::query(sql), worker)
            .execute(&mut *self.tx)
            .await
            .map_err(projection_error)?;

        debug!("保存Worker投影: {} (alive={})", worker.hostname, worker.alive);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> SchedulerResult<()> {
        self.tx.commit().await.map_err(projection_error)
    }
}
