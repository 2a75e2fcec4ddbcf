use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::models::{PeriodicTask, ScheduleKind};
use scheduler_core::traits::{BeaconReader, RegistryStore, RegistryTransaction};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::advance_beacon;
use sqlx::query::Query;
use sqlx::postgres::PgArguments;
use sqlx::types::Json;
use sqlx::{Row, Postgres, PgPool, Transaction};
use tracing::debug;

use crate::database::errors::{registry_error, storage_error};
use crate::database::rows::{
    schedule_foreign_keys, PeriodicTaskRow, INSERT_PERIODIC_TASK, RECORD_RUN, SELECT_BEACON,
    SELECT_PERIODIC_TASK, UPDATE_PERIODIC_TASK,
};

const ADVANCE_BEACON: &str = r#"
    INSERT INTO periodic_tasks_changed (id, last_update) VALUES (1, $1)
    ON CONFLICT (id) DO UPDATE SET last_update = GREATEST(
        excluded.last_update,
        periodic_tasks_changed.last_update + INTERVAL '1 microsecond'
    )
    RETURNING last_update
"#;

pub struct PostgresRegistryStore {
    pool: PgPool,
}

impl PostgresRegistryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_tasks(&self, filter: &str) -> SchedulerResult<Vec<PeriodicTask>> {
        let sql = format!("{SELECT_PERIODIC_TASK} {filter} ORDER BY pt.id");
        let rows = sqlx::query_as::<_, PeriodicTaskRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.into_iter().map(PeriodicTask::try_from).collect()
    }
}

#[async_trait]
impl RegistryStore for PostgresRegistryStore {
    async fn begin(&self) -> SchedulerResult<Box<dyn RegistryTransaction>> {
        let tx = self.pool.begin().await.map_err(storage_error)?;
        Ok(Box::new(PostgresRegistryTransaction { tx }))
    }

    async fn get(&self, id: i64) -> SchedulerResult<Option<PeriodicTask>> {
        let sql = format!("{SELECT_PERIODIC_TASK} WHERE pt.id = $1");
        let row = sqlx::query_as::<_, PeriodicTaskRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        row.map(PeriodicTask::try_from).transpose()
    }

    async fn list(&self) -> SchedulerResult<Vec<PeriodicTask>> {
        self.fetch_tasks("").await
    }

    async fn list_enabled(&self) -> SchedulerResult<Vec<PeriodicTask>> {
        self.fetch_tasks("WHERE pt.enabled = TRUE").await
    }
}

#[async_trait]
impl BeaconReader for PostgresRegistryStore {
    async fn last_change(&self) -> SchedulerResult<Option<DateTime<Utc>>> {
        sqlx::query_scalar::<_, DateTime<Utc>>(SELECT_BEACON)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)
    }
}

pub struct PostgresRegistryTransaction {
    tx: Transaction<'static, Postgres>,
}

fn bind_periodic_task<'q>(
    query: Query<'q, Postgres, PgArguments>,
    task: &'q PeriodicTask,
) -> Query<'q, Postgres, PgArguments> {
    let [interval_id, crontab_id, solar_id, clocked_id] = schedule_foreign_keys(task);
    query
        .bind(&task.name)
        .bind(&task.task)
        .bind(Json(&task.args))
        .bind(Json(&task.kwargs))
        .bind(task.queue.as_deref())
        .bind(task.exchange.as_deref())
        .bind(task.routing_key.as_deref())
        .bind(Json(&task.headers))
        .bind(task.priority)
        .bind(task.expires)
        .bind(task.expire_seconds)
        .bind(task.one_off)
        .bind(task.start_time)
        .bind(task.enabled)
        .bind(task.last_run_at)
        .bind(task.total_run_count)
        .bind(task.date_changed)
        .bind(&task.description)
        .bind(task.no_changes)
        .bind(interval_id)
        .bind(crontab_id)
        .bind(solar_id)
        .bind(clocked_id)
}

#[async_trait]
impl RegistryTransaction for PostgresRegistryTransaction {
    async fn find_by_id(&mut self, id: i64) -> SchedulerResult<Option<PeriodicTask>> {
        let sql = format!("{SELECT_PERIODIC_TASK} WHERE pt.id = $1");
        let row = sqlx::query_as::<_, PeriodicTaskRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage_error)?;

        row.map(PeriodicTask::try_from).transpose()
    }

    async fn find_id_by_name(&mut self, name: &str) -> SchedulerResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM periodic_task WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage_error)
    }

    async fn find_id_by_task(&mut self, task: &str) -> SchedulerResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM periodic_task WHERE task = $1")
            .bind(task)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage_error)
    }

    async fn insert_schedule(&mut self, schedule: &ScheduleKind) -> SchedulerResult<i64> {
        let query = match schedule {
            ScheduleKind::Interval(interval) => {
                sqlx::query("INSERT INTO interval_schedule (every, period) VALUES ($1, $2) RETURNING id")
                    .bind(interval.every)
                    .bind(interval.period.as_str())
            }
            ScheduleKind::Crontab(crontab) => sqlx::query(
                r#"
                INSERT INTO crontab_schedule (minute, hour, day_of_week, day_of_month, month_of_year, timezone)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id
                "#,
            )
            .bind(&crontab.minute)
            .bind(&crontab.hour)
            .bind(&crontab.day_of_week)
            .bind(&crontab.day_of_month)
            .bind(&crontab.month_of_year)
            .bind(&crontab.timezone),
            ScheduleKind::Solar(solar) => sqlx::query(
                "INSERT INTO solar_schedule (event, latitude, longitude) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(solar.event.as_str())
            .bind(solar.latitude)
            .bind(solar.longitude),
            ScheduleKind::Clocked(clocked) => {
                sqlx::query("INSERT INTO clocked_schedule (clocked_time) VALUES ($1) RETURNING id")
                    .bind(clocked.clocked_time)
            }
        };

        let row = query.fetch_one(&mut *self.tx).await.map_err(storage_error)?;
        let id: i64 = row.try_get("id")?;

        debug!("写入{}调度定义: {}", schedule.kind(), id);
        Ok(id)
    }

    async fn delete_schedule(
        &mut self,
        schedule: &ScheduleKind,
        schedule_id: i64,
    ) -> SchedulerResult<()> {
        let sql = match schedule {
            ScheduleKind::Interval(_) => "DELETE FROM interval_schedule WHERE id = $1",
            ScheduleKind::Crontab(_) => "DELETE FROM crontab_schedule WHERE id = $1",
            ScheduleKind::Solar(_) => "DELETE FROM solar_schedule WHERE id = $1",
            ScheduleKind::Clocked(_) => "DELETE FROM clocked_schedule WHERE id = $1",
        };

        sqlx::query(sql)
            .bind(schedule_id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;

        debug!("删除{}调度定义: {}", schedule.kind(), schedule_id);
        Ok(())
    }

    async fn insert_periodic_task(&mut self, task: &PeriodicTask) -> SchedulerResult<i64> {
        let row = bind_periodic_task(sqlx::query(INSERT_PERIODIC_TASK), task)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| registry_error(e, &task.name, &task.task))?;
        let id: i64 = row.try_get("id")?;

        debug!("写入周期任务: {} ({})", task.name, id);
        Ok(id)
    }

    async fn update_periodic_task(&mut self, task: &PeriodicTask) -> SchedulerResult<()> {
        let result = bind_periodic_task(sqlx::query(UPDATE_PERIODIC_TASK), task)
            .bind(task.id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| registry_error(e, &task.name, &task.task))?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::PeriodicTaskNotFound { id: task.id });
        }

        debug!("更新周期任务: {} ({})", task.name, task.id);
        Ok(())
    }

    async fn delete_periodic_task(&mut self, id: i64) -> SchedulerResult<()> {
        let result = sqlx::query("DELETE FROM periodic_task WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::PeriodicTaskNotFound { id });
        }

        debug!("删除周期任务: {}", id);
        Ok(())
    }

    async fn record_run(&mut self, id: i64, run_at: DateTime<Utc>) -> SchedulerResult<()> {
        let result = sqlx::query(RECORD_RUN)
            .bind(run_at)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::PeriodicTaskNotFound { id });
        }
        Ok(())
    }

    async fn touch_beacon(&mut self, now: DateTime<Utc>) -> SchedulerResult<DateTime<Utc>> {
        // 比较在持有行锁的UPSERT内完成，并发写者提交后读到的是最新值
        let next = sqlx::query_scalar::<_, DateTime<Utc>>(ADVANCE_BEACON)
            .bind(advance_beacon(None, now))
            .fetch_one(&mut *self.tx)
            .await
            .map_err(storage_error)?;

        debug!("变更信标推进到: {}", next);
        Ok(next)
    }

    async fn commit(self: Box<Self>) -> SchedulerResult<()> {
        self.tx.commit().await.map_err(storage_error)
    }
}
