//! 数据库行与领域模型之间的映射
//!
//! 行结构通过 `sqlx::FromRow` 派生，SQLite与PostgreSQL共用同一套映射。

use chrono::{DateTime, Utc};
use sqlx::types::Json;

use scheduler_core::models::{
    ClockedSchedule, CrontabSchedule, FieldClocks, IntervalPeriod, IntervalSchedule,
    PeriodicTask, ScheduleKind, SolarEvent, SolarSchedule, TaskProjection, TaskState,
    WorkerProjection,
};
use scheduler_core::{SchedulerError, SchedulerResult};

/// 周期任务查询，左连接四张调度表
pub const SELECT_PERIODIC_TASK: &str = r#"
    SELECT pt.id, pt.name, pt.task, pt.args, pt.kwargs, pt.queue, pt.exchange, pt.routing_key,
           pt.headers, pt.priority, pt.expires, pt.expire_seconds, pt.one_off, pt.start_time,
           pt.enabled, pt.last_run_at, pt.total_run_count, pt.date_changed, pt.description,
           pt.no_changes, pt.interval_id, pt.crontab_id, pt.solar_id, pt.clocked_id,
           i.every, i.period,
           c.minute, c.hour, c.day_of_week, c.day_of_month, c.month_of_year, c.timezone,
           s.event, s.latitude, s.longitude,
           k.clocked_time
    FROM periodic_task pt
    LEFT JOIN interval_schedule i ON pt.interval_id = i.id
    LEFT JOIN crontab_schedule c ON pt.crontab_id = c.id
    LEFT JOIN solar_schedule s ON pt.solar_id = s.id
    LEFT JOIN clocked_schedule k ON pt.clocked_id = k.id
"#;

/// 插入与更新共用同一绑定顺序：$1..$19 为任务字段，$20..$23 为调度外键
pub const INSERT_PERIODIC_TASK: &str = r#"
    INSERT INTO periodic_task (
        name, task, args, kwargs, queue, exchange, routing_key, headers, priority,
        expires, expire_seconds, one_off, start_time, enabled, last_run_at,
        total_run_count, date_changed, description, no_changes,
        interval_id, crontab_id, solar_id, clocked_id
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
        $19, $20, $21, $22, $23
    )
    RETURNING id
"#;

pub const UPDATE_PERIODIC_TASK: &str = r#"
    UPDATE periodic_task
    SET name = $1, task = $2, args = $3, kwargs = $4, queue = $5, exchange = $6,
        routing_key = $7, headers = $8, priority = $9, expires = $10, expire_seconds = $11,
        one_off = $12, start_time = $13, enabled = $14, last_run_at = $15,
        total_run_count = $16, date_changed = $17, description = $18, no_changes = $19,
        interval_id = $20, crontab_id = $21, solar_id = $22, clocked_id = $23
    WHERE id = $24
"#;

pub const TASK_COLUMNS: &str = "uuid, name, state, args, kwargs, result, eta, expires, hostname, \
    client, exchange, queue, routing_key, parent_id, root_id, retries, runtime, exception, \
    traceback, pid, requeue, utcoffset, sent, received, started, succeeded, failed, revoked, \
    rejected, retried, clock, timestamp, type, worker_id, field_clocks";

pub const WORKER_COLUMNS: &str = "id, hostname, freq, clock, alive, active, processed, sw_ident, \
    sw_ver, sw_sys, pid, timestamp, type, utcoffset, field_clocks";

/// 任务投影写入：插入与按uuid更新使用相同的参数顺序
pub const INSERT_TASK: &str = r#"
    INSERT INTO task (
        uuid, name, state, args, kwargs, result, eta, expires, hostname, client, exchange,
        queue, routing_key, parent_id, root_id, retries, runtime, exception, traceback, pid,
        requeue, utcoffset, sent, received, started, succeeded, failed, revoked, rejected,
        retried, clock, timestamp, type, worker_id, field_clocks
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
        $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33, $34, $35
    )
"#;

pub const UPDATE_TASK: &str = r#"
    UPDATE task
    SET name = $2, state = $3, args = $4, kwargs = $5, result = $6, eta = $7, expires = $8,
        hostname = $9, client = $10, exchange = $11, queue = $12, routing_key = $13,
        parent_id = $14, root_id = $15, retries = $16, runtime = $17, exception = $18,
        traceback = $19, pid = $20, requeue = $21, utcoffset = $22, sent = $23,
        received = $24, started = $25, succeeded = $26, failed = $27, revoked = $28,
        rejected = $29, retried = $30, clock = $31, timestamp = $32, type = $33,
        worker_id = $34, field_clocks = $35
    WHERE uuid = $1
"#;

/// Worker投影写入：插入与按hostname更新使用相同的参数顺序
pub const INSERT_WORKER: &str = r#"
    INSERT INTO worker (
        hostname, freq, clock, alive, active, processed, sw_ident, sw_ver, sw_sys, pid,
        timestamp, type, utcoffset, field_clocks
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
"#;

pub const UPDATE_WORKER: &str = r#"
    UPDATE worker
    SET freq = $2, clock = $3, alive = $4, active = $5, processed = $6, sw_ident = $7,
        sw_ver = $8, sw_sys = $9, pid = $10, timestamp = $11, type = $12, utcoffset = $13,
        field_clocks = $14
    WHERE hostname = $1
"#;

pub const SELECT_BEACON: &str = "SELECT last_update FROM periodic_tasks_changed WHERE id = 1";

pub const UPSERT_BEACON: &str = r#"
    INSERT INTO periodic_tasks_changed (id, last_update) VALUES (1, $1)
    ON CONFLICT (id) DO UPDATE SET last_update = excluded.last_update
"#;

/// 派发簿记只改这三列，一次性任务在同一语句中禁用
pub const RECORD_RUN: &str = r#"
    UPDATE periodic_task
    SET last_run_at = $1,
        total_run_count = total_run_count + 1,
        enabled = CASE WHEN one_off THEN FALSE ELSE enabled END
    WHERE id = $2
"#;

/// 调度外键列，按 interval / crontab / solar / clocked 顺序
pub fn schedule_foreign_keys(task: &PeriodicTask) -> [Option<i64>; 4] {
    let id = Some(task.schedule_id);
    match task.schedule {
        ScheduleKind::Interval(_) => [id, None, None, None],
        ScheduleKind::Crontab(_) => [None, id, None, None],
        ScheduleKind::Solar(_) => [None, None, id, None],
        ScheduleKind::Clocked(_) => [None, None, None, id],
    }
}

fn corrupt(id: i64, message: impl Into<String>) -> SchedulerError {
    SchedulerError::Internal(format!("周期任务 {id} 数据损坏: {}", message.into()))
}

#[derive(Debug, sqlx::FromRow)]
pub struct PeriodicTaskRow {
    pub id: i64,
    pub name: String,
    pub task: String,
    pub args: Json<serde_json::Value>,
    pub kwargs: Json<serde_json::Value>,
    pub queue: Option<String>,
    pub exchange: Option<String>,
    pub routing_key: Option<String>,
    pub headers: Json<serde_json::Value>,
    pub priority: Option<i32>,
    pub expires: Option<DateTime<Utc>>,
    pub expire_seconds: Option<i64>,
    pub one_off: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub total_run_count: i64,
    pub date_changed: DateTime<Utc>,
    pub description: String,
    pub no_changes: bool,
    pub interval_id: Option<i64>,
    pub crontab_id: Option<i64>,
    pub solar_id: Option<i64>,
    pub clocked_id: Option<i64>,
    pub every: Option<i64>,
    pub period: Option<String>,
    pub minute: Option<String>,
    pub hour: Option<String>,
    pub day_of_week: Option<String>,
    pub day_of_month: Option<String>,
    pub month_of_year: Option<String>,
    pub timezone: Option<String>,
    pub event: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub clocked_time: Option<DateTime<Utc>>,
}

impl TryFrom<PeriodicTaskRow> for PeriodicTask {
    type Error = SchedulerError;

    fn try_from(row: PeriodicTaskRow) -> SchedulerResult<Self> {
        let id = row.id;

        let interval = match (row.interval_id, row.every, row.period.as_deref()) {
            (Some(_), Some(every), Some(period)) => Some(IntervalSchedule {
                every,
                period: period.parse::<IntervalPeriod>()?,
            }),
            (Some(_), _, _) => return Err(corrupt(id, "interval_schedule 行缺失")),
            _ => None,
        };

        let crontab = match row.crontab_id {
            Some(_) => Some(CrontabSchedule {
                minute: row.minute.ok_or_else(|| corrupt(id, "crontab_schedule 行缺失"))?,
                hour: row.hour.unwrap_or_else(|| "*".to_string()),
                day_of_week: row.day_of_week.unwrap_or_else(|| "*".to_string()),
                day_of_month: row.day_of_month.unwrap_or_else(|| "*".to_string()),
                month_of_year: row.month_of_year.unwrap_or_else(|| "*".to_string()),
                timezone: row.timezone.unwrap_or_else(|| "UTC".to_string()),
            }),
            None => None,
        };

        let solar = match (row.solar_id, row.event.as_deref(), row.latitude, row.longitude) {
            (Some(_), Some(event), Some(latitude), Some(longitude)) => Some(SolarSchedule {
                event: event.parse::<SolarEvent>()?,
                latitude,
                longitude,
            }),
            (Some(_), _, _, _) => return Err(corrupt(id, "solar_schedule 行缺失")),
            _ => None,
        };

        let clocked = match (row.clocked_id, row.clocked_time) {
            (Some(_), Some(clocked_time)) => Some(ClockedSchedule { clocked_time }),
            (Some(_), None) => return Err(corrupt(id, "clocked_schedule 行缺失")),
            _ => None,
        };

        let schedule_id = row
            .interval_id
            .or(row.crontab_id)
            .or(row.solar_id)
            .or(row.clocked_id)
            .ok_or_else(|| corrupt(id, "未绑定调度"))?;
        let schedule = ScheduleKind::from_parts(interval, crontab, solar, clocked)?;

        Ok(PeriodicTask {
            id,
            name: row.name,
            task: row.task,
            args: row.args.0,
            kwargs: row.kwargs.0,
            queue: row.queue,
            exchange: row.exchange,
            routing_key: row.routing_key,
            headers: row.headers.0,
            priority: row.priority,
            expires: row.expires,
            expire_seconds: row.expire_seconds,
            one_off: row.one_off,
            start_time: row.start_time,
            enabled: row.enabled,
            last_run_at: row.last_run_at,
            total_run_count: row.total_run_count,
            date_changed: row.date_changed,
            description: row.description,
            no_changes: row.no_changes,
            schedule,
            schedule_id,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct TaskRow {
    pub uuid: String,
    pub name: Option<String>,
    pub state: String,
    pub args: Option<Json<serde_json::Value>>,
    pub kwargs: Option<Json<serde_json::Value>>,
    pub result: Option<Json<serde_json::Value>>,
    pub eta: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub hostname: Option<String>,
    pub client: Option<String>,
    pub exchange: Option<String>,
    pub queue: Option<String>,
    pub routing_key: Option<String>,
    pub parent_id: Option<String>,
    pub root_id: Option<String>,
    pub retries: Option<i64>,
    pub runtime: Option<f64>,
    pub exception: Option<String>,
    pub traceback: Option<String>,
    pub pid: Option<i64>,
    pub requeue: Option<bool>,
    pub utcoffset: Option<i64>,
    pub sent: Option<DateTime<Utc>>,
    pub received: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub succeeded: Option<DateTime<Utc>>,
    pub failed: Option<DateTime<Utc>>,
    pub revoked: Option<DateTime<Utc>>,
    pub rejected: Option<DateTime<Utc>>,
    pub retried: Option<DateTime<Utc>>,
    pub clock: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
    #[sqlx(rename = "type")]
    pub event_type: Option<String>,
    pub worker_id: Option<i64>,
    pub field_clocks: Json<FieldClocks>,
}

impl TryFrom<TaskRow> for TaskProjection {
    type Error = SchedulerError;

    fn try_from(row: TaskRow) -> SchedulerResult<Self> {
        Ok(TaskProjection {
            uuid: row.uuid,
            name: row.name,
            state: row.state.parse::<TaskState>()?,
            args: row.args.map(|json| json.0),
            kwargs: row.kwargs.map(|json| json.0),
            result: row.result.map(|json| json.0),
            eta: row.eta,
            expires: row.expires,
            hostname: row.hostname,
            client: row.client,
            exchange: row.exchange,
            queue: row.queue,
            routing_key: row.routing_key,
            parent_id: row.parent_id,
            root_id: row.root_id,
            retries: row.retries,
            runtime: row.runtime,
            exception: row.exception,
            traceback: row.traceback,
            pid: row.pid,
            requeue: row.requeue,
            utcoffset: row.utcoffset,
            sent: row.sent,
            received: row.received,
            started: row.started,
            succeeded: row.succeeded,
            failed: row.failed,
            revoked: row.revoked,
            rejected: row.rejected,
            retried: row.retried,
            clock: row.clock,
            timestamp: row.timestamp,
            event_type: row.event_type,
            worker_id: row.worker_id,
            field_clocks: row.field_clocks.0,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct WorkerRow {
    pub id: i64,
    pub hostname: String,
    pub freq: Option<f64>,
    pub clock: Option<i64>,
    pub alive: bool,
    pub active: Option<i64>,
    pub processed: Option<i64>,
    pub sw_ident: Option<String>,
    pub sw_ver: Option<String>,
    pub sw_sys: Option<String>,
    pub pid: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
    #[sqlx(rename = "type")]
    pub event_type: Option<String>,
    pub utcoffset: Option<i64>,
    pub field_clocks: Json<FieldClocks>,
}

impl From<WorkerRow> for WorkerProjection {
    fn from(row: WorkerRow) -> Self {
        WorkerProjection {
            id: Some(row.id),
            hostname: row.hostname,
            freq: row.freq,
            clock: row.clock,
            alive: row.alive,
            active: row.active,
            processed: row.processed,
            sw_ident: row.sw_ident,
            sw_ver: row.sw_ver,
            sw_sys: row.sw_sys,
            pid: row.pid,
            timestamp: row.timestamp,
            event_type: row.event_type,
            utcoffset: row.utcoffset,
            field_clocks: row.field_clocks.0,
        }
    }
}
