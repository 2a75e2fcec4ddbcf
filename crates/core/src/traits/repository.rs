//! 数据仓储层接口定义
//!
//! - [`RegistryStore`] / [`RegistryTransaction`]：周期任务、调度定义与变更信标。
//!   注册表的每次写操作都在一个事务内完成，实体变更与信标更新一起提交或一起回滚。
//! - [`BeaconReader`]：调度循环廉价轮询信标时间戳。
//! - [`ProjectionStore`] / [`ProjectionTransaction`]：任务/Worker投影的读-改-写事务。
//!
//! 事务对象在未调用 `commit` 就被丢弃时回滚。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{PeriodicTask, ScheduleKind, TaskProjection, WorkerProjection};
use crate::SchedulerResult;

/// 周期任务注册表存储
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// 开启一个写事务
    async fn begin(&self) -> SchedulerResult<Box<dyn RegistryTransaction>>;

    async fn get(&self, id: i64) -> SchedulerResult<Option<PeriodicTask>>;

    /// 按ID升序返回全部周期任务
    async fn list(&self) -> SchedulerResult<Vec<PeriodicTask>>;

    async fn list_enabled(&self) -> SchedulerResult<Vec<PeriodicTask>>;
}

/// 注册表写事务
#[async_trait]
pub trait RegistryTransaction: Send {
    async fn find_by_id(&mut self, id: i64) -> SchedulerResult<Option<PeriodicTask>>;

    /// 按名称查找周期任务ID，用于唯一性预检
    async fn find_id_by_name(&mut self, name: &str) -> SchedulerResult<Option<i64>>;

    /// 按任务标识查找周期任务ID，用于唯一性预检
    async fn find_id_by_task(&mut self, task: &str) -> SchedulerResult<Option<i64>>;

    /// 写入调度定义，返回其在对应类型表中的行ID
    async fn insert_schedule(&mut self, schedule: &ScheduleKind) -> SchedulerResult<i64>;

    async fn delete_schedule(&mut self, schedule: &ScheduleKind, schedule_id: i64)
        -> SchedulerResult<()>;

    /// 写入周期任务（忽略 `task.id`），返回新ID
    async fn insert_periodic_task(&mut self, task: &PeriodicTask) -> SchedulerResult<i64>;

    async fn update_periodic_task(&mut self, task: &PeriodicTask) -> SchedulerResult<()>;

    async fn delete_periodic_task(&mut self, id: i64) -> SchedulerResult<()>;

    /// 只写派发簿记列：`last_run_at`、运行计数加一、一次性任务置为禁用
    ///
    /// 不覆盖其他列，避免与并发的管理更新互相覆盖。
    async fn record_run(&mut self, id: i64, run_at: DateTime<Utc>) -> SchedulerResult<()>;

    /// 推进变更信标，返回写入的时间戳
    ///
    /// 写入值为 `max(now, 上次值 + 1µs)`，保证严格递增。
    async fn touch_beacon(&mut self, now: DateTime<Utc>) -> SchedulerResult<DateTime<Utc>>;

    async fn commit(self: Box<Self>) -> SchedulerResult<()>;
}

/// 变更信标读取
#[async_trait]
pub trait BeaconReader: Send + Sync {
    /// 信标最后更新时间，从未写入过时为None
    async fn last_change(&self) -> SchedulerResult<Option<DateTime<Utc>>>;
}

/// 投影存储
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    async fn begin(&self) -> SchedulerResult<Box<dyn ProjectionTransaction>>;

    async fn get_task(&self, uuid: &str) -> SchedulerResult<Option<TaskProjection>>;

    async fn get_worker(&self, hostname: &str) -> SchedulerResult<Option<WorkerProjection>>;

    async fn list_workers(&self) -> SchedulerResult<Vec<WorkerProjection>>;
}

/// 投影读-改-写事务
#[async_trait]
pub trait ProjectionTransaction: Send {
    async fn load_task(&mut self, uuid: &str) -> SchedulerResult<Option<TaskProjection>>;

    /// 按hostname解析Worker行ID
    async fn find_worker_id(&mut self, hostname: &str) -> SchedulerResult<Option<i64>>;

    /// `exists` 为false时插入，否则按uuid更新
    async fn save_task(&mut self, task: &TaskProjection, exists: bool) -> SchedulerResult<()>;

    async fn load_worker(&mut self, hostname: &str) -> SchedulerResult<Option<WorkerProjection>>;

    /// `worker.id` 为None时插入，否则按hostname更新
    async fn save_worker(&mut self, worker: &WorkerProjection) -> SchedulerResult<()>;

    async fn commit(self: Box<Self>) -> SchedulerResult<()>;
}
