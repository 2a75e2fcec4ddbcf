//! 周期任务注册表
//!
//! 创建、更新、删除都在一个存储事务内完成：先完整校验，再写调度定义与任务行，
//! 最后在同一事务内推进变更信标（任务 `no_changes` 为true时跳过）。
//! 任何一步失败，事务对象被丢弃即回滚，不会留下部分写入。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use scheduler_core::models::{PeriodicTask, PeriodicTaskPatch, PeriodicTaskSpec};
use scheduler_core::traits::{RegistryStore, RegistryTransaction};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{
    apply_patch, build_schedule, new_periodic_task, Schedule, ScheduleState,
};

/// 禁用任务的重新检查间隔
const DISABLED_RECHECK_SECONDS: i64 = 5;

pub struct PeriodicTaskRegistry {
    store: Arc<dyn RegistryStore>,
}

impl PeriodicTaskRegistry {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { store }
    }

    async fn check_unique(
        tx: &mut dyn RegistryTransaction,
        task: &PeriodicTask,
    ) -> SchedulerResult<()> {
        if let Some(id) = tx.find_id_by_name(&task.name).await? {
            if id != task.id {
                return Err(SchedulerError::conflict("name", &task.name));
            }
        }
        if let Some(id) = tx.find_id_by_task(&task.task).await? {
            if id != task.id {
                return Err(SchedulerError::conflict("task", &task.task));
            }
        }
        Ok(())
    }

    async fn load(tx: &mut dyn RegistryTransaction, id: i64) -> SchedulerResult<PeriodicTask> {
        tx.find_by_id(id)
            .await?
            .ok_or(SchedulerError::PeriodicTaskNotFound { id })
    }

    pub async fn create(&self, spec: PeriodicTaskSpec) -> SchedulerResult<PeriodicTask> {
        let now = Utc::now();
        let mut task = new_periodic_task(spec, now)?;

        let mut tx = self.store.begin().await?;
        Self::check_unique(tx.as_mut(), &task).await?;

        task.schedule_id = tx.insert_schedule(&task.schedule).await?;
        task.id = tx.insert_periodic_task(&task).await?;
        if !task.no_changes {
            tx.touch_beacon(now).await?;
        }
        tx.commit().await?;

        info!("创建周期任务: {} ({}) [{}]", task.name, task.id, task.schedule);
        Ok(task)
    }

    pub async fn update(&self, id: i64, patch: PeriodicTaskPatch) -> SchedulerResult<PeriodicTask> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let existing = Self::load(tx.as_mut(), id).await?;

        let mut task = apply_patch(&existing, patch, now)?;
        Self::check_unique(tx.as_mut(), &task).await?;

        if task.schedule != existing.schedule {
            task.schedule_id = tx.insert_schedule(&task.schedule).await?;
            tx.update_periodic_task(&task).await?;
            tx.delete_schedule(&existing.schedule, existing.schedule_id)
                .await?;
            debug!(
                "周期任务 {} 调度替换: {} -> {}",
                id, existing.schedule, task.schedule
            );
        } else {
            tx.update_periodic_task(&task).await?;
        }

        if !task.no_changes {
            tx.touch_beacon(now).await?;
        }
        tx.commit().await?;

        info!("更新周期任务: {} ({})", task.name, task.id);
        Ok(task)
    }

    pub async fn delete(&self, id: i64) -> SchedulerResult<()> {
        let mut tx = self.store.begin().await?;
        let existing = Self::load(tx.as_mut(), id).await?;

        tx.delete_periodic_task(id).await?;
        tx.delete_schedule(&existing.schedule, existing.schedule_id)
            .await?;
        if !existing.no_changes {
            tx.touch_beacon(Utc::now()).await?;
        }
        tx.commit().await?;

        info!("删除周期任务: {} ({})", existing.name, id);
        Ok(())
    }

    pub async fn get(&self, id: i64) -> SchedulerResult<Option<PeriodicTask>> {
        self.store.get(id).await
    }

    pub async fn list(&self) -> SchedulerResult<Vec<PeriodicTask>> {
        self.store.list().await
    }

    pub async fn list_enabled(&self) -> SchedulerResult<Vec<PeriodicTask>> {
        self.store.list_enabled().await
    }

    /// 记录一次派发：更新 `last_run_at` 与运行计数，一次性任务随之禁用
    ///
    /// 属于派发簿记，不推进变更信标。
    pub async fn record_run(
        &self,
        id: i64,
        run_at: DateTime<Utc>,
    ) -> SchedulerResult<PeriodicTask> {
        let mut tx = self.store.begin().await?;
        tx.record_run(id, run_at).await?;
        let task = Self::load(tx.as_mut(), id).await?;
        tx.commit().await?;

        debug!(
            "周期任务 {} 第 {} 次运行: {}",
            task.name, task.total_run_count, run_at
        );
        Ok(task)
    }

    /// 任务当前生效的调度求值器
    pub fn get_schedule(&self, task: &PeriodicTask) -> SchedulerResult<Box<dyn Schedule>> {
        build_schedule(&task.schedule)
    }

    /// 派发循环使用的到期判断
    pub fn due_status(
        &self,
        task: &PeriodicTask,
        now: DateTime<Utc>,
    ) -> SchedulerResult<ScheduleState> {
        if !task.enabled {
            return Ok(ScheduleState::not_due(Duration::seconds(
                DISABLED_RECHECK_SECONDS,
            )));
        }

        if let Some(start_time) = task.start_time {
            if start_time > now {
                return Ok(ScheduleState::not_due(start_time - now));
            }
        }

        if task.expires_at().is_some_and(|expires| expires <= now) {
            debug!("周期任务 {} 已过期", task.name);
            return Ok(ScheduleState::never());
        }

        if task.one_off && task.total_run_count > 0 {
            return Ok(ScheduleState::never());
        }

        let schedule = self.get_schedule(task)?;
        Ok(schedule.remaining(task.last_run_at, now))
    }
}
