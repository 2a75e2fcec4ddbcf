use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::models::{PeriodicTask, ScheduleKind};
use scheduler_core::traits::{BeaconReader, RegistryStore, RegistryTransaction};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::advance_beacon;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct RegistryState {
    tasks: BTreeMap<i64, PeriodicTask>,
    schedules: BTreeMap<i64, ScheduleKind>,
    last_task_id: i64,
    last_schedule_id: i64,
    beacon: Option<DateTime<Utc>>,
}

impl RegistryState {
    fn check_unique(&self, task: &PeriodicTask) -> SchedulerResult<()> {
        for existing in self.tasks.values().filter(|t| t.id != task.id) {
            if existing.name == task.name {
                return Err(SchedulerError::conflict("name", &task.name));
            }
            if existing.task == task.task {
                return Err(SchedulerError::conflict("task", &task.task));
            }
        }
        Ok(())
    }
}

/// 内存注册表，同时实现变更信标读取
#[derive(Clone, Default)]
pub struct InMemoryRegistryStore {
    state: Arc<Mutex<RegistryState>>,
}

impl InMemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前保存的调度定义数量
    pub async fn schedule_count(&self) -> usize {
        self.state.lock().await.schedules.len()
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistryStore {
    async fn begin(&self) -> SchedulerResult<Box<dyn RegistryTransaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryRegistryTransaction { guard, working }))
    }

    async fn get(&self, id: i64) -> SchedulerResult<Option<PeriodicTask>> {
        Ok(self.state.lock().await.tasks.get(&id).cloned())
    }

    async fn list(&self) -> SchedulerResult<Vec<PeriodicTask>> {
        Ok(self.state.lock().await.tasks.values().cloned().collect())
    }

    async fn list_enabled(&self) -> SchedulerResult<Vec<PeriodicTask>> {
        let state = self.state.lock().await;
        Ok(state.tasks.values().filter(|t| t.enabled).cloned().collect())
    }
}

#[async_trait]
impl BeaconReader for InMemoryRegistryStore {
    async fn last_change(&self) -> SchedulerResult<Option<DateTime<Utc>>> {
        Ok(self.state.lock().await.beacon)
    }
}

pub struct InMemoryRegistryTransaction {
    guard: OwnedMutexGuard<RegistryState>,
    working: RegistryState,
}

#[async_trait]
impl RegistryTransaction for InMemoryRegistryTransaction {
    async fn find_by_id(&mut self, id: i64) -> SchedulerResult<Option<PeriodicTask>> {
        Ok(self.working.tasks.get(&id).cloned())
    }

    async fn find_id_by_name(&mut self, name: &str) -> SchedulerResult<Option<i64>> {
        Ok(self
            .working
            .tasks
            .values()
            .find(|t| t.name == name)
            .map(|t| t.id))
    }

    async fn find_id_by_task(&mut self, task: &str) -> SchedulerResult<Option<i64>> {
        Ok(self
            .working
            .tasks
            .values()
            .find(|t| t.task == task)
            .map(|t| t.id))
    }

    async fn insert_schedule(&mut self, schedule: &ScheduleKind) -> SchedulerResult<i64> {
        self.working.last_schedule_id += 1;
        let id = self.working.last_schedule_id;
        self.working.schedules.insert(id, schedule.clone());
        Ok(id)
    }

    async fn delete_schedule(
        &mut self,
        _schedule: &ScheduleKind,
        schedule_id: i64,
    ) -> SchedulerResult<()> {
        self.working.schedules.remove(&schedule_id);
        Ok(())
    }

    async fn insert_periodic_task(&mut self, task: &PeriodicTask) -> SchedulerResult<i64> {
        let mut task = task.clone();
        task.id = self.working.last_task_id + 1;
        self.working.check_unique(&task)?;

        self.working.last_task_id = task.id;
        let id = task.id;
        self.working.tasks.insert(id, task);
        Ok(id)
    }

    async fn update_periodic_task(&mut self, task: &PeriodicTask) -> SchedulerResult<()> {
        if !self.working.tasks.contains_key(&task.id) {
            return Err(SchedulerError::PeriodicTaskNotFound { id: task.id });
        }
        self.working.check_unique(task)?;
        self.working.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn delete_periodic_task(&mut self, id: i64) -> SchedulerResult<()> {
        self.working
            .tasks
            .remove(&id)
            .map(|_| ())
            .ok_or(SchedulerError::PeriodicTaskNotFound { id })
    }

    async fn record_run(&mut self, id: i64, run_at: DateTime<Utc>) -> SchedulerResult<()> {
        let task = self
            .working
            .tasks
            .get_mut(&id)
            .ok_or(SchedulerError::PeriodicTaskNotFound { id })?;

        task.last_run_at = Some(run_at);
        task.total_run_count += 1;
        if task.one_off {
            task.enabled = false;
        }
        Ok(())
    }

    async fn touch_beacon(&mut self, now: DateTime<Utc>) -> SchedulerResult<DateTime<Utc>> {
        let next = advance_beacon(self.working.beacon, now);
        self.working.beacon = Some(next);
        Ok(next)
    }

    async fn commit(self: Box<Self>) -> SchedulerResult<()> {
        let InMemoryRegistryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
