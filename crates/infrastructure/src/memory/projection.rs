use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use scheduler_core::models::{TaskProjection, WorkerProjection};
use scheduler_core::traits::{ProjectionStore, ProjectionTransaction};
use scheduler_core::SchedulerResult;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct ProjectionState {
    tasks: HashMap<String, TaskProjection>,
    workers: BTreeMap<String, WorkerProjection>,
    last_worker_id: i64,
}

#[derive(Clone, Default)]
pub struct InMemoryProjectionStore {
    state: Arc<Mutex<ProjectionState>>,
}

impl InMemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn task_count(&self) -> usize {
        self.state.lock().await.tasks.len()
    }
}

#[async_trait]
impl ProjectionStore for InMemoryProjectionStore {
    async fn begin(&self) -> SchedulerResult<Box<dyn ProjectionTransaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryProjectionTransaction { guard, working }))
    }

    async fn get_task(&self, uuid: &str) -> SchedulerResult<Option<TaskProjection>> {
        Ok(self.state.lock().await.tasks.get(uuid).cloned())
    }

    async fn get_worker(&self, hostname: &str) -> SchedulerResult<Option<WorkerProjection>> {
        Ok(self.state.lock().await.workers.get(hostname).cloned())
    }

    async fn list_workers(&self) -> SchedulerResult<Vec<WorkerProjection>> {
        Ok(self.state.lock().await.workers.values().cloned().collect())
    }
}

pub struct InMemoryProjectionTransaction {
    guard: OwnedMutexGuard<ProjectionState>,
    working: ProjectionState,
}

#[async_trait]
impl ProjectionTransaction for InMemoryProjectionTransaction {
    async fn load_task(&mut self, uuid: &str) -> SchedulerResult<Option<TaskProjection>> {
        Ok(self.working.tasks.get(uuid).cloned())
    }

    async fn find_worker_id(&mut self, hostname: &str) -> SchedulerResult<Option<i64>> {
        Ok(self.working.workers.get(hostname).and_then(|w| w.id))
    }

    async fn save_task(&mut self, task: &TaskProjection, _exists: bool) -> SchedulerResult<()> {
        self.working.tasks.insert(task.uuid.clone(), task.clone());
        Ok(())
    }

    async fn load_worker(&mut self, hostname: &str) -> SchedulerResult<Option<WorkerProjection>> {
        Ok(self.working.workers.get(hostname).cloned())
    }

    async fn save_worker(&mut self, worker: &WorkerProjection) -> SchedulerResult<()> {
        let mut worker = worker.clone();
        if worker.id.is_none() {
            self.working.last_worker_id += 1;
            worker.id = Some(self.working.last_worker_id);
        }
        self.working.workers.insert(worker.hostname.clone(), worker);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> SchedulerResult<()> {
        let InMemoryProjectionTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
