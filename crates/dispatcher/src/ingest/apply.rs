//! 单个事件的读-改-写
//!
//! 每次应用是一个投影事务：读出已有投影，做字段级LWW合并，有变化才写回。
//! 瞬时写入冲突按配置的次数重试，退避时间随尝试次数线性增长并带随机抖动。

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use scheduler_core::models::{LifecycleEvent, TaskEvent, WorkerEvent};
use scheduler_core::traits::ProjectionStore;
use scheduler_core::SchedulerResult;
use scheduler_domain::{merge_task_event, merge_worker_event};

#[derive(Clone)]
pub struct EventApplier {
    store: Arc<dyn ProjectionStore>,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl EventApplier {
    pub fn new(store: Arc<dyn ProjectionStore>, max_attempts: u32, retry_backoff: Duration) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
            retry_backoff,
        }
    }

    /// 应用事件，返回投影是否发生变化
    pub async fn apply(&self, event: &LifecycleEvent) -> SchedulerResult<bool> {
        let mut attempt = 1;
        loop {
            match self.apply_once(event).await {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    metrics::counter!("ingest_apply_retries_total").increment(1);
                    let delay = self.backoff(attempt);
                    warn!(
                        "应用事件 {} ({}) 写入冲突，第 {} 次重试，等待 {:?}: {}",
                        event.type_name(),
                        event.key(),
                        attempt,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.retry_backoff * attempt;
        let jitter_ms = self.retry_backoff.as_millis() as u64 / 2;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    async fn apply_once(&self, event: &LifecycleEvent) -> SchedulerResult<bool> {
        match event {
            LifecycleEvent::Task(event) => self.apply_task(event).await,
            LifecycleEvent::Worker(event) => self.apply_worker(event).await,
        }
    }

    async fn apply_task(&self, event: &TaskEvent) -> SchedulerResult<bool> {
        let mut tx = self.store.begin().await?;
        let existing = tx.load_task(&event.uuid).await?;
        let exists = existing.is_some();

        let worker_id = match event.hostname.as_deref() {
            Some(hostname) => tx.find_worker_id(hostname).await?,
            None => None,
        };

        let (task, outcome) = merge_task_event(existing, event, worker_id);
        if !outcome.stale_fields.is_empty() {
            debug!(
                "任务 {} 事件 {} (clock={}) 过期字段被忽略: {:?}",
                event.uuid,
                event.event_type.as_str(),
                event.clock,
                outcome.stale_fields
            );
        }
        if !outcome.changed {
            return Ok(false);
        }

        tx.save_task(&task, exists).await?;
        tx.commit().await?;

        debug!("任务 {} 投影更新: {}", task.uuid, task.state);
        Ok(true)
    }

    async fn apply_worker(&self, event: &WorkerEvent) -> SchedulerResult<bool> {
        let mut tx = self.store.begin().await?;
        let existing = tx.load_worker(&event.hostname).await?;

        let (worker, outcome) = merge_worker_event(existing, event);
        if !outcome.stale_fields.is_empty() {
            debug!(
                "Worker {} 事件 {} (clock={}) 过期字段被忽略: {:?}",
                event.hostname,
                event.event_type.as_str(),
                event.clock,
                outcome.stale_fields
            );
        }
        if !outcome.changed {
            return Ok(false);
        }

        tx.save_worker(&worker).await?;
        tx.commit().await?;

        debug!("Worker {} 投影更新: alive={}", worker.hostname, worker.alive);
        Ok(true)
    }
}
