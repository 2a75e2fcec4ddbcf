//! 投影的字段级LWW合并
//!
//! 每个字段记录最后一次写入的 `(clock, timestamp)`。事件只携带本阶段相关的字段，
//! 合并是在已有投影上做字段并集：只有写入戳严格更大的事件才能覆盖字段，
//! 戳相等时保留已有值，因此重复投递同一事件不会产生任何变化。
//! 排序只看事件自带的逻辑时钟和时间戳，与到达顺序无关。

use chrono::{DateTime, Utc};

use scheduler_core::models::{
    FieldClocks, FieldStamp, TaskEvent, TaskEventType, TaskProjection, WorkerEvent,
    WorkerProjection,
};

/// 一次合并的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// 是否有字段被写入，为false时不需要持久化
    pub changed: bool,
    /// 因写入戳不够新而被忽略的字段
    pub stale_fields: Vec<&'static str>,
}

struct Merger<'a> {
    stamp: FieldStamp,
    clocks: &'a mut FieldClocks,
    outcome: MergeOutcome,
}

impl<'a> Merger<'a> {
    fn new(stamp: FieldStamp, clocks: &'a mut FieldClocks) -> Self {
        Self {
            stamp,
            clocks,
            outcome: MergeOutcome::default(),
        }
    }

    fn accept(&mut self, field: &'static str) -> bool {
        match self.clocks.get(field) {
            Some(existing) if *existing >= self.stamp => {
                self.outcome.stale_fields.push(field);
                false
            }
            _ => {
                self.clocks.insert(field.to_string(), self.stamp);
                self.outcome.changed = true;
                true
            }
        }
    }

    fn set<T>(&mut self, field: &'static str, slot: &mut T, value: T) {
        if self.accept(field) {
            *slot = value;
        }
    }

    /// 事件未携带该字段时不做任何事
    fn merge<T>(&mut self, field: &'static str, slot: &mut Option<T>, incoming: Option<T>) {
        if let Some(value) = incoming {
            self.set(field, slot, Some(value));
        }
    }

    fn finish(self) -> MergeOutcome {
        self.outcome
    }
}

/// 事件对应的阶段时间字段
fn phase_field(
    event_type: TaskEventType,
    task: &mut TaskProjection,
) -> (&'static str, &mut Option<DateTime<Utc>>) {
    match event_type {
        TaskEventType::Sent => ("sent", &mut task.sent),
        TaskEventType::Received => ("received", &mut task.received),
        TaskEventType::Started => ("started", &mut task.started),
        TaskEventType::Succeeded => ("succeeded", &mut task.succeeded),
        TaskEventType::Failed => ("failed", &mut task.failed),
        TaskEventType::Rejected => ("rejected", &mut task.rejected),
        TaskEventType::Revoked => ("revoked", &mut task.revoked),
        TaskEventType::Retried => ("retried", &mut task.retried),
    }
}

/// 将任务事件合并到投影上，不存在时以空投影为起点
///
/// `worker_id` 为按hostname解析出的Worker行ID，解析不到时不覆盖已有关联。
pub fn merge_task_event(
    existing: Option<TaskProjection>,
    event: &TaskEvent,
    worker_id: Option<i64>,
) -> (TaskProjection, MergeOutcome) {
    let mut task = existing.unwrap_or_else(|| TaskProjection::new(event.uuid.clone()));
    let mut clocks = std::mem::take(&mut task.field_clocks);
    let mut merger = Merger::new(FieldStamp::new(event.clock, event.timestamp), &mut clocks);

    merger.set("state", &mut task.state, event.event_type.state());
    merger.set("clock", &mut task.clock, Some(event.clock));
    merger.set("timestamp", &mut task.timestamp, Some(event.timestamp));
    merger.set(
        "type",
        &mut task.event_type,
        Some(event.event_type.as_str().to_string()),
    );
    let (phase, slot) = phase_field(event.event_type, &mut task);
    merger.set(phase, slot, Some(event.timestamp));

    let e = event.clone();
    merger.merge("name", &mut task.name, e.name);
    merger.merge("args", &mut task.args, e.args);
    merger.merge("kwargs", &mut task.kwargs, e.kwargs);
    merger.merge("result", &mut task.result, e.result);
    merger.merge("eta", &mut task.eta, e.eta);
    merger.merge("expires", &mut task.expires, e.expires);
    merger.merge("hostname", &mut task.hostname, e.hostname);
    merger.merge("client", &mut task.client, e.client);
    merger.merge("exchange", &mut task.exchange, e.exchange);
    merger.merge("queue", &mut task.queue, e.queue);
    merger.merge("routing_key", &mut task.routing_key, e.routing_key);
    merger.merge("parent_id", &mut task.parent_id, e.parent_id);
    merger.merge("root_id", &mut task.root_id, e.root_id);
    merger.merge("retries", &mut task.retries, e.retries);
    merger.merge("runtime", &mut task.runtime, e.runtime);
    merger.merge("exception", &mut task.exception, e.exception);
    merger.merge("traceback", &mut task.traceback, e.traceback);
    merger.merge("pid", &mut task.pid, e.pid);
    merger.merge("requeue", &mut task.requeue, e.requeue);
    merger.merge("utcoffset", &mut task.utcoffset, e.utcoffset);
    merger.merge("worker_id", &mut task.worker_id, worker_id);

    let outcome = merger.finish();
    task.field_clocks = clocks;
    (task, outcome)
}

/// 将Worker事件合并到投影上
///
/// `worker-offline` 把alive置为false，其余事件置为true；计数等字段只在事件携带时更新。
pub fn merge_worker_event(
    existing: Option<WorkerProjection>,
    event: &WorkerEvent,
) -> (WorkerProjection, MergeOutcome) {
    let mut worker = existing.unwrap_or_else(|| WorkerProjection::new(event.hostname.clone()));
    let mut clocks = std::mem::take(&mut worker.field_clocks);
    let mut merger = Merger::new(FieldStamp::new(event.clock, event.timestamp), &mut clocks);

    merger.set("alive", &mut worker.alive, event.event_type.alive());
    merger.set("clock", &mut worker.clock, Some(event.clock));
    merger.set("timestamp", &mut worker.timestamp, Some(event.timestamp));
    merger.set(
        "type",
        &mut worker.event_type,
        Some(event.event_type.as_str().to_string()),
    );

    let e = event.clone();
    merger.merge("freq", &mut worker.freq, e.freq);
    merger.merge("active", &mut worker.active, e.active);
    merger.merge("processed", &mut worker.processed, e.processed);
    merger.merge("sw_ident", &mut worker.sw_ident, e.sw_ident);
    merger.merge("sw_ver", &mut worker.sw_ver, e.sw_ver);
    merger.merge("sw_sys", &mut worker.sw_sys, e.sw_sys);
    merger.merge("pid", &mut worker.pid, e.pid);
    merger.merge("utcoffset", &mut worker.utcoffset, e.utcoffset);

    let outcome = merger.finish();
    worker.field_clocks = clocks;
    (worker, outcome)
}
