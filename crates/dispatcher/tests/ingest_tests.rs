use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scheduler_core::config::{DatabaseConfig, IngestConfig};
use scheduler_core::models::{TaskProjection, TaskState, WorkerProjection};
use scheduler_core::traits::{EventSource, ProjectionStore, ProjectionTransaction};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_dispatcher::IngestPipeline;
use scheduler_infrastructure::{ChannelEventSource, DatabaseManager, InMemoryProjectionStore};
use serde_json::{json, Value};
use tokio::sync::broadcast;

fn ingest_config(partitions: usize) -> IngestConfig {
    IngestConfig {
        partitions,
        channel_capacity: 16,
        max_apply_attempts: 3,
        retry_backoff_ms: 1,
        shutdown_timeout_seconds: 5,
    }
}

async fn sqlite_store() -> Arc<dyn ProjectionStore> {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        ..DatabaseConfig::default()
    };
    let manager = DatabaseManager::new(&config).await.unwrap();
    manager.migrate().await.unwrap();
    manager.projection_store()
}

async fn backends() -> Vec<(&'static str, Arc<dyn ProjectionStore>)> {
    vec![
        ("sqlite", sqlite_store().await),
        ("memory", Arc::new(InMemoryProjectionStore::new())),
    ]
}

/// 把事件全部送入通道后关闭发送端，管道读到结尾自然停止
async fn run_events(
    store: Arc<dyn ProjectionStore>,
    partitions: usize,
    events: &[Value],
) -> scheduler_dispatcher::IngestStats {
    let (source, sender) = ChannelEventSource::new(events.len().max(1));
    for event in events {
        sender.send_json(event).await.unwrap();
    }
    drop(sender);

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let pipeline = IngestPipeline::new(ingest_config(partitions), store);
    pipeline.run(Box::new(source), shutdown_rx).await.unwrap()
}

async fn task(store: &Arc<dyn ProjectionStore>, uuid: &str) -> TaskProjection {
    store.get_task(uuid).await.unwrap().unwrap()
}

async fn worker(store: &Arc<dyn ProjectionStore>, hostname: &str) -> WorkerProjection {
    store.get_worker(hostname).await.unwrap().unwrap()
}

fn lifecycle_events() -> Vec<Value> {
    vec![
        json!({"type": "task-sent", "uuid": "U", "clock": 1, "timestamp": 1714550400.0,
               "name": "tasks.add", "args": [40, 2], "kwargs": {}, "queue": "celery"}),
        json!({"type": "task-received", "uuid": "U", "clock": 2, "timestamp": 1714550401.0,
               "hostname": "celery@w1", "retries": 0}),
        json!({"type": "task-started", "uuid": "U", "clock": 3, "timestamp": 1714550402.0,
               "hostname": "celery@w1", "pid": 4242}),
        json!({"type": "task-succeeded", "uuid": "U", "clock": 4, "timestamp": 1714550403.5,
               "result": "42", "runtime": 1.23}),
    ]
}

#[tokio::test]
async fn test_task_lifecycle_accumulates_fields() {
    for (label, store) in backends().await {
        let stats = run_events(store.clone(), 4, &lifecycle_events()).await;
        assert_eq!(stats.received, 4, "{label}");
        assert_eq!(stats.applied, 4, "{label}");

        let projection = task(&store, "U").await;
        assert_eq!(projection.state, TaskState::Success, "{label}");
        assert_eq!(projection.result, Some(json!("42")));
        assert!((projection.runtime.unwrap() - 1.23).abs() < 1e-9);
        assert_eq!(projection.args, Some(json!([40, 2])));
        assert_eq!(projection.name.as_deref(), Some("tasks.add"));
        assert_eq!(projection.hostname.as_deref(), Some("celery@w1"));
        assert_eq!(projection.pid, Some(4242));
        assert!(projection.sent.is_some());
        assert!(projection.received.is_some());
        assert!(projection.started.is_some());
        assert!(projection.succeeded.is_some());
        assert_eq!(projection.clock, Some(4));
        assert_eq!(projection.event_type.as_deref(), Some("task-succeeded"));
    }
}

#[tokio::test]
async fn test_duplicate_delivery_is_idempotent() {
    for (label, store) in backends().await {
        run_events(store.clone(), 2, &lifecycle_events()).await;
        let once = task(&store, "U").await;

        let duplicate = lifecycle_events().pop().unwrap();
        let stats = run_events(store.clone(), 2, &[duplicate.clone(), duplicate]).await;
        assert_eq!(stats.failed, 0, "{label}");

        assert_eq!(task(&store, "U").await, once, "{label}");
    }
}

#[tokio::test]
async fn test_higher_clock_wins_regardless_of_arrival_order() {
    let low = json!({"type": "task-retried", "uuid": "R", "clock": 5, "timestamp": 1714550400.0,
                     "exception": "first"});
    let high = json!({"type": "task-retried", "uuid": "R", "clock": 8, "timestamp": 1714550300.0,
                      "exception": "second"});

    for (label, store) in backends().await {
        run_events(store.clone(), 1, &[low.clone(), high.clone()]).await;
        let in_order = task(&store, "R").await;
        assert_eq!(in_order.exception.as_deref(), Some("second"), "{label}");
    }

    for (label, store) in backends().await {
        run_events(store.clone(), 1, &[high.clone(), low.clone()]).await;
        let reversed = task(&store, "R").await;
        assert_eq!(reversed.exception.as_deref(), Some("second"), "{label}");
        assert_eq!(reversed.clock, Some(8));
    }
}

#[tokio::test]
async fn test_terminal_state_survives_late_lower_clock_event() {
    let events = vec![
        json!({"type": "task-failed", "uuid": "F", "clock": 10, "timestamp": 1714550410.0,
               "exception": "boom"}),
        json!({"type": "task-started", "uuid": "F", "clock": 7, "timestamp": 1714550407.0,
               "hostname": "celery@w2"}),
    ];

    for (label, store) in backends().await {
        run_events(store.clone(), 1, &events).await;
        let projection = task(&store, "F").await;
        assert_eq!(projection.state, TaskState::Failure, "{label}");
        // 低时钟事件只补充从未写过的字段
        assert_eq!(projection.hostname.as_deref(), Some("celery@w2"));
        assert!(projection.started.is_some());
    }
}

#[tokio::test]
async fn test_worker_heartbeat_then_offline() {
    let events = vec![
        json!({"type": "worker-heartbeat", "hostname": "H", "clock": 5, "timestamp": 1714550400.0,
               "active": 2, "processed": 10, "freq": 2.0, "sw_ident": "py-celery"}),
        json!({"type": "worker-offline", "hostname": "H", "clock": 9, "timestamp": 1714550410.0}),
    ];

    for (label, store) in backends().await {
        run_events(store.clone(), 3, &events).await;
        let projection = worker(&store, "H").await;
        assert!(!projection.alive, "{label}");
        assert_eq!(projection.active, Some(2));
        assert_eq!(projection.processed, Some(10));
        assert_eq!(projection.clock, Some(9));
        assert_eq!(store.list_workers().await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_task_resolves_worker_by_hostname() {
    let events = vec![
        json!({"type": "worker-online", "hostname": "celery@w1", "clock": 1,
               "timestamp": 1714550400.0}),
        json!({"type": "task-received", "uuid": "W", "clock": 2, "timestamp": 1714550401.0,
               "hostname": "celery@w1"}),
        json!({"type": "task-received", "uuid": "X", "clock": 3, "timestamp": 1714550402.0,
               "hostname": "celery@unknown"}),
    ];

    for (label, store) in backends().await {
        // 单分区保证worker事件先于任务事件应用
        run_events(store.clone(), 1, &events).await;

        let online = worker(&store, "celery@w1").await;
        assert!(online.alive);
        assert_eq!(task(&store, "W").await.worker_id, online.id, "{label}");
        assert_eq!(task(&store, "X").await.worker_id, None, "{label}");
    }
}

#[tokio::test]
async fn test_malformed_and_unknown_events_do_not_stop_the_consumer() {
    for (label, store) in backends().await {
        let (source, sender) = ChannelEventSource::new(8);
        sender.send(b"not json".to_vec()).await.unwrap();
        sender
            .send_json(&json!({"type": "task-sent", "clock": 1, "timestamp": 1714550400.0}))
            .await
            .unwrap();
        sender
            .send_json(&json!({"type": "task-received", "uuid": "M", "clock": "x",
                               "timestamp": 1714550400.0}))
            .await
            .unwrap();
        sender
            .send_json(&json!({"type": "worker-exploded", "hostname": "H", "clock": 1,
                               "timestamp": 1714550400.0}))
            .await
            .unwrap();
        sender
            .send_json(&json!({"type": "task-received", "uuid": "M", "clock": 1,
                               "timestamp": 1714550400.0}))
            .await
            .unwrap();
        drop(sender);

        let (_tx, rx) = broadcast::channel(1);
        let pipeline = IngestPipeline::new(ingest_config(2), store.clone());
        let stats = pipeline.run(Box::new(source), rx).await.unwrap();

        assert_eq!(stats.received, 5, "{label}");
        assert_eq!(stats.malformed, 3, "{label}");
        assert_eq!(stats.skipped, 1, "{label}");
        assert_eq!(stats.applied, 1, "{label}");
        assert_eq!(task(&store, "M").await.state, TaskState::Received);
    }
}

/// 前若干次开启事务时返回瞬时冲突的存储
struct FlakyStore {
    inner: InMemoryProjectionStore,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryProjectionStore::new(),
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ProjectionStore for FlakyStore {
    async fn begin(&self) -> SchedulerResult<Box<dyn ProjectionTransaction>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(SchedulerError::TransientPersistence("database is locked".to_string()));
        }
        self.inner.begin().await
    }

    async fn get_task(&self, uuid: &str) -> SchedulerResult<Option<TaskProjection>> {
        self.inner.get_task(uuid).await
    }

    async fn get_worker(&self, hostname: &str) -> SchedulerResult<Option<WorkerProjection>> {
        self.inner.get_worker(hostname).await
    }

    async fn list_workers(&self) -> SchedulerResult<Vec<WorkerProjection>> {
        self.inner.list_workers().await
    }
}

#[tokio::test]
async fn test_transient_conflicts_are_retried() {
    let flaky = Arc::new(FlakyStore::new(2));
    let store: Arc<dyn ProjectionStore> = flaky.clone();

    let event = json!({"type": "task-received", "uuid": "T", "clock": 1, "timestamp": 1714550400.0});
    let stats = run_events(store.clone(), 1, &[event]).await;

    assert_eq!(stats.applied, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(task(&store, "T").await.state, TaskState::Received);
}

#[tokio::test]
async fn test_exhausted_retries_are_counted_as_failed() {
    let flaky = Arc::new(FlakyStore::new(3));
    let store: Arc<dyn ProjectionStore> = flaky.clone();

    let events = vec![
        json!({"type": "task-received", "uuid": "T", "clock": 1, "timestamp": 1714550400.0}),
        json!({"type": "task-received", "uuid": "T2", "clock": 1, "timestamp": 1714550400.0}),
    ];
    let stats = run_events(store.clone(), 1, &events).await;

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.applied, 1);
    assert!(store.get_task("T").await.unwrap().is_none());
    assert_eq!(task(&store, "T2").await.state, TaskState::Received);
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_events() {
    let store: Arc<dyn ProjectionStore> = Arc::new(InMemoryProjectionStore::new());
    let (source, sender) = ChannelEventSource::new(16);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let pipeline = IngestPipeline::new(ingest_config(4), store.clone());
    let handle = tokio::spawn(async move { pipeline.run(Box::new(source), shutdown_rx).await });

    for event in lifecycle_events() {
        sender.send_json(&event).await.unwrap();
    }

    let mut applied = false;
    for _ in 0..100 {
        if let Some(projection) = store.get_task("U").await.unwrap() {
            if projection.state == TaskState::Success {
                applied = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(applied);

    shutdown_tx.send(()).unwrap();
    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.received, 4);
    assert_eq!(stats.applied, 4);

    // 管道停止后发送端感知到通道关闭
    assert!(sender.send(b"late".to_vec()).await.is_err());
}

/// 每个事务开始前等待一段时间，让事件在关闭信号到达时仍在途
struct SlowStore {
    inner: InMemoryProjectionStore,
    delay: Duration,
}

#[async_trait]
impl ProjectionStore for SlowStore {
    async fn begin(&self) -> SchedulerResult<Box<dyn ProjectionTransaction>> {
        tokio::time::sleep(self.delay).await;
        self.inner.begin().await
    }

    async fn get_task(&self, uuid: &str) -> SchedulerResult<Option<TaskProjection>> {
        self.inner.get_task(uuid).await
    }

    async fn get_worker(&self, hostname: &str) -> SchedulerResult<Option<WorkerProjection>> {
        self.inner.get_worker(hostname).await
    }

    async fn list_workers(&self) -> SchedulerResult<Vec<WorkerProjection>> {
        self.inner.list_workers().await
    }
}

/// 记录是否被关闭的事件源
struct TrackedSource {
    inner: ChannelEventSource,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl EventSource for TrackedSource {
    async fn next_event(&mut self) -> SchedulerResult<Option<Vec<u8>>> {
        self.inner.next_event().await
    }

    async fn close(&mut self) -> SchedulerResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_shutdown_with_backlog_commits_every_dispatched_event() {
    let store: Arc<dyn ProjectionStore> = Arc::new(SlowStore {
        inner: InMemoryProjectionStore::new(),
        delay: Duration::from_millis(50),
    });
    let (inner, sender) = ChannelEventSource::new(16);
    let closed = Arc::new(AtomicBool::new(false));
    let source = TrackedSource {
        inner,
        closed: closed.clone(),
    };

    for i in 0..8 {
        let event = json!({"type": "task-received", "uuid": format!("B{i}"), "clock": 1,
                           "timestamp": 1714550400.0});
        sender.send_json(&event).await.unwrap();
    }
    sender.send(b"not json".to_vec()).await.unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let pipeline = Arc::new(IngestPipeline::new(ingest_config(2), store.clone()));
    let handle = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run(Box::new(source), shutdown_rx).await })
    };

    // 一旦有事件被接收就立即关闭，此时慢存储上的合并仍在进行
    for _ in 0..200 {
        if pipeline.stats().received > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    shutdown_tx.send(()).unwrap();

    let stats = handle.await.unwrap().unwrap();
    assert!(stats.received > 0);
    assert_eq!(
        stats.applied + stats.failed,
        stats.received - stats.malformed - stats.skipped
    );
    assert_eq!(stats.failed, 0);
    assert!(closed.load(Ordering::SeqCst));

    let mut committed = 0;
    for i in 0..8 {
        if let Some(projection) = store.get_task(&format!("B{i}")).await.unwrap() {
            assert_eq!(projection.state, TaskState::Received);
            committed += 1;
        }
    }
    assert_eq!(committed, stats.applied);
}
