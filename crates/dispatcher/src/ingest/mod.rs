//! 事件摄取管道
//!
//! 单一消费者从事件源按到达顺序读取报文并解码，按事件key哈希分发到固定数量的分区。
//! 每个分区一个应用协程，同一key的事件总是进入同一分区并按接收顺序串行应用，
//! 不同key之间并行。格式错误的事件记录后丢弃，不影响消费循环。
//!
//! 关闭流程：停止从事件源读取 → 关闭分区通道并等待在途事件应用完毕（有超时）→ 关闭事件源。

pub mod apply;
pub mod stats;

pub use apply::EventApplier;
pub use stats::IngestStats;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use scheduler_core::config::IngestConfig;
use scheduler_core::models::LifecycleEvent;
use scheduler_core::traits::{EventSource, ProjectionStore};
use scheduler_core::SchedulerResult;
use scheduler_domain::decode_event;

use stats::IngestCounters;

pub struct IngestPipeline {
    config: IngestConfig,
    applier: EventApplier,
    counters: Arc<IngestCounters>,
}

impl IngestPipeline {
    pub fn new(config: IngestConfig, store: Arc<dyn ProjectionStore>) -> Self {
        let applier = EventApplier::new(
            store,
            config.max_apply_attempts,
            Duration::from_millis(config.retry_backoff_ms),
        );
        Self {
            config,
            applier,
            counters: Arc::new(IngestCounters::default()),
        }
    }

    /// 当前统计
    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot()
    }

    /// 运行到事件源结束或收到关闭信号
    ///
    /// 事件源读取出错时同样执行完整的关闭流程，然后返回该错误。
    pub async fn run(
        &self,
        mut source: Box<dyn EventSource>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> SchedulerResult<IngestStats> {
        let partitions = self.config.partitions.max(1);
        let (senders, mut handles) = self.spawn_partitions(partitions);
        info!("事件摄取管道启动，分区数量: {}", partitions);

        let mut source_error = None;
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("收到关闭信号，停止接收事件");
                    break;
                }
                next = source.next_event() => match next {
                    Ok(Some(payload)) => self.dispatch(&payload, &senders).await,
                    Ok(None) => {
                        info!("事件源已结束");
                        break;
                    }
                    Err(e) => {
                        error!("读取事件失败: {}", e);
                        source_error = Some(e);
                        break;
                    }
                }
            }
        }

        drop(senders);
        self.drain(&mut handles).await;

        if let Err(e) = source.close().await {
            warn!("关闭事件源失败: {}", e);
        }

        let stats = self.stats();
        info!(
            "事件摄取管道已停止: received={} applied={} skipped={} malformed={} failed={}",
            stats.received, stats.applied, stats.skipped, stats.malformed, stats.failed
        );

        match source_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    fn spawn_partitions(
        &self,
        partitions: usize,
    ) -> (Vec<mpsc::Sender<LifecycleEvent>>, Vec<JoinHandle<()>>) {
        let capacity = self.config.channel_capacity.max(1);
        let mut senders = Vec::with_capacity(partitions);
        let mut handles = Vec::with_capacity(partitions);

        for partition in 0..partitions {
            let (tx, mut rx) = mpsc::channel::<LifecycleEvent>(capacity);
            let applier = self.applier.clone();
            let counters = Arc::clone(&self.counters);

            handles.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match applier.apply(&event).await {
                        Ok(changed) => {
                            if !changed {
                                debug!("事件 {} ({}) 无变化", event.type_name(), event.key());
                            }
                            counters.applied();
                        }
                        Err(e) => {
                            error!(
                                "应用事件失败 {} ({}) clock={}: {}",
                                event.type_name(),
                                event.key(),
                                event.clock(),
                                e
                            );
                            counters.failed();
                        }
                    }
                }
                debug!("分区 {} 已排空", partition);
            }));
            senders.push(tx);
        }

        (senders, handles)
    }

    async fn dispatch(&self, payload: &[u8], senders: &[mpsc::Sender<LifecycleEvent>]) {
        self.counters.received();

        let event = match decode_event(payload) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!("跳过未知类型事件");
                self.counters.skipped();
                return;
            }
            Err(e) => {
                warn!("丢弃格式错误的事件: {}", e);
                self.counters.malformed();
                return;
            }
        };

        let partition = partition_for(event.key(), senders.len());
        if senders[partition].send(event).await.is_err() {
            error!("分区 {} 已停止，事件被丢弃", partition);
            self.counters.failed();
        }
    }

    async fn drain(&self, handles: &mut [JoinHandle<()>]) {
        let timeout = Duration::from_secs(self.config.shutdown_timeout_seconds);
        let pending = futures::future::join_all(handles.iter_mut());
        let outcome = tokio::time::timeout(timeout, pending).await;

        match outcome {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("分区协程异常退出: {}", e);
                    }
                }
            }
            Err(_) => {
                warn!("等待在途事件超时({:?})，强制停止分区", timeout);
                for handle in handles.iter() {
                    handle.abort();
                }
            }
        }
    }
}

/// 同一key总是落在同一分区
pub fn partition_for(key: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}
