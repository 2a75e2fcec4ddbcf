use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use scheduler_core::traits::BeaconReader;
use scheduler_core::SchedulerResult;

/// 变更信标观察者
///
/// 记住上一次看到的信标值，派发循环每个tick调用 [`BeaconWatcher::poll`]，
/// 只有信标前进时才需要重新加载全部周期任务。首次轮询总是报告变更。
pub struct BeaconWatcher {
    reader: Arc<dyn BeaconReader>,
    last_seen: Option<DateTime<Utc>>,
    polled: bool,
}

impl BeaconWatcher {
    pub fn new(reader: Arc<dyn BeaconReader>) -> Self {
        Self {
            reader,
            last_seen: None,
            polled: false,
        }
    }

    /// 信标是否自上次轮询以来发生了变化
    pub async fn poll(&mut self) -> SchedulerResult<bool> {
        let current = self.reader.last_change().await?;
        let changed = !self.polled || current != self.last_seen;

        if changed {
            debug!("变更信标: {:?} -> {:?}", self.last_seen, current);
        }
        self.polled = true;
        self.last_seen = current;
        Ok(changed)
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }
}
