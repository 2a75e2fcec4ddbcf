use serde::{Deserialize, Serialize};

/// 事件摄取管道配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// 按key分区的并行应用协程数量
    pub partitions: usize,
    /// 每个分区的缓冲队列容量
    pub channel_capacity: usize,
    /// 单个事件在瞬时写入冲突下的最大尝试次数
    pub max_apply_attempts: u32,
    pub retry_backoff_ms: u64,
    pub shutdown_timeout_seconds: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            partitions: 4,
            channel_capacity: 1024,
            max_apply_attempts: 3,
            retry_backoff_ms: 50,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.partitions == 0 {
            return Err(anyhow::anyhow!("分区数量必须大于0"));
        }

        if self.channel_capacity == 0 {
            return Err(anyhow::anyhow!("分区队列容量必须大于0"));
        }

        if self.max_apply_attempts == 0 {
            return Err(anyhow::anyhow!("最大尝试次数必须大于0"));
        }

        if self.shutdown_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("关闭超时时间必须大于0"));
        }

        Ok(())
    }
}

/// 变更信标轮询配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub poll_interval_seconds: u64,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 5,
        }
    }
}

impl BeaconConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("信标轮询间隔必须大于0"));
        }
        Ok(())
    }
}
