use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据验证失败 [{}]: {message}", .fields.join(", "))]
    Validation {
        fields: Vec<String>,
        message: String,
    },

    #[error("唯一性冲突: {field}={value} 已存在")]
    Conflict { field: String, value: String },

    #[error("周期任务未找到: {id}")]
    PeriodicTaskNotFound { id: i64 },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("未知时区: {0}")]
    InvalidTimezone(String),

    #[error("事件格式错误: {0}")]
    Ingest(String),

    #[error("持久化写入冲突: {0}")]
    TransientPersistence(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn validation<S: Into<String>>(fields: &[&str], message: S) -> Self {
        Self::Validation {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            message: message.into(),
        }
    }

    pub fn conflict<S: Into<String>>(field: &str, value: S) -> Self {
        Self::Conflict {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn ingest<S: Into<String>>(msg: S) -> Self {
        Self::Ingest(msg.into())
    }

    /// 是否属于可以重试的瞬时写入冲突
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedulerError::TransientPersistence(_))
    }

    /// 校验类错误（包括CRON与时区错误）在持久化前同步抛出
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SchedulerError::Validation { .. }
                | SchedulerError::InvalidCron { .. }
                | SchedulerError::InvalidTimezone(_)
        )
    }

    /// 校验失败涉及的字段
    pub fn fields(&self) -> Vec<String> {
        match self {
            SchedulerError::Validation { fields, .. } => fields.clone(),
            SchedulerError::InvalidCron { .. } => vec!["crontab".to_string()],
            SchedulerError::InvalidTimezone(_) => vec!["timezone".to_string()],
            SchedulerError::Conflict { field, .. } => vec![field.clone()],
            _ => Vec::new(),
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
