use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    #[default]
    Pending,
    Received,
    Started,
    Success,
    Failure,
    Revoked,
    Rejected,
    Retry,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Received => "RECEIVED",
            TaskState::Started => "STARTED",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
            TaskState::Revoked => "REVOKED",
            TaskState::Rejected => "REJECTED",
            TaskState::Retry => "RETRY",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Revoked | TaskState::Rejected
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskState::Pending),
            "RECEIVED" => Ok(TaskState::Received),
            "STARTED" => Ok(TaskState::Started),
            "SUCCESS" => Ok(TaskState::Success),
            "FAILURE" => Ok(TaskState::Failure),
            "REVOKED" => Ok(TaskState::Revoked),
            "REJECTED" => Ok(TaskState::Rejected),
            "RETRY" => Ok(TaskState::Retry),
            _ => Err(SchedulerError::Serialization(format!("未知的任务状态: {s}"))),
        }
    }
}

/// 字段最后一次写入的逻辑时钟与事件时间，按 (clock, timestamp) 排序
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct FieldStamp {
    pub clock: i64,
    pub timestamp: DateTime<Utc>,
}

impl FieldStamp {
    pub fn new(clock: i64, timestamp: DateTime<Utc>) -> Self {
        Self { clock, timestamp }
    }
}

/// 字段名到写入戳的映射
pub type FieldClocks = BTreeMap<String, FieldStamp>;

/// 任务投影，按uuid唯一
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskProjection {
    pub uuid: String,
    pub name: Option<String>,
    pub state: TaskState,
    pub args: Option<serde_json::Value>,
    pub kwargs: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub eta: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub hostname: Option<String>,
    pub client: Option<String>,
    pub exchange: Option<String>,
    pub queue: Option<String>,
    pub routing_key: Option<String>,
    pub parent_id: Option<String>,
    pub root_id: Option<String>,
    pub retries: Option<i64>,
    pub runtime: Option<f64>,
    pub exception: Option<String>,
    pub traceback: Option<String>,
    pub pid: Option<i64>,
    pub requeue: Option<bool>,
    pub utcoffset: Option<i64>,
    pub sent: Option<DateTime<Utc>>,
    pub received: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub succeeded: Option<DateTime<Utc>>,
    pub failed: Option<DateTime<Utc>>,
    pub revoked: Option<DateTime<Utc>>,
    pub rejected: Option<DateTime<Utc>>,
    pub retried: Option<DateTime<Utc>>,
    /// 已应用的最大逻辑时钟
    pub clock: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub event_type: Option<String>,
    pub worker_id: Option<i64>,
    pub field_clocks: FieldClocks,
}

impl TaskProjection {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            ..Default::default()
        }
    }
}

/// Worker投影，按hostname唯一
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkerProjection {
    /// 持久化后分配的行ID
    pub id: Option<i64>,
    pub hostname: String,
    pub freq: Option<f64>,
    pub clock: Option<i64>,
    pub alive: bool,
    pub active: Option<i64>,
    pub processed: Option<i64>,
    pub sw_ident: Option<String>,
    pub sw_ver: Option<String>,
    pub sw_sys: Option<String>,
    pub pid: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub event_type: Option<String>,
    pub utcoffset: Option<i64>,
    pub field_clocks: FieldClocks,
}

impl WorkerProjection {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Default::default()
        }
    }
}
