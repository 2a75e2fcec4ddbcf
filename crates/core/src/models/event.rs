use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::projection::TaskState;

/// 任务生命周期事件类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskEventType {
    #[serde(rename = "task-sent")]
    Sent,
    #[serde(rename = "task-received")]
    Received,
    #[serde(rename = "task-started")]
    Started,
    #[serde(rename = "task-succeeded")]
    Succeeded,
    #[serde(rename = "task-failed")]
    Failed,
    #[serde(rename = "task-rejected")]
    Rejected,
    #[serde(rename = "task-revoked")]
    Revoked,
    #[serde(rename = "task-retried")]
    Retried,
}

impl TaskEventType {
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "task-sent" => Some(TaskEventType::Sent),
            "task-received" => Some(TaskEventType::Received),
            "task-started" => Some(TaskEventType::Started),
            "task-succeeded" => Some(TaskEventType::Succeeded),
            "task-failed" => Some(TaskEventType::Failed),
            "task-rejected" => Some(TaskEventType::Rejected),
            "task-revoked" => Some(TaskEventType::Revoked),
            "task-retried" => Some(TaskEventType::Retried),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskEventType::Sent => "task-sent",
            TaskEventType::Received => "task-received",
            TaskEventType::Started => "task-started",
            TaskEventType::Succeeded => "task-succeeded",
            TaskEventType::Failed => "task-failed",
            TaskEventType::Rejected => "task-rejected",
            TaskEventType::Revoked => "task-revoked",
            TaskEventType::Retried => "task-retried",
        }
    }

    /// 事件对应的任务状态
    pub fn state(&self) -> TaskState {
        match self {
            TaskEventType::Sent => TaskState::Pending,
            TaskEventType::Received => TaskState::Received,
            TaskEventType::Started => TaskState::Started,
            TaskEventType::Succeeded => TaskState::Success,
            TaskEventType::Failed => TaskState::Failure,
            TaskEventType::Rejected => TaskState::Rejected,
            TaskEventType::Revoked => TaskState::Revoked,
            TaskEventType::Retried => TaskState::Retry,
        }
    }
}

/// Worker生命周期事件类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkerEventType {
    #[serde(rename = "worker-online")]
    Online,
    #[serde(rename = "worker-heartbeat")]
    Heartbeat,
    #[serde(rename = "worker-offline")]
    Offline,
}

impl WorkerEventType {
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "worker-online" => Some(WorkerEventType::Online),
            "worker-heartbeat" => Some(WorkerEventType::Heartbeat),
            "worker-offline" => Some(WorkerEventType::Offline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerEventType::Online => "worker-online",
            WorkerEventType::Heartbeat => "worker-heartbeat",
            WorkerEventType::Offline => "worker-offline",
        }
    }

    pub fn alive(&self) -> bool {
        !matches!(self, WorkerEventType::Offline)
    }
}

/// 任务事件，除身份字段外只携带本阶段相关的字段
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEvent {
    pub event_type: TaskEventType,
    pub uuid: String,
    pub clock: i64,
    pub timestamp: DateTime<Utc>,
    pub name: Option<String>,
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
}

impl TaskEvent {
    pub fn new(
        event_type: TaskEventType,
        uuid: impl Into<String>,
        clock: i64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type,
            uuid: uuid.into(),
            clock,
            timestamp,
            name: None,
            args: None,
            kwargs: None,
            result: None,
            eta: None,
            expires: None,
            hostname: None,
            client: None,
            exchange: None,
            queue: None,
            routing_key: None,
            parent_id: None,
            root_id: None,
            retries: None,
            runtime: None,
            exception: None,
            traceback: None,
            pid: None,
            requeue: None,
            utcoffset: None,
        }
    }
}

/// Worker事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerEvent {
    pub event_type: WorkerEventType,
    pub hostname: String,
    pub clock: i64,
    pub timestamp: DateTime<Utc>,
    pub freq: Option<f64>,
    pub active: Option<i64>,
    pub processed: Option<i64>,
    pub sw_ident: Option<String>,
    pub sw_ver: Option<String>,
    pub sw_sys: Option<String>,
    pub pid: Option<i64>,
    pub utcoffset: Option<i64>,
}

impl WorkerEvent {
    pub fn new(
        event_type: WorkerEventType,
        hostname: impl Into<String>,
        clock: i64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type,
            hostname: hostname.into(),
            clock,
            timestamp,
            freq: None,
            active: None,
            processed: None,
            sw_ident: None,
            sw_ver: None,
            sw_sys: None,
            pid: None,
            utcoffset: None,
        }
    }
}

/// 解码后的生命周期事件
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Task(TaskEvent),
    Worker(WorkerEvent),
}

impl LifecycleEvent {
    /// 分区与串行化使用的键：任务为uuid，Worker为hostname
    pub fn key(&self) -> &str {
        match self {
            LifecycleEvent::Task(event) => &event.uuid,
            LifecycleEvent::Worker(event) => &event.hostname,
        }
    }

    pub fn clock(&self) -> i64 {
        match self {
            LifecycleEvent::Task(event) => event.clock,
            LifecycleEvent::Worker(event) => event.clock,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            LifecycleEvent::Task(event) => event.event_type.as_str(),
            LifecycleEvent::Worker(event) => event.event_type.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names_round_trip() {
        for name in [
            "task-sent",
            "task-received",
            "task-started",
            "task-succeeded",
            "task-failed",
            "task-rejected",
            "task-revoked",
            "task-retried",
        ] {
            let event_type = TaskEventType::from_type_name(name).unwrap();
            assert_eq!(event_type.as_str(), name);
        }
        assert!(TaskEventType::from_type_name("task-unknown").is_none());
    }

    #[test]
    fn test_event_states() {
        assert_eq!(TaskEventType::Sent.state(), TaskState::Pending);
        assert_eq!(TaskEventType::Succeeded.state(), TaskState::Success);
        assert_eq!(TaskEventType::Retried.state(), TaskState::Retry);
    }

    #[test]
    fn test_worker_alive_flag() {
        assert!(WorkerEventType::Online.alive());
        assert!(WorkerEventType::Heartbeat.alive());
        assert!(!WorkerEventType::Offline.alive());
    }

    #[test]
    fn test_lifecycle_event_key() {
        let event = LifecycleEvent::Worker(WorkerEvent::new(
            WorkerEventType::Heartbeat,
            "celery@node-1",
            5,
            Utc::now(),
        ));
        assert_eq!(event.key(), "celery@node-1");
        assert_eq!(event.clock(), 5);
        assert_eq!(event.type_name(), "worker-heartbeat");
    }
}
