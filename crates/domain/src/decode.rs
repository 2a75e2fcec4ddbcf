//! 生命周期事件解码
//!
//! 事件是扁平的JSON对象，至少包含 `type`、`uuid`/`hostname`、`clock`、`timestamp`。
//! 时间字段既可以是epoch秒（浮点数），也可以是RFC 3339字符串。
//! 未知类型返回 `Ok(None)` 由调用方跳过；缺少必需字段或字段类型错误返回 `Ingest` 错误。

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

use scheduler_core::models::{
    LifecycleEvent, TaskEvent, TaskEventType, WorkerEvent, WorkerEventType,
};
use scheduler_core::{SchedulerError, SchedulerResult};

fn epoch_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    DateTime::<Utc>::from_timestamp_micros((seconds * 1_000_000.0).round() as i64)
}

fn flexible_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Epoch(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Epoch(seconds)) => epoch_to_datetime(seconds)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("时间戳超出范围: {seconds}"))),
        Some(Raw::Text(text)) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| D::Error::custom(format!("无法解析的时间: {text} ({e})"))),
    }
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    #[serde(rename = "type")]
    event_type: String,
}

#[derive(Debug, Deserialize)]
struct RawTaskEvent {
    uuid: String,
    clock: i64,
    #[serde(deserialize_with = "flexible_time")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    args: Option<serde_json::Value>,
    #[serde(default)]
    kwargs: Option<serde_json::Value>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "flexible_time")]
    eta: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_time")]
    expires: Option<DateTime<Utc>>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    client: Option<String>,
    #[serde(default)]
    exchange: Option<String>,
    #[serde(default)]
    queue: Option<String>,
    #[serde(default)]
    routing_key: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    root_id: Option<String>,
    #[serde(default)]
    retries: Option<i64>,
    #[serde(default)]
    runtime: Option<f64>,
    #[serde(default)]
    exception: Option<String>,
    #[serde(default)]
    traceback: Option<String>,
    #[serde(default)]
    pid: Option<i64>,
    #[serde(default)]
    requeue: Option<bool>,
    #[serde(default)]
    utcoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawWorkerEvent {
    hostname: String,
    clock: i64,
    #[serde(deserialize_with = "flexible_time")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    freq: Option<f64>,
    #[serde(default)]
    active: Option<i64>,
    #[serde(default)]
    processed: Option<i64>,
    #[serde(default)]
    sw_ident: Option<String>,
    #[serde(default)]
    sw_ver: Option<String>,
    #[serde(default)]
    sw_sys: Option<String>,
    #[serde(default)]
    pid: Option<i64>,
    #[serde(default)]
    utcoffset: Option<i64>,
}

fn malformed(event_type: &str, e: serde_json::Error) -> SchedulerError {
    SchedulerError::ingest(format!("{event_type}: {e}"))
}

fn required_timestamp(
    event_type: &str,
    timestamp: Option<DateTime<Utc>>,
) -> SchedulerResult<DateTime<Utc>> {
    timestamp.ok_or_else(|| SchedulerError::ingest(format!("{event_type}: 缺少timestamp")))
}

/// 解码一条原始事件
pub fn decode_event(payload: &[u8]) -> SchedulerResult<Option<LifecycleEvent>> {
    let value: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| SchedulerError::ingest(format!("不是合法的JSON: {e}")))?;

    let header = RawHeader::deserialize(&value)
        .map_err(|e| SchedulerError::ingest(format!("缺少事件类型: {e}")))?;
    let type_name = header.event_type.as_str();

    if let Some(event_type) = TaskEventType::from_type_name(type_name) {
        let raw = RawTaskEvent::deserialize(&value).map_err(|e| malformed(type_name, e))?;
        if raw.uuid.is_empty() {
            return Err(SchedulerError::ingest(format!("{type_name}: uuid为空")));
        }

        let timestamp = required_timestamp(type_name, raw.timestamp)?;
        return Ok(Some(LifecycleEvent::Task(TaskEvent {
            event_type,
            uuid: raw.uuid,
            clock: raw.clock,
            timestamp,
            name: raw.name,
            args: raw.args,
            kwargs: raw.kwargs,
            result: raw.result,
            eta: raw.eta,
            expires: raw.expires,
            hostname: raw.hostname,
            client: raw.client,
            exchange: raw.exchange,
            queue: raw.queue,
            routing_key: raw.routing_key,
            parent_id: raw.parent_id,
            root_id: raw.root_id,
            retries: raw.retries,
            runtime: raw.runtime,
            exception: raw.exception,
            traceback: raw.traceback,
            pid: raw.pid,
            requeue: raw.requeue,
            utcoffset: raw.utcoffset,
        })));
    }

    if let Some(event_type) = WorkerEventType::from_type_name(type_name) {
        let raw = RawWorkerEvent::deserialize(&value).map_err(|e| malformed(type_name, e))?;
        if raw.hostname.is_empty() {
            return Err(SchedulerError::ingest(format!("{type_name}: hostname为空")));
        }

        let timestamp = required_timestamp(type_name, raw.timestamp)?;
        return Ok(Some(LifecycleEvent::Worker(WorkerEvent {
            event_type,
            hostname: raw.hostname,
            clock: raw.clock,
            timestamp,
            freq: raw.freq,
            active: raw.active,
            processed: raw.processed,
            sw_ident: raw.sw_ident,
            sw_ver: raw.sw_ver,
            sw_sys: raw.sw_sys,
            pid: raw.pid,
            utcoffset: raw.utcoffset,
        })));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn decode(value: serde_json::Value) -> SchedulerResult<Option<LifecycleEvent>> {
        decode_event(&serde_json::to_vec(&value).unwrap())
    }

    #[test]
    fn test_decode_task_event_with_epoch_timestamp() {
        let event = decode(serde_json::json!({
            "type": "task-succeeded",
            "uuid": "3f0c6a2e-1111-4d5e-9c1a-0a0b0c0d0e0f",
            "clock": 4,
            "timestamp": 1_700_000_000.5,
            "hostname": "celery@node-1",
            "result": "42",
            "runtime": 1.23,
            "local_received": 1_700_000_000.6
        }))
        .unwrap()
        .unwrap();

        let LifecycleEvent::Task(task) = event else {
            panic!("expected task event");
        };
        assert_eq!(task.event_type, TaskEventType::Succeeded);
        assert_eq!(task.clock, 4);
        assert_eq!(task.timestamp.timestamp_millis(), 1_700_000_000_500);
        assert_eq!(task.result, Some(serde_json::json!("42")));
        assert_eq!(task.hostname.as_deref(), Some("celery@node-1"));
    }

    #[test]
    fn test_decode_rfc3339_times() {
        let event = decode(serde_json::json!({
            "type": "task-sent",
            "uuid": "U",
            "clock": 1,
            "timestamp": "2024-01-01T00:00:00Z",
            "eta": "2024-01-01T08:00:00+08:00",
            "expires": null
        }))
        .unwrap()
        .unwrap();

        let LifecycleEvent::Task(task) = event else {
            panic!("expected task event");
        };
        assert_eq!(task.eta, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(task.expires, None);
    }

    #[test]
    fn test_decode_worker_event() {
        let event = decode(serde_json::json!({
            "type": "worker-heartbeat",
            "hostname": "celery@node-1",
            "clock": 5,
            "timestamp": 1_700_000_000.0,
            "freq": 2.0,
            "active": 2,
            "processed": 10,
            "sw_ident": "py-celery",
            "loadavg": [0.1, 0.2, 0.3]
        }))
        .unwrap()
        .unwrap();

        let LifecycleEvent::Worker(worker) = event else {
            panic!("expected worker event");
        };
        assert_eq!(worker.event_type, WorkerEventType::Heartbeat);
        assert_eq!(worker.active, Some(2));
        assert_eq!(worker.sw_ident.as_deref(), Some("py-celery"));
    }

    #[test]
    fn test_unknown_type_is_skipped() {
        let event = decode(serde_json::json!({"type": "worker-stats", "hostname": "h"})).unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_malformed_events_are_ingest_errors() {
        let cases = vec![
            serde_json::json!({"uuid": "U", "clock": 1, "timestamp": 1.0}),
            serde_json::json!({"type": "task-started", "clock": 1, "timestamp": 1.0}),
            serde_json::json!({"type": "task-started", "uuid": "U", "timestamp": 1.0}),
            serde_json::json!({"type": "task-started", "uuid": "U", "clock": "one", "timestamp": 1.0}),
            serde_json::json!({"type": "task-started", "uuid": "U", "clock": 1}),
            serde_json::json!({"type": "task-started", "uuid": "U", "clock": 1, "timestamp": "yesterday"}),
            serde_json::json!({"type": "worker-online", "hostname": "", "clock": 1, "timestamp": 1.0}),
        ];

        for case in cases {
            let err = decode(case.clone()).unwrap_err();
            assert!(matches!(err, SchedulerError::Ingest(_)), "{case}");
        }

        assert!(matches!(
            decode_event(b"not json").unwrap_err(),
            SchedulerError::Ingest(_)
        ));
    }
}
