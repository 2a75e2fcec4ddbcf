use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::schedule::{ClockedSchedule, CrontabSchedule, IntervalSchedule, ScheduleKind, SolarSchedule};
use super::update_value::UpdateValue;

/// 周期任务：把一个任务定义绑定到唯一的调度定义上
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeriodicTask {
    pub id: i64,
    pub name: String,
    pub task: String,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
    pub queue: Option<String>,
    pub exchange: Option<String>,
    pub routing_key: Option<String>,
    pub headers: serde_json::Value,
    pub priority: Option<i32>,
    pub expires: Option<DateTime<Utc>>,
    pub expire_seconds: Option<i64>,
    pub one_off: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub total_run_count: i64,
    pub date_changed: DateTime<Utc>,
    pub description: String,
    /// 为true时本次写入不更新变更信标
    pub no_changes: bool,
    pub schedule: ScheduleKind,
    /// 调度定义在对应类型表中的行ID
    pub schedule_id: i64,
}

impl PeriodicTask {
    /// 过期时间：`expires` 优先，否则由 `date_changed + expire_seconds` 推算
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires.or_else(|| {
            self.expire_seconds
                .and_then(chrono::Duration::try_seconds)
                .and_then(|secs| self.date_changed.checked_add_signed(secs))
        })
    }
}

fn empty_args() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_enabled() -> bool {
    true
}

/// 创建周期任务的请求
///
/// 四个调度字段保持独立可空，由 [`ScheduleKind::from_parts`] 统一校验"恰好一个"。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeriodicTaskSpec {
    pub name: String,
    pub task: String,
    #[serde(default = "empty_args")]
    pub args: serde_json::Value,
    #[serde(default = "empty_object")]
    pub kwargs: serde_json::Value,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub routing_key: Option<String>,
    #[serde(default = "empty_object")]
    pub headers: serde_json::Value,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expire_seconds: Option<i64>,
    #[serde(default)]
    pub one_off: bool,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub no_changes: bool,
    #[serde(default)]
    pub interval: Option<IntervalSchedule>,
    #[serde(default)]
    pub crontab: Option<CrontabSchedule>,
    #[serde(default)]
    pub solar: Option<SolarSchedule>,
    #[serde(default)]
    pub clocked: Option<ClockedSchedule>,
}

impl PeriodicTaskSpec {
    pub fn new(name: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task: task.into(),
            args: empty_args(),
            kwargs: empty_object(),
            queue: None,
            exchange: None,
            routing_key: None,
            headers: empty_object(),
            priority: None,
            expires: None,
            expire_seconds: None,
            one_off: false,
            start_time: None,
            enabled: true,
            description: String::new(),
            no_changes: false,
            interval: None,
            crontab: None,
            solar: None,
            clocked: None,
        }
    }

    pub fn with_interval(mut self, interval: IntervalSchedule) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_crontab(mut self, crontab: CrontabSchedule) -> Self {
        self.crontab = Some(crontab);
        self
    }

    pub fn with_solar(mut self, solar: SolarSchedule) -> Self {
        self.solar = Some(solar);
        self
    }

    pub fn with_clocked(mut self, clocked: ClockedSchedule) -> Self {
        self.clocked = Some(clocked);
        self
    }
}

/// 更新周期任务的部分字段
///
/// 调度字段按"当前调度 + 补丁"合成后重新校验，切换调度类型时需要同时清空旧类型。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PeriodicTaskPatch {
    pub name: UpdateValue<String>,
    pub task: UpdateValue<String>,
    pub args: UpdateValue<serde_json::Value>,
    pub kwargs: UpdateValue<serde_json::Value>,
    pub queue: UpdateValue<String>,
    pub exchange: UpdateValue<String>,
    pub routing_key: UpdateValue<String>,
    pub headers: UpdateValue<serde_json::Value>,
    pub priority: UpdateValue<i32>,
    pub expires: UpdateValue<DateTime<Utc>>,
    pub expire_seconds: UpdateValue<i64>,
    pub one_off: UpdateValue<bool>,
    pub start_time: UpdateValue<DateTime<Utc>>,
    pub enabled: UpdateValue<bool>,
    pub description: UpdateValue<String>,
    pub no_changes: UpdateValue<bool>,
    pub interval: UpdateValue<IntervalSchedule>,
    pub crontab: UpdateValue<CrontabSchedule>,
    pub solar: UpdateValue<SolarSchedule>,
    pub clocked: UpdateValue<ClockedSchedule>,
}

impl PeriodicTaskPatch {
    /// 补丁是否涉及调度定义
    pub fn touches_schedule(&self) -> bool {
        self.interval.is_change()
            || self.crontab.is_change()
            || self.solar.is_change()
            || self.clocked.is_change()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IntervalPeriod;

    #[test]
    fn test_spec_defaults_from_json() {
        let spec: PeriodicTaskSpec = serde_json::from_value(serde_json::json!({
            "name": "cleanup",
            "task": "tasks.cleanup",
            "interval": {"every": 10, "period": "seconds"}
        }))
        .unwrap();

        assert!(spec.enabled);
        assert_eq!(spec.args, serde_json::json!([]));
        assert_eq!(spec.kwargs, serde_json::json!({}));
        assert_eq!(
            spec.interval,
            Some(IntervalSchedule {
                every: 10,
                period: IntervalPeriod::Seconds
            })
        );
    }

    #[test]
    fn test_patch_detects_schedule_change() {
        let patch: PeriodicTaskPatch =
            serde_json::from_value(serde_json::json!({"interval": null})).unwrap();
        assert!(patch.touches_schedule());
        assert!(patch.interval.is_unset());

        let patch: PeriodicTaskPatch =
            serde_json::from_value(serde_json::json!({"enabled": false})).unwrap();
        assert!(!patch.touches_schedule());
    }
}
