//! 周期任务校验
//!
//! 所有规则在持久化之前同步检查，失败时返回带字段名的校验错误：
//! 调度类型恰好一种、调度定义本身合法、clocked必须一次性、
//! `expires` 与 `expire_seconds` 互斥。

use chrono::{DateTime, Utc};

use scheduler_core::models::{
    PeriodicTask, PeriodicTaskPatch, PeriodicTaskSpec, ScheduleKind, UpdateValue,
};
use scheduler_core::{SchedulerError, SchedulerResult};

use crate::schedules::build_schedule;

fn check_rules(task: &PeriodicTask) -> SchedulerResult<()> {
    if task.name.trim().is_empty() {
        return Err(SchedulerError::validation(&["name"], "名称不能为空"));
    }
    if task.task.trim().is_empty() {
        return Err(SchedulerError::validation(&["task"], "任务标识不能为空"));
    }

    build_schedule(&task.schedule)?;

    if task.schedule.is_clocked() && !task.one_off {
        return Err(SchedulerError::validation(
            &["clocked", "one_off"],
            "clocked调度必须设置 one_off",
        ));
    }

    if task.expires.is_some() && task.expire_seconds.is_some() {
        return Err(SchedulerError::validation(
            &["expires", "expire_seconds"],
            "expires 与 expire_seconds 只能设置一个",
        ));
    }

    if task.expire_seconds.is_some_and(|secs| secs < 0) {
        return Err(SchedulerError::validation(
            &["expire_seconds"],
            "expire_seconds 不能为负数",
        ));
    }

    Ok(())
}

/// 校验创建请求并生成待写入的周期任务（`id` 与 `schedule_id` 由存储分配）
pub fn new_periodic_task(spec: PeriodicTaskSpec, now: DateTime<Utc>) -> SchedulerResult<PeriodicTask> {
    let schedule = ScheduleKind::from_parts(spec.interval, spec.crontab, spec.solar, spec.clocked)?;

    let task = PeriodicTask {
        id: 0,
        name: spec.name,
        task: spec.task,
        args: spec.args,
        kwargs: spec.kwargs,
        queue: spec.queue,
        exchange: spec.exchange,
        routing_key: spec.routing_key,
        headers: spec.headers,
        priority: spec.priority,
        expires: spec.expires,
        expire_seconds: spec.expire_seconds,
        one_off: spec.one_off,
        start_time: spec.start_time,
        enabled: spec.enabled,
        last_run_at: None,
        total_run_count: 0,
        date_changed: now,
        description: spec.description,
        no_changes: spec.no_changes,
        schedule,
        schedule_id: 0,
    };

    check_rules(&task)?;
    Ok(task)
}

/// 当前调度与补丁合成后的四个调度字段
fn patched_schedule(
    current: &ScheduleKind,
    patch: &PeriodicTaskPatch,
) -> SchedulerResult<ScheduleKind> {
    let (mut interval, mut crontab, mut solar, mut clocked) = (None, None, None, None);
    match current {
        ScheduleKind::Interval(def) => interval = Some(def.clone()),
        ScheduleKind::Crontab(def) => crontab = Some(def.clone()),
        ScheduleKind::Solar(def) => solar = Some(def.clone()),
        ScheduleKind::Clocked(def) => clocked = Some(def.clone()),
    }

    ScheduleKind::from_parts(
        patch.interval.clone().apply_to(interval),
        patch.crontab.clone().apply_to(crontab),
        patch.solar.clone().apply_to(solar),
        patch.clocked.clone().apply_to(clocked),
    )
}

/// 将补丁应用到已有周期任务并重新校验
pub fn apply_patch(
    existing: &PeriodicTask,
    patch: PeriodicTaskPatch,
    now: DateTime<Utc>,
) -> SchedulerResult<PeriodicTask> {
    let schedule = if patch.touches_schedule() {
        patched_schedule(&existing.schedule, &patch)?
    } else {
        existing.schedule.clone()
    };

    let current = existing.clone();
    let task = PeriodicTask {
        id: current.id,
        name: patch.name.apply_required(current.name),
        task: patch.task.apply_required(current.task),
        args: patch.args.apply_required(current.args),
        kwargs: patch.kwargs.apply_required(current.kwargs),
        queue: patch.queue.apply_to(current.queue),
        exchange: patch.exchange.apply_to(current.exchange),
        routing_key: patch.routing_key.apply_to(current.routing_key),
        headers: patch.headers.apply_required(current.headers),
        priority: patch.priority.apply_to(current.priority),
        expires: patch.expires.apply_to(current.expires),
        expire_seconds: patch.expire_seconds.apply_to(current.expire_seconds),
        one_off: patch.one_off.apply_required(current.one_off),
        start_time: patch.start_time.apply_to(current.start_time),
        enabled: patch.enabled.apply_required(current.enabled),
        last_run_at: current.last_run_at,
        total_run_count: current.total_run_count,
        date_changed: now,
        description: match patch.description {
            UpdateValue::Unset => String::new(),
            other => other.apply_required(current.description),
        },
        no_changes: patch.no_changes.apply_required(current.no_changes),
        schedule,
        schedule_id: current.schedule_id,
    };

    check_rules(&task)?;
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use scheduler_core::models::{
        ClockedSchedule, CrontabSchedule, IntervalPeriod, IntervalSchedule, SolarEvent,
        SolarSchedule,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
    }

    fn every_minute() -> IntervalSchedule {
        IntervalSchedule {
            every: 1,
            period: IntervalPeriod::Minutes,
        }
    }

    fn interval_spec() -> PeriodicTaskSpec {
        PeriodicTaskSpec::new("heartbeat", "tasks.heartbeat").with_interval(every_minute())
    }

    #[test]
    fn test_two_schedule_kinds_rejected() {
        let spec = interval_spec().with_crontab(CrontabSchedule::default());
        let err = new_periodic_task(spec, now()).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.fields(), vec!["interval", "crontab"]);
    }

    #[test]
    fn test_missing_schedule_rejected() {
        let err = new_periodic_task(PeriodicTaskSpec::new("a", "b"), now()).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_clocked_requires_one_off() {
        let spec = PeriodicTaskSpec::new("once", "tasks.once").with_clocked(ClockedSchedule {
            clocked_time: now() + Duration::hours(1),
        });
        let err = new_periodic_task(spec.clone(), now()).unwrap_err();
        assert_eq!(err.fields(), vec!["clocked", "one_off"]);

        let mut spec = spec;
        spec.one_off = true;
        assert!(new_periodic_task(spec, now()).is_ok());
    }

    #[test]
    fn test_expires_and_expire_seconds_exclusive() {
        let mut spec = interval_spec();
        spec.expires = Some(now() + Duration::days(1));
        spec.expire_seconds = Some(60);
        let err = new_periodic_task(spec, now()).unwrap_err();
        assert_eq!(err.fields(), vec!["expires", "expire_seconds"]);
    }

    #[test]
    fn test_invalid_schedule_definition_rejected() {
        let spec = PeriodicTaskSpec::new("solar", "tasks.solar").with_solar(SolarSchedule {
            event: SolarEvent::Sunrise,
            latitude: -95.0,
            longitude: 10.0,
        });
        assert!(new_periodic_task(spec, now()).unwrap_err().is_validation());
    }

    #[test]
    fn test_patch_switches_schedule_kind() {
        let task = new_periodic_task(interval_spec(), now()).unwrap();

        let patch = PeriodicTaskPatch {
            interval: UpdateValue::Unset,
            crontab: UpdateValue::Set(CrontabSchedule::default()),
            ..Default::default()
        };
        let later = now() + Duration::minutes(1);
        let updated = apply_patch(&task, patch, later).unwrap();
        assert_eq!(updated.schedule.kind(), "crontab");
        assert_eq!(updated.date_changed, later);
    }

    #[test]
    fn test_patch_adding_second_kind_rejected() {
        let task = new_periodic_task(interval_spec(), now()).unwrap();
        let patch = PeriodicTaskPatch {
            crontab: UpdateValue::Set(CrontabSchedule::default()),
            ..Default::default()
        };
        let err = apply_patch(&task, patch, now()).unwrap_err();
        assert_eq!(err.fields(), vec!["interval", "crontab"]);
    }

    #[test]
    fn test_patch_nullable_fields() {
        let mut spec = interval_spec();
        spec.queue = Some("celery".into());
        spec.description = "every minute".into();
        let task = new_periodic_task(spec, now()).unwrap();

        let patch = PeriodicTaskPatch {
            queue: UpdateValue::Unset,
            description: UpdateValue::Unset,
            enabled: UpdateValue::Set(false),
            ..Default::default()
        };
        let updated = apply_patch(&task, patch, now()).unwrap();
        assert_eq!(updated.queue, None);
        assert_eq!(updated.description, "");
        assert!(!updated.enabled);
        assert_eq!(updated.name, task.name);
    }
}
