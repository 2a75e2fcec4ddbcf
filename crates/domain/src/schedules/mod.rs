//! 调度引擎
//!
//! 每种调度类型实现 [`Schedule::remaining`]：给定上次运行时间和当前时间，
//! 返回是否到期以及下一次需要检查的间隔。求值是纯函数，没有副作用也不保存状态，
//! 相同输入总是得到相同输出。语法、时区、坐标等校验全部在 [`build_schedule`] 中完成，
//! 求值阶段不会出错。

use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};

use scheduler_core::models::ScheduleKind;
use scheduler_core::SchedulerResult;

pub mod clocked;
pub mod crontab;
pub mod interval;
pub mod solar;

pub use clocked::ClockedEngine;
pub use crontab::CrontabEngine;
pub use interval::IntervalEngine;
pub use solar::SolarEngine;

/// 一次性调度触发后返回的"永不再检查"秒数
pub const NEVER_CHECK_TIMEOUT_SECONDS: i64 = 9_999_999_999;

pub fn never_check() -> Duration {
    Duration::seconds(NEVER_CHECK_TIMEOUT_SECONDS)
}

/// 调度求值结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleState {
    pub is_due: bool,
    /// 距离下一次需要检查的时长，不小于0
    pub next_check: Duration,
}

impl ScheduleState {
    pub fn due(next_check: Duration) -> Self {
        Self {
            is_due: true,
            next_check: next_check.max(Duration::zero()),
        }
    }

    pub fn not_due(next_check: Duration) -> Self {
        Self {
            is_due: false,
            next_check: next_check.max(Duration::zero()),
        }
    }

    pub fn never() -> Self {
        Self::not_due(never_check())
    }
}

/// 调度能力
pub trait Schedule: Send + Sync + Debug {
    fn remaining(&self, last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ScheduleState;

    /// 一次性调度触发后调用方不应再排期
    fn is_one_shot(&self) -> bool {
        false
    }

    fn describe(&self) -> String;
}

/// 校验调度定义并构造对应的求值器
pub fn build_schedule(kind: &ScheduleKind) -> SchedulerResult<Box<dyn Schedule>> {
    let schedule: Box<dyn Schedule> = match kind {
        ScheduleKind::Interval(def) => Box::new(IntervalEngine::new(def.clone())?),
        ScheduleKind::Crontab(def) => Box::new(CrontabEngine::new(def.clone())?),
        ScheduleKind::Solar(def) => Box::new(SolarEngine::new(def.clone())?),
        ScheduleKind::Clocked(def) => Box::new(ClockedEngine::new(def.clone())),
    };
    Ok(schedule)
}
