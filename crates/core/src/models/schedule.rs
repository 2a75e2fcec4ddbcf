use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SchedulerError, SchedulerResult};

/// 周期单位
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntervalPeriod {
    Days,
    Hours,
    Minutes,
    Seconds,
    Microseconds,
}

impl IntervalPeriod {
    /// 单位对应的微秒数
    pub fn unit_micros(&self) -> i64 {
        match self {
            IntervalPeriod::Days => 86_400_000_000,
            IntervalPeriod::Hours => 3_600_000_000,
            IntervalPeriod::Minutes => 60_000_000,
            IntervalPeriod::Seconds => 1_000_000,
            IntervalPeriod::Microseconds => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalPeriod::Days => "days",
            IntervalPeriod::Hours => "hours",
            IntervalPeriod::Minutes => "minutes",
            IntervalPeriod::Seconds => "seconds",
            IntervalPeriod::Microseconds => "microseconds",
        }
    }
}

impl FromStr for IntervalPeriod {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "days" => Ok(IntervalPeriod::Days),
            "hours" => Ok(IntervalPeriod::Hours),
            "minutes" => Ok(IntervalPeriod::Minutes),
            "seconds" => Ok(IntervalPeriod::Seconds),
            "microseconds" => Ok(IntervalPeriod::Microseconds),
            _ => Err(SchedulerError::validation(
                &["period"],
                format!("未知的周期单位: {s}"),
            )),
        }
    }
}

/// 太阳事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SolarEvent {
    DawnAstronomical,
    DawnNautical,
    DawnCivil,
    Sunrise,
    SolarNoon,
    Sunset,
    DuskCivil,
    DuskNautical,
    DuskAstronomical,
}

impl SolarEvent {
    pub const ALL: [SolarEvent; 9] = [
        SolarEvent::DawnAstronomical,
        SolarEvent::DawnNautical,
        SolarEvent::DawnCivil,
        SolarEvent::Sunrise,
        SolarEvent::SolarNoon,
        SolarEvent::Sunset,
        SolarEvent::DuskCivil,
        SolarEvent::DuskNautical,
        SolarEvent::DuskAstronomical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SolarEvent::DawnAstronomical => "dawn_astronomical",
            SolarEvent::DawnNautical => "dawn_nautical",
            SolarEvent::DawnCivil => "dawn_civil",
            SolarEvent::Sunrise => "sunrise",
            SolarEvent::SolarNoon => "solar_noon",
            SolarEvent::Sunset => "sunset",
            SolarEvent::DuskCivil => "dusk_civil",
            SolarEvent::DuskNautical => "dusk_nautical",
            SolarEvent::DuskAstronomical => "dusk_astronomical",
        }
    }
}

impl FromStr for SolarEvent {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SolarEvent::ALL
            .iter()
            .copied()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| SchedulerError::validation(&["event"], format!("未知的太阳事件: {s}")))
    }
}

/// 固定间隔调度
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntervalSchedule {
    pub every: i64,
    pub period: IntervalPeriod,
}

/// 带时区的CRON调度，字段支持范围、列表、步长以及星期/月份名称
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrontabSchedule {
    #[serde(default = "wildcard")]
    pub minute: String,
    #[serde(default = "wildcard")]
    pub hour: String,
    #[serde(default = "wildcard")]
    pub day_of_week: String,
    #[serde(default = "wildcard")]
    pub day_of_month: String,
    #[serde(default = "wildcard")]
    pub month_of_year: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn wildcard() -> String {
    "*".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for CrontabSchedule {
    fn default() -> Self {
        Self {
            minute: wildcard(),
            hour: wildcard(),
            day_of_week: wildcard(),
            day_of_month: wildcard(),
            month_of_year: wildcard(),
            timezone: default_timezone(),
        }
    }
}

/// 天文事件调度
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolarSchedule {
    pub event: SolarEvent,
    pub latitude: f64,
    pub longitude: f64,
}

/// 一次性定时调度
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClockedSchedule {
    pub clocked_time: DateTime<Utc>,
}

/// 周期任务绑定的调度定义，四种类型有且只有一种
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleKind {
    Interval(IntervalSchedule),
    Crontab(CrontabSchedule),
    Solar(SolarSchedule),
    Clocked(ClockedSchedule),
}

impl ScheduleKind {
    /// 由四个可选字段构造调度定义，要求恰好设置一个
    pub fn from_parts(
        interval: Option<IntervalSchedule>,
        crontab: Option<CrontabSchedule>,
        solar: Option<SolarSchedule>,
        clocked: Option<ClockedSchedule>,
    ) -> SchedulerResult<Self> {
        let mut selected = Vec::new();
        if interval.is_some() {
            selected.push("interval");
        }
        if crontab.is_some() {
            selected.push("crontab");
        }
        if solar.is_some() {
            selected.push("solar");
        }
        if clocked.is_some() {
            selected.push("clocked");
        }

        match selected.len() {
            0 => Err(SchedulerError::validation(
                &["interval", "crontab", "solar", "clocked"],
                "必须设置 clocked、interval、crontab、solar 中的一种",
            )),
            1 => Ok(interval
                .map(ScheduleKind::Interval)
                .or(crontab.map(ScheduleKind::Crontab))
                .or(solar.map(ScheduleKind::Solar))
                .or(clocked.map(ScheduleKind::Clocked))
                .ok_or_else(|| SchedulerError::Internal("调度类型丢失".to_string()))?),
            _ => Err(SchedulerError::validation(
                &selected,
                "clocked、interval、crontab、solar 只能设置一种",
            )),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleKind::Interval(_) => "interval",
            ScheduleKind::Crontab(_) => "crontab",
            ScheduleKind::Solar(_) => "solar",
            ScheduleKind::Clocked(_) => "clocked",
        }
    }

    pub fn is_clocked(&self) -> bool {
        matches!(self, ScheduleKind::Clocked(_))
    }
}

fn cronexp(field: &str) -> String {
    let compact: String = field.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        "*".to_string()
    } else {
        compact
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleKind::Interval(s) => write!(f, "every {} {}", s.every, s.period.as_str()),
            ScheduleKind::Crontab(s) => write!(
                f,
                "{} {} {} {} {} (m/h/dM/MY/d) {}",
                cronexp(&s.minute),
                cronexp(&s.hour),
                cronexp(&s.day_of_month),
                cronexp(&s.month_of_year),
                cronexp(&s.day_of_week),
                s.timezone
            ),
            ScheduleKind::Solar(s) => {
                write!(f, "{} ({}, {})", s.event.as_str(), s.latitude, s.longitude)
            }
            ScheduleKind::Clocked(s) => write!(f, "{}", s.clocked_time.to_rfc3339()),
        }
    }
}
