use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronExpr;
use tracing::warn;

use scheduler_core::models::{CrontabSchedule, ScheduleKind};
use scheduler_core::{SchedulerError, SchedulerResult};

use super::{Schedule, ScheduleState};

const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

const MONTH_NAMES: [(&str, u32); 12] = [
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

const WEEKDAY_ALIASES: [(&str, u32); 7] = [
    ("sun", 0),
    ("mon", 1),
    ("tue", 2),
    ("wed", 3),
    ("thu", 4),
    ("fri", 5),
    ("sat", 6),
];

/// 单个crontab字段的取值范围
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    /// `*` 展开的上界，星期字段允许写7但 `*` 只展开到6
    star_max: u32,
    names: &'static [(&'static str, u32)],
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    star_max: 59,
    names: &[],
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    star_max: 23,
    names: &[],
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day_of_month",
    min: 1,
    max: 31,
    star_max: 31,
    names: &[],
};
const MONTH_OF_YEAR: FieldSpec = FieldSpec {
    name: "month_of_year",
    min: 1,
    max: 12,
    star_max: 12,
    names: &MONTH_NAMES,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day_of_week",
    min: 0,
    max: 7,
    star_max: 6,
    names: &WEEKDAY_ALIASES,
};

/// 去掉空白，空字段视为 `*`
fn normalize(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        "*".to_string()
    } else {
        compact.to_lowercase()
    }
}

fn invalid(spec: &FieldSpec, raw: &str, message: impl Into<String>) -> SchedulerError {
    SchedulerError::InvalidCron {
        expr: format!("{}={}", spec.name, raw),
        message: message.into(),
    }
}

fn parse_value(spec: &FieldSpec, raw: &str, token: &str) -> SchedulerResult<u32> {
    if let Some((_, value)) = spec.names.iter().find(|(name, _)| *name == token) {
        return Ok(*value);
    }

    let value: u32 = token
        .parse()
        .map_err(|_| invalid(spec, raw, format!("无法解析的取值: {token}")))?;

    if value < spec.min || value > spec.max {
        return Err(invalid(
            spec,
            raw,
            format!("取值 {value} 超出范围 {}-{}", spec.min, spec.max),
        ));
    }
    Ok(value)
}

/// 展开一个字段为取值集合，支持 `*`、`n`、`a-b`（允许回绕）、`*/s`、`a-b/s`、`n/s` 和逗号列表
fn parse_field(spec: &FieldSpec, raw: &str) -> SchedulerResult<BTreeSet<u32>> {
    let mut values = BTreeSet::new();

    for item in raw.split(',') {
        if item.is_empty() {
            return Err(invalid(spec, raw, "列表中存在空项"));
        }

        let (range_part, step) = match item.split_once('/') {
            Some((range_part, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(spec, raw, format!("无法解析的步长: {step}")))?;
                if step == 0 {
                    return Err(invalid(spec, raw, "步长必须大于0"));
                }
                (range_part, Some(step))
            }
            None => (item, None),
        };

        let sequence: Vec<u32> = if range_part == "*" {
            (spec.min..=spec.star_max).collect()
        } else if let Some((start, end)) = range_part.split_once('-') {
            let start = parse_value(spec, raw, start)?;
            let end = parse_value(spec, raw, end)?;
            if start <= end {
                (start..=end).collect()
            } else {
                (start..=spec.max).chain(spec.min..=end).collect()
            }
        } else {
            let start = parse_value(spec, raw, range_part)?;
            match step {
                Some(_) => (start..=spec.star_max.max(start)).collect(),
                None => vec![start],
            }
        };

        let step = step.unwrap_or(1) as usize;
        values.extend(sequence.into_iter().step_by(step));
    }

    // 星期字段中7与0都表示周日
    if spec.name == DAY_OF_WEEK.name && values.remove(&7) {
        values.insert(0);
    }

    Ok(values)
}

fn render_numbers(values: &BTreeSet<u32>, spec: &FieldSpec) -> String {
    if values.len() == (spec.min..=spec.star_max).count() {
        return "*".to_string();
    }
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn render_weekdays(values: &BTreeSet<u32>) -> String {
    if values.len() == 7 {
        return "*".to_string();
    }
    values
        .iter()
        .map(|v| WEEKDAY_NAMES[*v as usize])
        .collect::<Vec<_>>()
        .join(",")
}

/// 带时区的crontab求值器
///
/// 字段展开后编译为 `cron` 表达式并在调度自身的时区中迭代。
/// 日期与星期都不以 `*` 开头时按POSIX约定取并集：分别编译两个表达式，取较早的触发时间；
/// 否则两个字段同时生效。
///
/// 落在夏令时跳变空档中的本地时间当天不会触发（例如 America/New_York 的
/// `30 2 * * *` 跳过 2024-03-10），不会顺延到空档之后。
#[derive(Debug, Clone)]
pub struct CrontabEngine {
    def: CrontabSchedule,
    tz: Tz,
    expressions: Vec<CronExpr>,
}

impl CrontabEngine {
    pub fn new(def: CrontabSchedule) -> SchedulerResult<Self> {
        let tz: Tz = def
            .timezone
            .trim()
            .parse()
            .map_err(|_| SchedulerError::InvalidTimezone(def.timezone.clone()))?;

        let minute_raw = normalize(&def.minute);
        let hour_raw = normalize(&def.hour);
        let dom_raw = normalize(&def.day_of_month);
        let month_raw = normalize(&def.month_of_year);
        let dow_raw = normalize(&def.day_of_week);

        let minute = render_numbers(&parse_field(&MINUTE, &minute_raw)?, &MINUTE);
        let hour = render_numbers(&parse_field(&HOUR, &hour_raw)?, &HOUR);
        let dom = render_numbers(&parse_field(&DAY_OF_MONTH, &dom_raw)?, &DAY_OF_MONTH);
        let month = render_numbers(&parse_field(&MONTH_OF_YEAR, &month_raw)?, &MONTH_OF_YEAR);
        let dow = render_weekdays(&parse_field(&DAY_OF_WEEK, &dow_raw)?);

        // 以 `*` 开头的字段（包括 `*/2`）只决定组合方式，其取值仍然参与过滤
        let day_pairs: Vec<(&str, &str)> =
            if dom_raw.starts_with('*') || dow_raw.starts_with('*') {
                vec![(dom.as_str(), dow.as_str())]
            } else {
                vec![(dom.as_str(), "*"), ("*", dow.as_str())]
            };

        let expressions = day_pairs
            .into_iter()
            .map(|(dom, dow)| {
                let expr = format!("0 {minute} {hour} {dom} {month} {dow}");
                CronExpr::from_str(&expr).map_err(|e| SchedulerError::InvalidCron {
                    expr,
                    message: e.to_string(),
                })
            })
            .collect::<SchedulerResult<Vec<_>>>()?;

        Ok(Self { def, tz, expressions })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// 严格晚于 `instant` 的下一次触发时间
    pub fn next_fire_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = instant.with_timezone(&self.tz);
        self.expressions
            .iter()
            .filter_map(|expr| expr.after(&local).next())
            .map(|t| t.with_timezone(&Utc))
            .min()
    }

    /// 从 `from` 开始的若干次触发时间
    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = from;
        while times.len() < count {
            match self.next_fire_after(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }
}

impl Schedule for CrontabEngine {
    fn remaining(&self, last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ScheduleState {
        let anchor = last_run_at.unwrap_or(now);

        match self.next_fire_after(anchor) {
            Some(next) if next <= now => match self.next_fire_after(now) {
                Some(following) => ScheduleState::due(following - now),
                None => ScheduleState::due(super::never_check()),
            },
            Some(next) => ScheduleState::not_due(next - now),
            None => {
                warn!("crontab调度没有后续触发时间: {}", self.describe());
                ScheduleState::never()
            }
        }
    }

    fn describe(&self) -> String {
        ScheduleKind::Crontab(self.def.clone()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    fn crontab(minute: &str, hour: &str, dom: &str, dow: &str, tz: &str) -> CrontabEngine {
        CrontabEngine::new(CrontabSchedule {
            minute: minute.into(),
            hour: hour.into(),
            day_of_month: dom.into(),
            day_of_week: dow.into(),
            month_of_year: "*".into(),
            timezone: tz.into(),
        })
        .unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_parse_field_syntax() {
        assert_eq!(
            parse_field(&MINUTE, "*/15").unwrap(),
            BTreeSet::from([0, 15, 30, 45])
        );
        assert_eq!(
            parse_field(&HOUR, "8-10,22").unwrap(),
            BTreeSet::from([8, 9, 10, 22])
        );
        assert_eq!(
            parse_field(&HOUR, "22-2").unwrap(),
            BTreeSet::from([0, 1, 2, 22, 23])
        );
        assert_eq!(
            parse_field(&MINUTE, "50/5").unwrap(),
            BTreeSet::from([50, 55])
        );
        assert_eq!(
            parse_field(&HOUR, "0-12/6").unwrap(),
            BTreeSet::from([0, 6, 12])
        );
        assert_eq!(
            parse_field(&DAY_OF_WEEK, "mon-fri").unwrap(),
            BTreeSet::from([1, 2, 3, 4, 5])
        );
        assert_eq!(
            parse_field(&DAY_OF_WEEK, "7").unwrap(),
            BTreeSet::from([0])
        );
        assert_eq!(
            parse_field(&MONTH_OF_YEAR, "jan,jul").unwrap(),
            BTreeSet::from([1, 7])
        );
    }

    #[test]
    fn test_parse_field_rejects_garbage() {
        assert!(parse_field(&MINUTE, "60").is_err());
        assert!(parse_field(&HOUR, "*/0").is_err());
        assert!(parse_field(&DAY_OF_MONTH, "0").is_err());
        assert!(parse_field(&MINUTE, "1,,2").is_err());
        assert!(parse_field(&DAY_OF_WEEK, "funday").is_err());
    }

    #[test]
    fn test_invalid_crontab_is_validation_error() {
        let err = CrontabEngine::new(CrontabSchedule {
            minute: "61".into(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.is_validation());

        let err = CrontabEngine::new(CrontabSchedule {
            timezone: "Not/AZone".into(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTimezone(_)));
    }

    #[test]
    fn test_fires_at_local_nine_in_shanghai() {
        let schedule = crontab("0", "9", "*", "*", "Asia/Shanghai");

        // 09:00 上海时间 = 01:00 UTC
        let next = schedule.next_fire_after(utc(2024, 1, 1, 12, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 2, 1, 0, 0));

        let last = utc(2024, 1, 1, 1, 0, 0);
        let before = schedule.remaining(Some(last), utc(2024, 1, 2, 0, 59, 59));
        assert!(!before.is_due);
        assert_eq!(before.next_check, Duration::seconds(1));

        let at = schedule.remaining(Some(last), utc(2024, 1, 2, 1, 0, 0));
        assert!(at.is_due);
        assert_eq!(at.next_check, Duration::hours(24));
    }

    #[test]
    fn test_changing_timezone_shifts_by_offset() {
        let from = utc(2024, 6, 1, 12, 0, 0);
        let shanghai = crontab("0", "9", "*", "*", "Asia/Shanghai")
            .next_fire_after(from)
            .unwrap();
        let utc_zone = crontab("0", "9", "*", "*", "UTC").next_fire_after(from).unwrap();

        assert_eq!(utc_zone - shanghai, Duration::hours(8));
    }

    #[test]
    fn test_dst_zone_keeps_local_hour() {
        let schedule = crontab("30", "8", "*", "*", "America/New_York");
        let winter = schedule.next_fire_after(utc(2024, 1, 10, 0, 0, 0)).unwrap();
        let summer = schedule.next_fire_after(utc(2024, 7, 10, 0, 0, 0)).unwrap();

        assert_eq!((winter.hour(), winter.minute()), (13, 30));
        assert_eq!((summer.hour(), summer.minute()), (12, 30));
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        // 每月13号或每周五
        let schedule = crontab("0", "0", "13", "fri", "UTC");
        let fires = schedule.upcoming(utc(2024, 9, 1, 0, 0, 0), 6);

        assert!(fires
            .iter()
            .all(|t| t.day() == 13 || t.weekday() == Weekday::Fri));
        // 2024-09-06 周五，2024-09-13 既是13号又是周五，只触发一次
        assert_eq!(fires[0], utc(2024, 9, 6, 0, 0, 0));
        assert_eq!(fires[1], utc(2024, 9, 13, 0, 0, 0));
        assert_eq!(fires[2], utc(2024, 9, 20, 0, 0, 0));
    }

    #[test]
    fn test_single_restricted_day_field_filters_alone() {
        let schedule = crontab("0", "12", "*", "mon", "UTC");
        let fires = schedule.upcoming(utc(2024, 9, 1, 0, 0, 0), 3);
        assert!(fires.iter().all(|t| t.weekday() == Weekday::Mon));
    }

    #[test]
    fn test_stepped_day_of_month_still_filters() {
        let schedule = crontab("0", "0", "*/2", "*", "UTC");
        let days: Vec<u32> = schedule
            .upcoming(utc(2024, 9, 1, 0, 0, 0), 4)
            .iter()
            .map(|t| t.day())
            .collect();
        assert_eq!(days, vec![3, 5, 7, 9]);
    }

    #[test]
    fn test_stepped_day_of_week_combines_with_day_of_month() {
        // 1-7号中的周日、周二、周四、周六
        let schedule = crontab("0", "0", "1-7", "*/2", "UTC");
        let fires = schedule.upcoming(utc(2024, 9, 1, 0, 0, 0), 4);

        assert_eq!(
            fires,
            vec![
                utc(2024, 9, 3, 0, 0, 0),
                utc(2024, 9, 5, 0, 0, 0),
                utc(2024, 9, 7, 0, 0, 0),
                utc(2024, 10, 1, 0, 0, 0),
            ]
        );
        assert!(fires.iter().all(|t| t.day() <= 7
            && matches!(
                t.weekday(),
                Weekday::Sun | Weekday::Tue | Weekday::Thu | Weekday::Sat
            )));
    }

    #[test]
    fn test_stepped_day_of_week_alone() {
        let schedule = crontab("0", "6", "*", "*/3", "UTC");
        let fires = schedule.upcoming(utc(2024, 9, 1, 12, 0, 0), 5);
        assert!(fires.iter().all(|t| matches!(
            t.weekday(),
            Weekday::Sun | Weekday::Wed | Weekday::Sat
        )));
        assert_eq!(fires[0], utc(2024, 9, 4, 6, 0, 0));
    }

    #[test]
    fn test_local_time_in_dst_gap_is_skipped() {
        let schedule = crontab("30", "2", "*", "*", "America/New_York");
        let next = schedule.next_fire_after(utc(2024, 3, 9, 12, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 3, 11, 6, 30, 0));
    }

    #[test]
    fn test_first_evaluation_waits_for_next_fire() {
        let schedule = crontab("*/10", "*", "*", "*", "UTC");
        let now = utc(2024, 2, 1, 10, 3, 0);
        let state = schedule.remaining(None, now);
        assert!(!state.is_due);
        assert_eq!(state.next_check, Duration::minutes(7));
    }

    #[test]
    fn test_missed_fire_is_due() {
        let schedule = crontab("0", "*", "*", "*", "UTC");
        let state = schedule.remaining(
            Some(utc(2024, 2, 1, 7, 0, 0)),
            utc(2024, 2, 1, 10, 15, 0),
        );
        assert!(state.is_due);
        assert_eq!(state.next_check, Duration::minutes(45));
    }
}
