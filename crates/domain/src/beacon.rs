use chrono::{DateTime, Duration, DurationRound, Utc};

/// 变更信标的下一个取值：`max(now, previous + 1µs)`，截断到微秒
///
/// 数据库时间戳精度为微秒，截断后仍能保证严格递增。
pub fn advance_beacon(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let tick = Duration::microseconds(1);
    let now = now.duration_trunc(tick).unwrap_or(now);
    match previous {
        Some(previous) if previous + tick > now => previous + tick,
        _ => now,
    }
}
