use chrono::{DateTime, Duration, Utc};

use scheduler_core::models::{IntervalSchedule, ScheduleKind};
use scheduler_core::{SchedulerError, SchedulerResult};

use super::{Schedule, ScheduleState};

/// 固定间隔求值器
#[derive(Debug, Clone)]
pub struct IntervalEngine {
    def: IntervalSchedule,
    period: Duration,
}

impl IntervalEngine {
    pub fn new(def: IntervalSchedule) -> SchedulerResult<Self> {
        if def.every <= 0 {
            return Err(SchedulerError::validation(
                &["every"],
                format!("间隔必须大于0: {}", def.every),
            ));
        }

        let micros = def
            .every
            .checked_mul(def.period.unit_micros())
            .ok_or_else(|| {
                SchedulerError::validation(&["every"], format!("间隔过大: {}", def.every))
            })?;

        Ok(Self {
            period: Duration::microseconds(micros),
            def,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Schedule for IntervalEngine {
    fn remaining(&self, last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ScheduleState {
        let Some(last) = last_run_at else {
            return ScheduleState::due(Duration::zero());
        };

        let remaining = self.period - (now - last);
        if remaining <= Duration::zero() {
            ScheduleState::due(remaining)
        } else {
            ScheduleState::not_due(remaining)
        }
    }

    fn describe(&self) -> String {
        ScheduleKind::Interval(self.def.clone()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use scheduler_core::models::IntervalPeriod;

    fn engine(every: i64, period: IntervalPeriod) -> IntervalEngine {
        IntervalEngine::new(IntervalSchedule { every, period }).unwrap()
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_due_exactly_at_boundary() {
        let schedule = engine(10, IntervalPeriod::Seconds);
        let last = base();

        let before = schedule.remaining(Some(last), last + Duration::seconds(9));
        assert!(!before.is_due);
        assert_eq!(before.next_check, Duration::seconds(1));

        let at = schedule.remaining(Some(last), last + Duration::seconds(10));
        assert!(at.is_due);
        assert_eq!(at.next_check, Duration::zero());

        let after = schedule.remaining(Some(last), last + Duration::seconds(25));
        assert!(after.is_due);
        assert_eq!(after.next_check, Duration::zero());
    }

    #[test]
    fn test_due_iff_elapsed_reaches_period() {
        let schedule = engine(3, IntervalPeriod::Hours);
        let last = base();
        for minutes in [0_i64, 1, 90, 179, 180, 181, 600] {
            let state = schedule.remaining(Some(last), last + Duration::minutes(minutes));
            assert_eq!(state.is_due, minutes >= 180, "elapsed {minutes} minutes");
        }
    }

    #[test]
    fn test_first_run_is_due() {
        let state = engine(1, IntervalPeriod::Days).remaining(None, base());
        assert!(state.is_due);
    }

    #[test]
    fn test_microsecond_period() {
        let schedule = engine(250, IntervalPeriod::Microseconds);
        let last = base();
        let state = schedule.remaining(Some(last), last + Duration::microseconds(100));
        assert!(!state.is_due);
        assert_eq!(state.next_check, Duration::microseconds(150));
    }

    #[test]
    fn test_rejects_non_positive_and_overflow() {
        assert!(IntervalEngine::new(IntervalSchedule {
            every: 0,
            period: IntervalPeriod::Seconds
        })
        .is_err());
        assert!(IntervalEngine::new(IntervalSchedule {
            every: i64::MAX / 2,
            period: IntervalPeriod::Days
        })
        .is_err());
    }

    #[test]
    fn test_repeated_calls_are_identical() {
        let schedule = engine(5, IntervalPeriod::Minutes);
        let now = base() + Duration::minutes(3);
        assert_eq!(
            schedule.remaining(Some(base()), now),
            schedule.remaining(Some(base()), now)
        );
        assert_eq!(schedule.describe(), "every 5 minutes");
    }
}
