use chrono::{DateTime, Duration, TimeZone, Utc};

use scheduler_core::models::{ScheduleKind, SolarEvent, SolarSchedule};
use scheduler_core::{SchedulerError, SchedulerResult};

use super::{Schedule, ScheduleState};

const J2000: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const SECONDS_PER_DAY: f64 = 86_400.0;
const EARTH_OBLIQUITY: f64 = 23.4397;

/// 向后搜索的天数，覆盖极昼/极夜之后的第一次出现
const SEARCH_DAYS: i64 = 400;

/// 事件在地平线上下的高度角（度），None表示太阳过中天
fn horizon(event: SolarEvent) -> Option<f64> {
    match event {
        SolarEvent::DawnAstronomical | SolarEvent::DuskAstronomical => Some(-18.0),
        SolarEvent::DawnNautical | SolarEvent::DuskNautical => Some(-12.0),
        SolarEvent::DawnCivil | SolarEvent::DuskCivil => Some(-6.0),
        SolarEvent::Sunrise | SolarEvent::Sunset => Some(-0.833),
        SolarEvent::SolarNoon => None,
    }
}

fn is_rising(event: SolarEvent) -> bool {
    matches!(
        event,
        SolarEvent::DawnAstronomical
            | SolarEvent::DawnNautical
            | SolarEvent::DawnCivil
            | SolarEvent::Sunrise
    )
}

fn julian_date(instant: DateTime<Utc>) -> f64 {
    instant.timestamp() as f64 / SECONDS_PER_DAY + UNIX_EPOCH_JD
}

fn from_julian_date(jd: f64) -> Option<DateTime<Utc>> {
    let seconds = (jd - UNIX_EPOCH_JD) * SECONDS_PER_DAY;
    Utc.timestamp_opt(seconds.round() as i64, 0).single()
}

/// 天文事件求值器，基于日出方程计算
#[derive(Debug, Clone)]
pub struct SolarEngine {
    def: SolarSchedule,
}

impl SolarEngine {
    pub fn new(def: SolarSchedule) -> SchedulerResult<Self> {
        let mut fields = Vec::new();
        if !(-90.0..=90.0).contains(&def.latitude) {
            fields.push("latitude");
        }
        if !(-180.0..=180.0).contains(&def.longitude) {
            fields.push("longitude");
        }
        if !fields.is_empty() {
            return Err(SchedulerError::validation(
                &fields,
                format!(
                    "坐标超出范围: latitude={}, longitude={}",
                    def.latitude, def.longitude
                ),
            ));
        }
        Ok(Self { def })
    }

    /// 第 `day` 个J2000日（自2000-01-01 12:00 UTC起）的事件时间，当天不发生时返回None
    fn event_on_day(&self, day: i64) -> Option<DateTime<Utc>> {
        let mean_solar_time = day as f64 - self.def.longitude / 360.0;
        let anomaly = (357.5291 + 0.985_600_28 * mean_solar_time).rem_euclid(360.0);
        let m = anomaly.to_radians();
        let center = 1.9148 * m.sin() + 0.0200 * (2.0 * m).sin() + 0.0003 * (3.0 * m).sin();
        let ecliptic_longitude = (anomaly + center + 180.0 + 102.9372).rem_euclid(360.0);
        let lambda = ecliptic_longitude.to_radians();
        let transit =
            J2000 + mean_solar_time + 0.0053 * m.sin() - 0.0069 * (2.0 * lambda).sin();

        let Some(altitude) = horizon(self.def.event) else {
            return from_julian_date(transit);
        };

        let declination = (lambda.sin() * EARTH_OBLIQUITY.to_radians().sin()).asin();
        let phi = self.def.latitude.to_radians();
        let cos_hour_angle = (altitude.to_radians().sin() - phi.sin() * declination.sin())
            / (phi.cos() * declination.cos());
        if !(-1.0..=1.0).contains(&cos_hour_angle) {
            return None;
        }

        let hour_angle = cos_hour_angle.acos().to_degrees() / 360.0;
        if is_rising(self.def.event) {
            from_julian_date(transit - hour_angle)
        } else {
            from_julian_date(transit + hour_angle)
        }
    }

    /// 严格晚于 `instant` 的下一次事件时间
    pub fn next_occurrence_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let current_day = (julian_date(instant) - J2000 + 0.0008).ceil() as i64;
        (current_day - 1..=current_day + SEARCH_DAYS)
            .filter_map(|day| self.event_on_day(day))
            .find(|occurrence| *occurrence > instant)
    }
}

impl Schedule for SolarEngine {
    fn remaining(&self, last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ScheduleState {
        let anchor = last_run_at.unwrap_or(now);

        match self.next_occurrence_after(anchor) {
            Some(next) if next <= now => match self.next_occurrence_after(now) {
                Some(following) => ScheduleState::due(following - now),
                None => ScheduleState::due(Duration::days(1)),
            },
            Some(next) => ScheduleState::not_due(next - now),
            // 极昼/极夜：一天后再看
            None => ScheduleState::not_due(Duration::days(1)),
        }
    }

    fn describe(&self) -> String {
        ScheduleKind::Solar(self.def.clone()).to_string()
    }
}
