use chrono::{DateTime, Utc};

use scheduler_core::models::{ClockedSchedule, ScheduleKind};

use super::{Schedule, ScheduleState};

/// 一次性定时求值器
///
/// 到达 `clocked_time` 后恰好到期一次；是否停用所属周期任务由调用方决定。
#[derive(Debug, Clone)]
pub struct ClockedEngine {
    def: ClockedSchedule,
}

impl ClockedEngine {
    pub fn new(def: ClockedSchedule) -> Self {
        Self { def }
    }
}

impl Schedule for ClockedEngine {
    fn remaining(&self, last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ScheduleState {
        let clocked_time = self.def.clocked_time;

        if last_run_at.is_some_and(|last| last >= clocked_time) {
            return ScheduleState::never();
        }

        if now >= clocked_time {
            ScheduleState::due(super::never_check())
        } else {
            ScheduleState::not_due(clocked_time - now)
        }
    }

    fn is_one_shot(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        ScheduleKind::Clocked(self.def.clone()).to_string()
    }
}
