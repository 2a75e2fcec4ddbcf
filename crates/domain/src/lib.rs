//! 纯业务逻辑：调度引擎、周期任务校验、投影合并与事件解码。
//!
//! 本crate不做任何I/O，所有函数对相同输入给出相同输出。

pub mod beacon;
pub mod decode;
pub mod merge;
pub mod schedules;
pub mod validation;

pub use beacon::advance_beacon;
pub use decode::decode_event;
pub use merge::{merge_task_event, merge_worker_event, MergeOutcome};
pub use schedules::{
    build_schedule, never_check, Schedule, ScheduleState, NEVER_CHECK_TIMEOUT_SECONDS,
};
pub use validation::{apply_patch, new_periodic_task};
