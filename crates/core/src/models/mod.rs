//! # 数据模型
//!
//! 周期调度与事件投影的核心数据结构。
//!
//! - [`ScheduleKind`]：四种调度定义（interval / crontab / solar / clocked）的和类型，
//!   只能通过 [`ScheduleKind::from_parts`] 从四个可空字段构造
//! - [`PeriodicTask`]：任务定义与调度的绑定，以及创建请求与补丁
//! - [`TaskProjection`] / [`WorkerProjection`]：由生命周期事件合并出的物化视图，
//!   每个字段都记录最后一次写入的 [`FieldStamp`]
//! - [`LifecycleEvent`]：解码后的任务/Worker事件
//!
//! 所有时间字段统一使用 `DateTime<Utc>`，时区换算只发生在crontab求值时。

pub mod event;
pub mod periodic_task;
pub mod projection;
pub mod schedule;
pub mod update_value;

pub use event::*;
pub use periodic_task::*;
pub use projection::*;
pub use schedule::*;
pub use update_value::*;
