//! 存储与事件源实现
//!
//! - [`database`]：SQLite / PostgreSQL 上的注册表、信标与投影存储
//! - [`memory`]：进程内存储
//! - [`event_source`]：RabbitMQ 与进程内通道事件源

pub mod database;
pub mod event_source;
pub mod memory;

pub use database::*;
pub use event_source::*;
pub use memory::*;
