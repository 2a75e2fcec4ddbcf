//! 进程内存储实现
//!
//! 事务持有整个状态的锁并在副本上修改，提交时整体替换，
//! 未提交即丢弃的事务不留下任何痕迹。用于嵌入式场景与测试。

pub mod projection;
pub mod registry;

pub use projection::InMemoryProjectionStore;
pub use registry::InMemoryRegistryStore;
