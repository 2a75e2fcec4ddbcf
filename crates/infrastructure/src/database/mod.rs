//! 关系型存储：SQLite与PostgreSQL两套实现共享行映射与错误分类

pub mod errors;
pub mod manager;
pub mod postgres;
pub mod rows;
pub mod sqlite;

pub use manager::{DatabaseManager, DatabasePool, DatabaseType};
pub use postgres::{PostgresProjectionStore, PostgresRegistryStore};
pub use sqlite::{SqliteProjectionStore, SqliteRegistryStore};
