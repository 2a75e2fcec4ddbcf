//! 配置管理
//!
//! 配置按以下顺序叠加：内置默认值 → TOML配置文件 → `SCHEDULER_` 前缀环境变量。
//! 每个配置段都提供 `validate()`，在启动阶段一次性校验。

pub mod models;

pub use models::*;
