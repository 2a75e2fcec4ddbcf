//! 周期任务注册表、变更信标观察者与事件摄取管道

pub mod beacon;
pub mod ingest;
pub mod registry;

pub use beacon::BeaconWatcher;
pub use ingest::{EventApplier, IngestPipeline, IngestStats};
pub use registry::PeriodicTaskRegistry;
