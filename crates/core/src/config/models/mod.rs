pub mod app_config;
pub mod database;
pub mod event_source;
pub mod ingest;
pub mod observability;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use event_source::{EventSourceConfig, EventSourceType};
pub use ingest::{BeaconConfig, IngestConfig};
pub use observability::ObservabilityConfig;
