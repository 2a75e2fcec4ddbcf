pub mod projection;
pub mod registry;

pub use projection::SqliteProjectionStore;
pub use registry::SqliteRegistryStore;
